use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{CoinStore, Filter};
use crate::error::FetchError;

/// In-process table store with optional scripted failures.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    failures: Mutex<VecDeque<FetchError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(table: &str, rows: Vec<Value>) -> Self {
        let store = Self::default();
        lock(&store.tables).insert(table.to_string(), rows);
        store
    }

    /// Snapshot of a table.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    /// The next store call fails with `err` instead of running.
    pub fn fail_next(&self, err: FetchError) {
        lock(&self.failures).push_back(err);
    }

    fn take_failure(&self) -> Result<(), FetchError> {
        match lock(&self.failures).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn project(row: &Value, columns: &str) -> Value {
    if columns.trim() == "*" {
        return row.clone();
    }
    let mut out = Map::new();
    for col in columns.split(',').map(str::trim) {
        if let Some(v) = row.get(col) {
            out.insert(col.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

fn merge(row: &mut Value, fields: &Value) {
    if let (Some(target), Some(source)) = (row.as_object_mut(), fields.as_object()) {
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl CoinStore for MemoryStore {
    async fn select(&self, table: &str, columns: &str, filters: &[Filter]) -> Result<Vec<Value>, FetchError> {
        self.take_failure()?;
        let tables = lock(&self.tables);
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| f.matches(row)))
                    .map(|row| project(row, columns))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(&self, table: &str, fields: &Value, filters: &[Filter]) -> Result<(), FetchError> {
        self.take_failure()?;
        let mut tables = lock(&self.tables);
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| filters.iter().all(|f| f.matches(row))) {
                merge(row, fields);
            }
        }
        Ok(())
    }

    async fn upsert(&self, table: &str, row: &Value, on_conflict: &str) -> Result<(), FetchError> {
        self.take_failure()?;
        let key = row
            .get(on_conflict)
            .cloned()
            .ok_or_else(|| FetchError::Other(format!("upsert row has no `{on_conflict}` value")))?;

        let mut tables = lock(&self.tables);
        let rows = tables.entry(table.to_string()).or_default();
        if let Some(existing) = rows.iter_mut().find(|r| r.get(on_conflict) == Some(&key)) {
            merge(existing, row);
            return Ok(());
        }

        let next_id = rows
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1;
        let mut inserted = row.clone();
        if let Some(obj) = inserted.as_object_mut() {
            obj.entry("id").or_insert(Value::from(next_id));
        }
        rows.push(inserted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::with_rows(
            "coins",
            vec![
                json!({"id": 1, "coin_name": "BTC", "coingecko_id": "bitcoin", "logo_url": null}),
                json!({"id": 2, "coin_name": "ETH", "coingecko_id": null, "logo_url": "x"}),
            ],
        )
    }

    #[tokio::test]
    async fn select_filters_and_projects() {
        let s = store();
        let rows = s
            .select("coins", "id, coin_name", &[Filter::not_null("coingecko_id")])
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"id": 1, "coin_name": "BTC"})]);
        assert!(s.select("missing", "*", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_merges_matching_rows() {
        let s = store();
        s.update("coins", &json!({"logo_url": "btc.png"}), &[Filter::eq("coingecko_id", "bitcoin")])
            .await
            .unwrap();
        let rows = s.rows("coins");
        assert_eq!(rows[0]["logo_url"], "btc.png");
        assert_eq!(rows[1]["logo_url"], "x");
    }

    #[tokio::test]
    async fn upsert_inserts_then_merges() {
        let s = store();
        s.upsert("coins", &json!({"coin_name": "SOL", "coin_base": "SOL"}), "coin_name")
            .await
            .unwrap();
        s.upsert("coins", &json!({"coin_name": "BTC", "coin_base": "BTC"}), "coin_name")
            .await
            .unwrap();

        let rows = s.rows("coins");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["id"], 3);
        assert_eq!(rows[0]["coin_base"], "BTC");
        assert_eq!(rows[0]["coingecko_id"], "bitcoin");
    }

    #[tokio::test]
    async fn scripted_failure_applies_once() {
        let s = store();
        s.fail_next(FetchError::RateLimited { retry_after_ms: None });
        assert!(s.select("coins", "*", &[]).await.unwrap_err().is_rate_limited());
        assert_eq!(s.select("coins", "*", &[]).await.unwrap().len(), 2);
    }
}
