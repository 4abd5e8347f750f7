//! Data-store contract for coin records.
//!
//! [`CoinStore`] is the narrow select/update/upsert surface the maintenance
//! jobs need. [`SupabaseStore`] talks to PostgREST; [`MemoryStore`] keeps rows
//! in a map for tests and dry runs. Both report failures with the same
//! [`FetchError`] taxonomy as the market-data clients, so a throttled write is
//! retried like a throttled read.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use serde_json::Value;

use crate::coin::{COINS_TABLE, Coin, coins_from_rows};
use crate::error::{CoinfetchError, FetchError};

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

/// Row filter, ANDed together when several are given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, String),
    IsNull(String),
    NotNull(String),
}

impl Filter {
    pub fn eq(column: &str, value: impl ToString) -> Self {
        Filter::Eq(column.to_string(), value.to_string())
    }

    pub fn is_null(column: &str) -> Self {
        Filter::IsNull(column.to_string())
    }

    pub fn not_null(column: &str) -> Self {
        Filter::NotNull(column.to_string())
    }

    /// PostgREST query parameter, e.g. `("coingecko_id", "eq.bitcoin")`.
    pub fn to_query(&self) -> (String, String) {
        match self {
            Filter::Eq(col, val) => (col.clone(), format!("eq.{val}")),
            Filter::IsNull(col) => (col.clone(), "is.null".to_string()),
            Filter::NotNull(col) => (col.clone(), "not.is.null".to_string()),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Eq(col, val) => match row.get(col) {
                Some(Value::String(s)) => s == val,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == *val,
            },
            Filter::IsNull(col) => row.get(col).is_none_or(Value::is_null),
            Filter::NotNull(col) => row.get(col).is_some_and(|v| !v.is_null()),
        }
    }
}

#[async_trait]
pub trait CoinStore: Send + Sync {
    /// `columns` is a PostgREST select list (`"*"` or `"id,coin_name"`).
    async fn select(&self, table: &str, columns: &str, filters: &[Filter]) -> Result<Vec<Value>, FetchError>;

    async fn update(&self, table: &str, fields: &Value, filters: &[Filter]) -> Result<(), FetchError>;

    /// Insert `row`, or merge it into the row with the same `on_conflict` value.
    async fn upsert(&self, table: &str, row: &Value, on_conflict: &str) -> Result<(), FetchError>;
}

/// Select and decode coin rows.
pub async fn select_coins(
    store: &dyn CoinStore,
    columns: &str,
    filters: &[Filter],
) -> Result<Vec<Coin>, CoinfetchError> {
    let rows = store.select(COINS_TABLE, columns, filters).await?;
    Ok(coins_from_rows(rows)?)
}
