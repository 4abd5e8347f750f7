use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{CoinStore, Filter};
use crate::error::{CoinfetchError, FetchError, check_status};

/// PostgREST client for a Supabase project.
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl SupabaseStore {
    pub fn new(base_url: &str, api_key: SecretString) -> Result<Self, CoinfetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let key = self.api_key.expose_secret();
        req.header("apikey", key).bearer_auth(key)
    }
}

fn filter_query(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(Filter::to_query).collect()
}

#[async_trait]
impl CoinStore for SupabaseStore {
    async fn select(&self, table: &str, columns: &str, filters: &[Filter]) -> Result<Vec<Value>, FetchError> {
        let response = self
            .authed(self.client.get(self.endpoint(table)))
            .query(&[("select", columns)])
            .query(&filter_query(filters))
            .send()
            .await?;
        let rows = check_status(response).await?.json::<Vec<Value>>().await?;
        Ok(rows)
    }

    async fn update(&self, table: &str, fields: &Value, filters: &[Filter]) -> Result<(), FetchError> {
        let response = self
            .authed(self.client.patch(self.endpoint(table)))
            .query(&filter_query(filters))
            .header("Prefer", "return=minimal")
            .json(fields)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn upsert(&self, table: &str, row: &Value, on_conflict: &str) -> Result<(), FetchError> {
        let response = self
            .authed(self.client.post(self.endpoint(table)))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_for(server: &MockServer) -> SupabaseStore {
        SupabaseStore::new(&format!("{}/", server.uri()), SecretString::from("anon-key")).unwrap()
    }

    #[tokio::test]
    async fn select_sends_filters_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/coins"))
            .and(query_param("select", "id,coingecko_id"))
            .and(query_param("logo_url", "is.null"))
            .and(query_param("coingecko_id", "not.is.null"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "coingecko_id": "bitcoin"}])))
            .expect(1)
            .mount(&server)
            .await;

        let rows = store_for(&server)
            .await
            .select(
                "coins",
                "id,coingecko_id",
                &[Filter::is_null("logo_url"), Filter::not_null("coingecko_id")],
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"id": 1, "coingecko_id": "bitcoin"})]);
    }

    #[tokio::test]
    async fn update_patches_matching_rows() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/coins"))
            .and(query_param("coingecko_id", "eq.bitcoin"))
            .and(body_json(json!({"logo_url": "btc.png"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server)
            .await
            .update("coins", &json!({"logo_url": "btc.png"}), &[Filter::eq("coingecko_id", "bitcoin")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upsert_merges_on_conflict_column() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/coins"))
            .and(query_param("on_conflict", "coin_name"))
            .and(header_exists("prefer"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server)
            .await
            .upsert("coins", &json!({"coin_name": "BTC"}), "coin_name")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn throttled_write_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let err = store_for(&server)
            .await
            .update("coins", &json!({}), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { retry_after_ms: Some(2000) }));
    }

    #[tokio::test]
    async fn server_error_is_other() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
            .mount(&server)
            .await;

        let err = store_for(&server).await.select("coins", "*", &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Other(ref msg) if msg.contains("db down")));
    }
}
