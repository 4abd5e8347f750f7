use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

use super::types::{CoinDetail, ListedCoin, MarketChart, MarketEntry, SearchResponse};
use crate::error::{CoinfetchError, FetchError, check_status};

pub const API_URL: &str = "https://api.coingecko.com/api/v3";

/// Most ids `/coins/markets` returns in one page.
pub const MARKETS_PAGE: usize = 250;

pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

impl CoinGeckoClient {
    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(base_url: &str) -> Result<Self, CoinfetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, FetchError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .send()
            .await?;
        let body = check_status(response).await?.json::<T>().await?;
        Ok(body)
    }

    /// First search hit's id for `query`, if any.
    pub async fn search(&self, query: &str) -> Result<Option<String>, FetchError> {
        let body: SearchResponse = self.get_json("/search", &[("query", query)]).await?;
        Ok(body.coins.into_iter().next().map(|hit| hit.id))
    }

    pub async fn coins_list(&self) -> Result<Vec<ListedCoin>, FetchError> {
        self.get_json("/coins/list", &[]).await
    }

    /// USD market entries for up to [`MARKETS_PAGE`] ids in one call.
    pub async fn markets(&self, coingecko_ids: &[String]) -> Result<Vec<MarketEntry>, FetchError> {
        let ids = coingecko_ids.join(",");
        let per_page = MARKETS_PAGE.to_string();
        self.get_json(
            "/coins/markets",
            &[("vs_currency", "usd"), ("ids", ids.as_str()), ("per_page", per_page.as_str())],
        )
        .await
    }

    /// Logo URL from the USD markets listing.
    pub async fn market_image(&self, coingecko_id: &str) -> Result<Option<String>, FetchError> {
        let entries: Vec<MarketEntry> = self
            .get_json("/coins/markets", &[("vs_currency", "usd"), ("ids", coingecko_id)])
            .await?;
        Ok(entries.into_iter().next().and_then(|e| e.image))
    }

    pub async fn coin_name(&self, coingecko_id: &str) -> Result<String, FetchError> {
        let detail: CoinDetail = self.get_json(&format!("/coins/{coingecko_id}"), &[]).await?;
        Ok(detail.name)
    }

    pub async fn market_chart(&self, coingecko_id: &str, days: u32) -> Result<MarketChart, FetchError> {
        let days = days.to_string();
        self.get_json(
            &format!("/coins/{coingecko_id}/market_chart"),
            &[("vs_currency", "usd"), ("days", days.as_str())],
        )
        .await
    }
}
