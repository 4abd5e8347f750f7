//! Coinbase endpoints: the paginated USD asset listing that seeds the coins
//! table, and per-currency descriptions.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::{CoinfetchError, FetchError, check_status};

pub const API_URL: &str = "https://api.coinbase.com";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetPrice {
    pub base: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
}

/// One page of `GET /v2/assets/prices`.
#[derive(Debug, Deserialize)]
pub struct PricesPage {
    #[serde(default)]
    pub data: Vec<AssetPrice>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next_uri: Option<String>,
}

impl PricesPage {
    /// Relative URI of the following page, if there is one.
    pub fn next_uri(&self) -> Option<&str> {
        self.pagination.as_ref()?.next_uri.as_deref()
    }
}

/// `data` of `GET /v2/currencies/{symbol}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Currency {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
struct CurrencyEnvelope {
    data: Currency,
}

pub struct CoinbaseClient {
    client: Client,
    base_url: String,
}

impl CoinbaseClient {
    pub fn with_base_url(base_url: &str) -> Result<Self, CoinfetchError> {
        let client = Client::builder()
            .user_agent(concat!("coinfetch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Absolute URL of the first USD price listing page.
    pub fn first_prices_url(&self) -> String {
        format!("{}/v2/assets/prices?base=USD", self.base_url)
    }

    /// Absolute URL for a `next_uri` handed back by a page.
    pub fn resolve(&self, uri: &str) -> String {
        format!("{}{uri}", self.base_url)
    }

    pub async fn prices_page(&self, url: &str) -> Result<PricesPage, FetchError> {
        let response = self.client.get(url).send().await?;
        Ok(check_status(response).await?.json::<PricesPage>().await?)
    }

    pub async fn currency(&self, symbol: &str) -> Result<Currency, FetchError> {
        let url = format!("{}/v2/currencies/{}", self.base_url, symbol.to_lowercase());
        let response = self.client.get(url).send().await?;
        let envelope = check_status(response).await?.json::<CurrencyEnvelope>().await?;
        Ok(envelope.data)
    }
}

// Later entries replace earlier ones but keep the first position.
pub fn dedup_by_base(assets: Vec<AssetPrice>) -> Vec<AssetPrice> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<AssetPrice> = Vec::with_capacity(assets.len());
    for asset in assets {
        match index.get(&asset.base) {
            Some(&i) => out[i] = asset,
            None => {
                index.insert(asset.base.clone(), out.len());
                out.push(asset);
            }
        }
    }
    out
}
