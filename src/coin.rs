//! Coin records as stored in the `coins` table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const COINS_TABLE: &str = "coins";

const COINGECKO_PUBLIC_API: &str = "https://api.coingecko.com/api/v3";

/// A row of the `coins` table. Columns the jobs never read are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub id: i64,
    #[serde(default)]
    pub coin_name: Option<String>,
    #[serde(default)]
    pub coin_base: Option<String>,
    #[serde(default)]
    pub coingecko_id: Option<String>,
    #[serde(default)]
    pub coingecko_graph_endpoint: Option<String>,
    #[serde(default)]
    pub coinbase_product_id: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
}

impl Coin {
    /// Best human label for logs.
    pub fn label(&self) -> String {
        self.coin_name
            .clone()
            .or_else(|| self.coingecko_id.clone())
            .unwrap_or_else(|| format!("#{}", self.id))
    }
}

/// Decode rows returned by a `select` on the coins table.
pub fn coins_from_rows(rows: Vec<Value>) -> Result<Vec<Coin>, serde_json::Error> {
    rows.into_iter().map(serde_json::from_value).collect()
}

/// The public market-chart URL the site's price widgets read.
pub fn graph_endpoint(coingecko_id: &str) -> String {
    format!("{COINGECKO_PUBLIC_API}/coins/{coingecko_id}/market_chart")
}

/// Partial update of a coin row; unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoinPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coingecko_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coingecko_graph_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap_rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraped_content: Option<String>,
}

impl CoinPatch {
    pub fn logo_url(url: impl Into<String>) -> Self {
        Self {
            logo_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn coin_name(name: impl Into<String>) -> Self {
        Self {
            coin_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets the CoinGecko id together with its matching graph endpoint.
    pub fn coingecko_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            coingecko_graph_endpoint: Some(graph_endpoint(&id)),
            coingecko_id: Some(id),
            ..Self::default()
        }
    }

    /// Market cap rank, plus the logo when the row has none yet.
    pub fn ranking(rank: u32, logo_url: Option<String>) -> Self {
        Self {
            market_cap_rank: Some(rank),
            logo_url,
            ..Self::default()
        }
    }

    pub fn scraped_content(text: impl Into<String>) -> Self {
        Self {
            scraped_content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Row inserted for an asset listed on Coinbase, keyed by `coin_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCoin {
    pub coin_name: String,
    pub coin_base: String,
    pub coinbase_product_id: String,
}

impl NewCoin {
    pub fn from_base(base: &str) -> Self {
        Self {
            coin_name: base.to_string(),
            coin_base: base.to_string(),
            coinbase_product_id: format!("{base}-USD"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_partial_rows() {
        let coins = coins_from_rows(vec![
            json!({"id": 1, "coingecko_id": "bitcoin"}),
            json!({"id": 2, "coin_name": "Ether", "ai_content": "ignored", "logo_url": null}),
        ])
        .unwrap();
        assert_eq!(coins[0].coingecko_id.as_deref(), Some("bitcoin"));
        assert_eq!(coins[0].label(), "bitcoin");
        assert_eq!(coins[1].label(), "Ether");
        assert!(coins[1].logo_url.is_none());
    }

    #[test]
    fn label_falls_back_to_id() {
        let coin = coins_from_rows(vec![json!({"id": 7})]).unwrap().remove(0);
        assert_eq!(coin.label(), "#7");
    }

    #[test]
    fn patch_serializes_only_set_fields() {
        assert_eq!(
            CoinPatch::logo_url("https://img/btc.png").to_value(),
            json!({"logo_url": "https://img/btc.png"})
        );
        assert_eq!(
            CoinPatch::coingecko_id("solana").to_value(),
            json!({
                "coingecko_id": "solana",
                "coingecko_graph_endpoint": "https://api.coingecko.com/api/v3/coins/solana/market_chart"
            })
        );
    }

    #[test]
    fn ranking_patch_leaves_logo_out_when_absent() {
        assert_eq!(CoinPatch::ranking(12, None).to_value(), json!({"market_cap_rank": 12}));
        assert_eq!(
            CoinPatch::ranking(3, Some("https://img/eth.png".into())).to_value(),
            json!({"market_cap_rank": 3, "logo_url": "https://img/eth.png"})
        );
    }

    #[test]
    fn new_coin_from_coinbase_base() {
        let row = NewCoin::from_base("ADA");
        assert_eq!(row.coinbase_product_id, "ADA-USD");
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            json!({"coin_name": "ADA", "coin_base": "ADA", "coinbase_product_id": "ADA-USD"})
        );
    }
}
