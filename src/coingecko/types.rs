//! Response shapes for the CoinGecko v3 endpoints the jobs use.

use serde::{Deserialize, Serialize};

/// `GET /search?query=…`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub coins: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
}

/// One entry of `GET /coins/list`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListedCoin {
    pub id: String,
    pub symbol: String,
    pub name: String,
}

/// One entry of `GET /coins/markets`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketEntry {
    pub id: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
}

/// `GET /coins/{id}`, only the fields we read.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinDetail {
    pub id: String,
    pub name: String,
}

/// `GET /coins/{id}/market_chart`: `[unix_ms, value]` pairs, oldest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketChart {
    #[serde(default)]
    pub prices: Vec<[f64; 2]>,
    #[serde(default)]
    pub market_caps: Vec<[f64; 2]>,
    #[serde(default)]
    pub total_volumes: Vec<[f64; 2]>,
}

/// Price summary shown in the coin table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub current_price: f64,
    pub change_24h_pct: f64,
    pub change_7d_pct: f64,
    pub volume: f64,
    pub market_cap: f64,
}

// Hourly points at the 30-day granularity.
const POINTS_PER_DAY: usize = 24;

impl MarketChart {
    /// Derive a [`Quote`] from hourly data. `None` if there is less than a
    /// week of points or the reference prices are zero.
    pub fn quote(&self) -> Option<Quote> {
        let current = last_value(&self.prices)?;
        let day_ago = value_back(&self.prices, POINTS_PER_DAY)?;
        let week_ago = value_back(&self.prices, POINTS_PER_DAY * 7)?;
        Some(Quote {
            current_price: current,
            change_24h_pct: percent_change(current, day_ago)?,
            change_7d_pct: percent_change(current, week_ago)?,
            volume: last_value(&self.total_volumes).unwrap_or(0.0),
            market_cap: last_value(&self.market_caps).unwrap_or(0.0),
        })
    }
}

fn last_value(series: &[[f64; 2]]) -> Option<f64> {
    series.last().map(|p| p[1])
}

// The point `n` positions from the end, counting the last point as 1.
fn value_back(series: &[[f64; 2]], n: usize) -> Option<f64> {
    series.len().checked_sub(n).map(|i| series[i][1])
}

fn percent_change(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    let pct = (current - previous) / previous * 100.0;
    Some((pct * 100.0).round() / 100.0)
}
