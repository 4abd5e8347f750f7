pub mod client;
pub mod types;

pub use client::{CoinGeckoClient, MARKETS_PAGE};
pub use types::{ListedCoin, MarketChart, MarketEntry, Quote};
