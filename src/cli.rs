//! Command-line interface for coinfetch, built on clap.
//!
//! One subcommand per maintenance job plus global flags that override the
//! queue and retry settings from `coinfetch.toml`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{CoinfetchConfig, DEFAULT_CONFIG_PATH};

/// coinfetch: keep the coins table in sync with CoinGecko and Coinbase.
#[derive(Debug, Parser)]
#[command(name = "coinfetch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Milliseconds between two queued API calls.
    #[arg(long, global = true)]
    pub delay_ms: Option<u64>,

    /// Retries on HTTP 429 before an item gives up.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Print the batch report as JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fill in missing logo URLs from CoinGecko market data.
    Icons,

    /// Refresh coin names from CoinGecko.
    Names,

    /// Backfill market cap ranks (and missing logos) in batched lookups.
    Ranks,

    /// Write a short Coinbase currency description into scraped_content.
    Content,

    /// Re-resolve duplicated CoinGecko ids by searching coin names.
    Ids,

    /// Re-resolve duplicated CoinGecko ids by matching exchange symbols.
    Symbols,

    /// Upsert the assets Coinbase prices in USD.
    Import {
        /// Maximum number of assets to import.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print current price, 24h and 7d change for every tracked coin.
    Prices {
        /// Days of market history to fetch.
        #[arg(long)]
        days: Option<u32>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Icons => "icons",
            Command::Names => "names",
            Command::Ranks => "ranks",
            Command::Content => "content",
            Command::Ids => "ids",
            Command::Symbols => "symbols",
            Command::Import { .. } => "import",
            Command::Prices { .. } => "prices",
        }
    }
}

impl Cli {
    /// Flags take precedence over the file and environment.
    pub fn apply_overrides(&self, config: &mut CoinfetchConfig) {
        if let Some(ms) = self.delay_ms {
            config.inter_item_delay_ms = ms;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        match self.command {
            Command::Import { limit: Some(limit) } => config.import_limit = limit,
            Command::Prices { days: Some(days) } => config.chart_days = days,
            _ => {}
        }
    }
}
