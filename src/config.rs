//! coinfetch configuration loaded from `coinfetch.toml`.
//!
//! Values missing from the file fall back to defaults. Environment variables
//! (optionally from a `.env` file) take precedence for endpoints and the
//! Supabase credentials, and CLI flags take precedence over both for the
//! queue knobs.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::CoinfetchError;
use crate::queue::QueueConfig;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "coinfetch.toml";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct CoinfetchConfig {
    /// Supabase project URL, e.g. `https://xyz.supabase.co`.
    #[serde(default)]
    pub supabase_url: String,

    /// Supabase anon or service key.
    #[serde(default)]
    pub supabase_key: Option<SecretString>,

    #[serde(default = "default_coingecko_url")]
    pub coingecko_url: String,

    #[serde(default = "default_coinbase_url")]
    pub coinbase_url: String,

    /// Minimum gap between two queued calls.
    #[serde(default = "default_inter_item_delay_ms")]
    pub inter_item_delay_ms: u64,

    /// Retries on HTTP 429 after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_ceiling_ms")]
    pub backoff_ceiling_ms: u64,

    /// Most assets the Coinbase import will upsert.
    #[serde(default = "default_import_limit")]
    pub import_limit: usize,

    /// Pause between Coinbase listing pages.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Gap between Coinbase currency lookups in the content job.
    #[serde(default = "default_content_delay_ms")]
    pub content_delay_ms: u64,

    /// History window for the price table.
    #[serde(default = "default_chart_days")]
    pub chart_days: u32,
}

fn default_coingecko_url() -> String {
    crate::coingecko::client::API_URL.to_string()
}

fn default_coinbase_url() -> String {
    crate::coinbase::API_URL.to_string()
}

fn default_inter_item_delay_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_backoff_ceiling_ms() -> u64 {
    60_000
}

fn default_import_limit() -> usize {
    500
}

fn default_page_delay_ms() -> u64 {
    1000
}

fn default_content_delay_ms() -> u64 {
    3000
}

fn default_chart_days() -> u32 {
    30
}

impl Default for CoinfetchConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_key: None,
            coingecko_url: default_coingecko_url(),
            coinbase_url: default_coinbase_url(),
            inter_item_delay_ms: default_inter_item_delay_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_ceiling_ms: default_backoff_ceiling_ms(),
            import_limit: default_import_limit(),
            page_delay_ms: default_page_delay_ms(),
            content_delay_ms: default_content_delay_ms(),
            chart_days: default_chart_days(),
        }
    }
}

impl CoinfetchConfig {
    /// Load `path` (defaults when it does not exist), then apply the process
    /// environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<CoinfetchConfig>(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Override from environment lookups. The `REACT_APP_` names are what the
    /// site's own `.env` files use.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|&n| lookup(n))
                .find(|v| !v.is_empty())
        };
        if let Some(url) = first(&["SUPABASE_URL", "REACT_APP_SUPABASE_URL"]) {
            self.supabase_url = url;
        }
        if let Some(key) = first(&["SUPABASE_ANON_KEY", "REACT_APP_SUPABASE_ANON_KEY"]) {
            self.supabase_key = Some(SecretString::from(key));
        }
        if let Some(url) = first(&["COINGECKO_BASE_URL"]) {
            self.coingecko_url = url;
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            inter_item_delay: Duration::from_millis(self.inter_item_delay_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            backoff_ceiling: Duration::from_millis(self.backoff_ceiling_ms),
        }
    }

    /// Supabase URL and key, or a config error naming what is missing.
    pub fn supabase_credentials(&self) -> Result<(&str, &SecretString), CoinfetchError> {
        if self.supabase_url.is_empty() {
            return Err(CoinfetchError::Config(
                "SUPABASE_URL (or supabase_url in coinfetch.toml) is required".into(),
            ));
        }
        let key = self.supabase_key.as_ref().ok_or_else(|| {
            CoinfetchError::Config("SUPABASE_ANON_KEY (or supabase_key in coinfetch.toml) is required".into())
        })?;
        Ok((self.supabase_url.as_str(), key))
    }
}
