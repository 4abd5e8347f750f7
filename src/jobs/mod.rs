//! Maintenance jobs over the coins table.
//!
//! Every job follows the same shape: select rows, enqueue one work item per
//! row on the shared [`RateLimitedFetchQueue`], wait for the queue to go
//! idle, and summarise in a [`BatchReport`]. Items never return errors; a
//! failed item shows up only in the logs and as a missing success in the
//! report's tally.

pub mod content;
pub mod icons;
pub mod ids;
pub mod import;
pub mod names;
pub mod prices;
pub mod ranks;
pub mod symbols;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::info;
use uuid::Uuid;

use crate::coin::{COINS_TABLE, CoinPatch};
use crate::coinbase::CoinbaseClient;
use crate::coingecko::CoinGeckoClient;
use crate::config::CoinfetchConfig;
use crate::error::CoinfetchError;
use crate::queue::RateLimitedFetchQueue;
use crate::retry::{RetryPolicy, retry_rate_limited};
use crate::store::{CoinStore, Filter, SupabaseStore};

/// Everything a job and its work items need. Cheap to clone into items.
#[derive(Clone)]
pub struct JobContext {
    pub queue: RateLimitedFetchQueue,
    pub retry: RetryPolicy,
    pub coingecko: Arc<CoinGeckoClient>,
    pub coinbase: Arc<CoinbaseClient>,
    pub store: Arc<dyn CoinStore>,
    pub import_limit: usize,
    pub page_delay: Duration,
    /// Gap between Coinbase currency lookups.
    pub content_delay: Duration,
    pub chart_days: u32,
}

impl JobContext {
    pub fn from_config(config: &CoinfetchConfig) -> Result<Self, CoinfetchError> {
        let (url, key) = config.supabase_credentials()?;
        Ok(Self {
            queue: RateLimitedFetchQueue::new(config.queue_config()),
            retry: config.retry_policy(),
            coingecko: Arc::new(CoinGeckoClient::with_base_url(&config.coingecko_url)?),
            coinbase: Arc::new(CoinbaseClient::with_base_url(&config.coinbase_url)?),
            store: Arc::new(SupabaseStore::new(url, key.clone())?),
            import_limit: config.import_limit,
            page_delay: Duration::from_millis(config.page_delay_ms),
            content_delay: Duration::from_millis(config.content_delay_ms),
            chart_days: config.chart_days,
        })
    }
}

/// Success counter shared by a batch's items.
#[derive(Debug, Default)]
pub struct Tally {
    succeeded: AtomicUsize,
}

impl Tally {
    pub fn record(&self, ok: bool) {
        if ok {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }
}

/// Summary printed when a job finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub job: String,
    pub enqueued: usize,
    pub succeeded: usize,
    /// Items that ended without effect: not found, failed, or exhausted.
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl BatchReport {
    pub fn new(job: &str, enqueued: usize, tally: &Tally, started_at: DateTime<Utc>) -> Self {
        let completed_at = Utc::now();
        let succeeded = tally.succeeded();
        Self {
            run_id: Uuid::new_v4(),
            job: job.to_string(),
            enqueued,
            succeeded,
            skipped: enqueued.saturating_sub(succeeded),
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        }
    }
}

/// Update matching coin rows, retrying while the store throttles.
pub(crate) async fn update_coins(
    store: &dyn CoinStore,
    policy: &RetryPolicy,
    label: &str,
    patch: &CoinPatch,
    filters: &[Filter],
) -> bool {
    let fields = patch.to_value();
    let outcome = retry_rate_limited(label, policy, || store.update(COINS_TABLE, &fields, filters)).await;
    if outcome.is_success() {
        info!(item = label, "updated coin");
    }
    outcome.is_success()
}

/// Run `fut` as a queue item and hand its value back to the caller.
pub(crate) async fn fetch_in_queue<T, Fut>(queue: &RateLimitedFetchQueue, fut: Fut) -> Option<T>
where
    T: Send + 'static,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    queue.enqueue(async move {
        // Receiver gone means the caller stopped caring.
        let _ = tx.send(fut.await);
    });
    rx.await.ok().flatten()
}
