//! coinfetch
//!
//! Maintenance of the crypto IRA site's coin records. All calls to the
//! rate-limited market-data APIs go through one
//! [`queue::RateLimitedFetchQueue`]: one call at a time, a fixed gap between
//! calls, exponential backoff on HTTP 429 inside each item.
//!
//! - **queue**: serial FIFO work queue with a completion signal
//! - **retry**: bounded backoff loop and the retry policy
//! - **coingecko** / **coinbase**: market-data clients
//! - **store**: select/update/upsert over the `coins` table (Supabase, in-memory)
//! - **jobs**: the maintenance jobs built on the above
//! - **cli** / **config** / **ui**: the binary's surface

pub mod cli;
pub mod coin;
pub mod coinbase;
pub mod coingecko;
pub mod config;
pub mod error;
pub mod jobs;
pub mod queue;
pub mod retry;
pub mod store;
pub mod ui;

pub use error::{CoinfetchError, FetchError};
pub use queue::{QueueConfig, RateLimitedFetchQueue, WorkItem};
pub use retry::{RetryOutcome, RetryPolicy};
