//! Serial, rate-limited execution of outbound calls.
//!
//! [`RateLimitedFetchQueue`] runs queued work items one at a time in FIFO
//! order, spacing them by a fixed delay. A single drain task is spawned on
//! demand and exits when the queue empties; producers that need the whole
//! batch finished await [`RateLimitedFetchQueue::wait_idle`].
//!
//! Retries are not the queue's business. An item that is throttled backs off
//! and retries inside its own future (see [`crate::retry`]), so the backoff
//! adds to the inter-item delay rather than replacing it.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error};

/// One deferred external call plus its side effect.
pub type WorkItem = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Minimum gap between the end of one item and the start of the next.
    pub inter_item_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inter_item_delay: Duration::from_millis(500),
        }
    }
}

struct QueueState {
    pending: VecDeque<WorkItem>,
    active: bool,
    last_finished: Option<Instant>,
}

struct Shared {
    config: QueueConfig,
    state: Mutex<QueueState>,
    // true while no drain loop is running and nothing is pending.
    idle_tx: watch::Sender<bool>,
}

impl Shared {
    // Never held across an await; a poisoned lock still has consistent state.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a queue. Clones share the same pending set and drain loop.
#[derive(Clone)]
pub struct RateLimitedFetchQueue {
    shared: Arc<Shared>,
}

impl RateLimitedFetchQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (idle_tx, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    active: false,
                    last_finished: None,
                }),
                idle_tx,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Append `item` and start the drain loop if none is running.
    ///
    /// Returns without waiting for anything to execute. Must be called from
    /// inside a tokio runtime.
    pub fn enqueue<F>(&self, item: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.shared.lock();
        state.pending.push_back(Box::pin(item));
        if state.active {
            return;
        }
        state.active = true;
        self.shared.idle_tx.send_replace(false);
        drop(state);

        debug!("starting drain loop");
        tokio::spawn(drain(Arc::clone(&self.shared)));
    }

    /// Items waiting to run (excludes the one executing).
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    /// Resolves once no drain loop is active and nothing is pending.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.idle_tx.subscribe();
        // The sender lives in `self.shared`, so the channel cannot close here.
        let _ = rx.wait_for(|idle| *idle).await;
    }
}

async fn drain(shared: Arc<Shared>) {
    let delay = shared.config.inter_item_delay;
    loop {
        let (item, not_before) = {
            let mut state = shared.lock();
            match state.pending.pop_front() {
                Some(item) => (item, state.last_finished.map(|at| at + delay)),
                None => {
                    state.active = false;
                    shared.idle_tx.send_replace(true);
                    debug!("queue drained");
                    return;
                }
            }
        };

        if let Some(deadline) = not_before {
            sleep_until(deadline).await;
        }

        // Run in its own task so a panicking item cannot take the loop down.
        if let Err(err) = tokio::spawn(item).await {
            error!(error = %err, "work item aborted");
        }

        shared.lock().last_finished = Some(Instant::now());
    }
}
