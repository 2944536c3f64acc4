//! In-process keyed work queue
//!
//! Delivers opaque object keys to a reconcile function without a watch.
//! At most one invocation per key is in flight; a key delivered again while
//! it is running is coalesced and run once more afterwards. Different keys
//! run concurrently. Failed invocations are redelivered after a fixed
//! backoff until `max_attempts` is reached.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Retry settings for a [`WorkQueue`]
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Invocations per key before the key is dropped, including the first
    pub max_attempts: u32,
    /// Delay before a failed key is delivered again
    pub retry_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Counters collected while draining a queue
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Invocations that returned `Ok`
    pub succeeded: usize,
    /// Invocations that returned `Err`
    pub failed: usize,
    /// Keys abandoned after exhausting their attempts
    pub dropped: Vec<String>,
}

/// Producer side of a [`WorkQueue`]
#[derive(Clone, Debug)]
pub struct KeySender {
    tx: mpsc::UnboundedSender<String>,
}

impl KeySender {
    /// Deliver `key`; returns false once the queue has stopped
    pub fn enqueue(&self, key: impl Into<String>) -> bool {
        self.tx.send(key.into()).is_ok()
    }
}

/// Consumer side of a keyed work queue
pub struct WorkQueue {
    rx: mpsc::UnboundedReceiver<String>,
    config: QueueConfig,
}

impl WorkQueue {
    /// Create a queue and its sender
    pub fn new(config: QueueConfig) -> (KeySender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (KeySender { tx }, Self { rx, config })
    }

    /// Process keys until every sender is dropped and all work has settled
    pub async fn run<F, Fut, E>(mut self, reconcile: F) -> QueueStats
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut stats = QueueStats::default();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut dirty: HashSet<String> = HashSet::new();
        let mut attempts: HashMap<String, u32> = HashMap::new();
        let mut running: JoinSet<(String, Result<(), E>)> = JoinSet::new();
        let mut backoff: JoinSet<String> = JoinSet::new();
        let mut open = true;

        let dispatch = |key: String,
                        in_flight: &mut HashSet<String>,
                        dirty: &mut HashSet<String>,
                        running: &mut JoinSet<(String, Result<(), E>)>| {
            if in_flight.contains(&key) {
                debug!(key = %key, "Key already in flight, coalescing");
                dirty.insert(key);
                return;
            }
            in_flight.insert(key.clone());
            let fut = reconcile(key.clone());
            running.spawn(async move { (key, fut.await) });
        };

        loop {
            if !open && running.is_empty() && backoff.is_empty() {
                break;
            }

            tokio::select! {
                received = self.rx.recv(), if open => match received {
                    Some(key) => dispatch(key, &mut in_flight, &mut dirty, &mut running),
                    None => open = false,
                },
                Some(joined) = running.join_next() => {
                    let (key, result) = match joined {
                        Ok(done) => done,
                        Err(e) => {
                            error!(error = %e, "Reconcile task panicked");
                            continue;
                        }
                    };
                    in_flight.remove(&key);

                    match result {
                        Ok(()) => {
                            stats.succeeded += 1;
                            attempts.remove(&key);
                        }
                        Err(e) => {
                            stats.failed += 1;
                            let tries = attempts.entry(key.clone()).or_insert(0);
                            *tries += 1;
                            if *tries < self.config.max_attempts {
                                warn!(key = %key, attempt = *tries, error = %e, "Reconcile failed, retrying");
                                let delay = self.config.retry_backoff;
                                let retry_key = key.clone();
                                backoff.spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    retry_key
                                });
                            } else {
                                error!(key = %key, attempts = *tries, error = %e, "Reconcile failed, giving up");
                                attempts.remove(&key);
                                stats.dropped.push(key.clone());
                            }
                        }
                    }

                    if dirty.remove(&key) {
                        dispatch(key, &mut in_flight, &mut dirty, &mut running);
                    }
                },
                Some(Ok(key)) = backoff.join_next() => {
                    dispatch(key, &mut in_flight, &mut dirty, &mut running);
                },
                else => break,
            }
        }

        stats
    }
}
