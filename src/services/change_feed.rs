//! Resilient wrapper around a single document-store subscription.
//!
//! A [`ChangeFeed`] owns a background task that subscribes to one document or collection,
//! forwards every snapshot to a callback and resubscribes with exponential backoff when the
//! stream breaks. Its lifecycle is observable through a `watch` channel:
//! `Idle -> Subscribed -> Retrying -> Failed`, plus `Stopped` once the handle is stopped or
//! dropped. This is the only place that calls `DocumentStore::subscribe_*`.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{FutureExt, StreamExt};
use tokio::{
    sync::{Notify, watch},
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::FeedConfig,
    dao::{
        document_store::{ChangeStream, DocumentStore, FeedEvent, FeedTarget},
        storage::{StorageError, StorageResult},
    },
};

/// Observable state of a [`ChangeFeed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    /// Task spawned, first subscription not established yet.
    Idle,
    /// Stream open and delivering snapshots.
    Subscribed,
    /// Waiting before resubscription attempt `attempt` (1-based).
    Retrying { attempt: u32 },
    /// Gave up; only [`ChangeFeed::restart`] or [`ChangeFeed::stop`] leave this state.
    Failed { reason: String },
    /// Stopped by the owner.
    Stopped,
}

/// Backoff policy of a feed.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub stale_after: Duration,
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): the base delay doubled per attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&FeedConfig> for RetryPolicy {
    fn from(config: &FeedConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts,
            stale_after: config.stale_after(),
        }
    }
}

type Callback = Arc<dyn Fn(FeedEvent) + Send + Sync>;

/// Handle to a running subscription. Dropping the handle stops the feed.
pub struct ChangeFeed {
    target: FeedTarget,
    status: watch::Receiver<FeedStatus>,
    last_update: Arc<Mutex<Option<Instant>>>,
    cancel: CancellationToken,
    restart: Arc<Notify>,
    stale_after: Duration,
}

/// Everything the background task owns.
struct FeedWorker {
    store: Arc<dyn DocumentStore>,
    target: FeedTarget,
    policy: RetryPolicy,
    callback: Callback,
    status: watch::Sender<FeedStatus>,
    last_update: Arc<Mutex<Option<Instant>>>,
    cancel: CancellationToken,
    restart: Arc<Notify>,
}

/// Why a subscription round ended.
enum RoundEnd {
    Cancelled,
    Restarted,
    Broken(StorageError),
}

impl ChangeFeed {
    /// Subscribe to `target` and invoke `callback` with every snapshot.
    pub fn spawn<F>(
        store: Arc<dyn DocumentStore>,
        target: FeedTarget,
        policy: RetryPolicy,
        callback: F,
    ) -> Self
    where
        F: Fn(FeedEvent) + Send + Sync + 'static,
    {
        let (status_tx, status_rx) = watch::channel(FeedStatus::Idle);
        let last_update = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();
        let restart = Arc::new(Notify::new());

        let worker = FeedWorker {
            store,
            target: target.clone(),
            policy,
            callback: Arc::new(callback),
            status: status_tx,
            last_update: last_update.clone(),
            cancel: cancel.clone(),
            restart: restart.clone(),
        };
        tokio::spawn(worker.run());

        Self {
            target,
            status: status_rx,
            last_update,
            cancel,
            restart,
            stale_after: policy.stale_after,
        }
    }

    pub fn target(&self) -> &FeedTarget {
        &self.target
    }

    /// Current status.
    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status transitions.
    pub fn status_watcher(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    /// Subscribed and delivered an update within the staleness window.
    pub fn is_healthy(&self) -> bool {
        if *self.status.borrow() != FeedStatus::Subscribed {
            return false;
        }
        lock(&self.last_update)
            .map(|at| at.elapsed() <= self.stale_after)
            .unwrap_or(false)
    }

    /// Force a fresh subscription with a full retry budget, including from `Failed`.
    pub fn restart(&self) {
        self.restart.notify_one();
    }

    /// Cancel the subscription and any pending retry.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl FeedWorker {
    async fn run(self) {
        let path = self.target.path().to_string();
        let mut attempt: u32 = 0;

        loop {
            let end = match self.open().await {
                Some(Ok(stream)) => {
                    // A restart requested while subscribing is served by this stream.
                    let _ = self.restart.notified().now_or_never();
                    self.consume(stream, &mut attempt).await
                }
                Some(Err(err)) => RoundEnd::Broken(err),
                None => RoundEnd::Cancelled,
            };

            let err = match end {
                RoundEnd::Cancelled => break,
                RoundEnd::Restarted => {
                    info!(path = %path, "change feed restarted");
                    attempt = 0;
                    continue;
                }
                RoundEnd::Broken(err) => err,
            };

            if !err.is_retryable() {
                error!(path = %path, error = %err, "change feed failed with a fatal error");
                if self.park_failed(err.to_string()).await {
                    attempt = 0;
                    continue;
                }
                break;
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                error!(
                    path = %path,
                    attempts = self.policy.max_attempts,
                    error = %err,
                    "change feed exhausted its retries"
                );
                if self.park_failed(err.to_string()).await {
                    attempt = 0;
                    continue;
                }
                break;
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                path = %path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "change feed interrupted; retrying"
            );
            self.status.send_replace(FeedStatus::Retrying { attempt });

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.restart.notified() => attempt = 0,
                _ = sleep(delay) => {}
            }
        }

        self.status.send_replace(FeedStatus::Stopped);
        debug!(path = %path, "change feed stopped");
    }

    /// Open the underlying subscription; `None` when cancelled meanwhile.
    async fn open(&self) -> Option<StorageResult<ChangeStream>> {
        let subscribe = match &self.target {
            FeedTarget::Document(path) => self.store.subscribe_document(path),
            FeedTarget::Collection(path) => self.store.subscribe_collection(path),
        };
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = subscribe => Some(result),
        }
    }

    async fn consume(&self, mut stream: ChangeStream, attempt: &mut u32) -> RoundEnd {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return RoundEnd::Cancelled,
                _ = self.restart.notified() => return RoundEnd::Restarted,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if *attempt > 0 {
                        info!(path = %self.target.path(), "change feed recovered");
                    }
                    *attempt = 0;
                    *lock(&self.last_update) = Some(Instant::now());
                    self.status.send_if_modified(|status| {
                        if *status == FeedStatus::Subscribed {
                            false
                        } else {
                            *status = FeedStatus::Subscribed;
                            true
                        }
                    });
                    (self.callback)(event);
                }
                Some(Err(err)) => return RoundEnd::Broken(err),
                None => {
                    return RoundEnd::Broken(StorageError::SubscriptionClosed(
                        self.target.path().to_string(),
                    ));
                }
            }
        }
    }

    /// Publish `Failed` and wait; `true` when restarted, `false` when cancelled.
    async fn park_failed(&self, reason: String) -> bool {
        self.status.send_replace(FeedStatus::Failed { reason });
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.restart.notified() => true,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
