//! Work queue and controller loop.
//!
//! Keys enter through a single unbounded channel. The loop keeps at most one
//! reconcile in flight per key: a key that arrives while it is being worked is
//! marked dirty and re-run once the current pass finishes. Delayed requeues
//! are timers that feed the same channel; for each key only the earliest
//! pending deadline is kept.
//!
//! Each pass runs in its own task so a panic is reported against its key: the
//! key leaves the in-flight set and is retried like a failed pass.

use crate::config::QueueConfig;
use crate::reconcile::{Action, ReconcileError, Reconciler};
use async_trait::async_trait;
use compgraph_core::ObjectKey;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Injected scheduler. The resolver never depends on a concrete queue.
pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, key: ObjectKey);
    fn enqueue_after(&self, key: ObjectKey, delay: Duration);
}

/// Something the controller can run for a key.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<Action, ReconcileError>;
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<Action, ReconcileError> {
        Reconciler::reconcile(self, key, cancel).await
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ControllerQueue {
    tx: mpsc::UnboundedSender<ObjectKey>,
    scheduled: Arc<DashMap<ObjectKey, Instant>>,
    cancel: CancellationToken,
}

impl ControllerQueue {
    /// Timers stop when `cancel` fires.
    pub fn new(cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<ObjectKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                scheduled: Arc::new(DashMap::new()),
                cancel,
            },
            rx,
        )
    }

    /// Keys with a pending delayed requeue.
    pub fn pending(&self) -> usize {
        self.scheduled.len()
    }
}

impl WorkQueue for ControllerQueue {
    fn enqueue(&self, key: ObjectKey) {
        if self.tx.send(key).is_err() {
            debug!("queue closed, dropping key");
        }
    }

    fn enqueue_after(&self, key: ObjectKey, delay: Duration) {
        let deadline = Instant::now() + delay;
        {
            let mut entry = self.scheduled.entry(key.clone()).or_insert(deadline);
            if *entry < deadline {
                return;
            }
            *entry = deadline;
        }

        let tx = self.tx.clone();
        let scheduled = Arc::clone(&self.scheduled);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    // A later enqueue_after may have moved the deadline earlier;
                    // only the timer that owns the stored deadline fires.
                    if scheduled.remove_if(&key, |_, d| *d == deadline).is_some() {
                        let _ = tx.send(key);
                    }
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub reconciled: usize,
    pub failed: usize,
}

type PassOutcome = (ObjectKey, Result<Result<Action, ReconcileError>, JoinError>);

pub struct Controller<R> {
    reconciler: Arc<R>,
    workers: usize,
    panic_retry: Duration,
}

impl<R: Reconcile> Controller<R> {
    pub fn new(reconciler: Arc<R>, workers: usize) -> Self {
        Self {
            reconciler,
            workers: workers.max(1),
            panic_retry: QueueConfig::default().default_interval,
        }
    }

    /// Requeue delay for a key whose pass panicked.
    pub fn with_panic_retry(mut self, delay: Duration) -> Self {
        self.panic_retry = delay;
        self
    }

    /// Run until `cancel` fires, then wait for in-flight passes to stop.
    pub async fn run(
        &self,
        queue: ControllerQueue,
        mut rx: mpsc::UnboundedReceiver<ObjectKey>,
        cancel: CancellationToken,
    ) -> ControllerStats {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<PassOutcome> = JoinSet::new();
        let mut in_flight: HashSet<ObjectKey> = HashSet::new();
        let mut dirty: HashSet<ObjectKey> = HashSet::new();
        let mut stats = ControllerStats::default();

        info!(workers = self.workers, "controller started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let Ok((key, outcome)) = joined else {
                        warn!("controller task aborted");
                        continue;
                    };
                    in_flight.remove(&key);
                    match outcome {
                        Ok(result) => self.finish(&queue, &key, result, &mut stats),
                        Err(e) => {
                            warn!(intent = %key, error = %e, retry_in = ?self.panic_retry, "reconcile panicked");
                            stats.failed += 1;
                            queue.enqueue_after(key.clone(), self.panic_retry);
                        }
                    }
                    if dirty.remove(&key) {
                        queue.enqueue(key);
                    }
                }
                received = rx.recv() => {
                    let Some(key) = received else { break };
                    if in_flight.contains(&key) {
                        dirty.insert(key);
                        continue;
                    }
                    in_flight.insert(key.clone());
                    let reconciler = Arc::clone(&self.reconciler);
                    let semaphore = Arc::clone(&semaphore);
                    let child = cancel.child_token();
                    tasks.spawn(async move {
                        let _permit = semaphore.acquire_owned().await;
                        let pass = tokio::spawn({
                            let key = key.clone();
                            async move { reconciler.reconcile(&key, &child).await }
                        });
                        (key, pass.await)
                    });
                }
            }
        }

        info!(in_flight = tasks.len(), "controller stopping");
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(Err(e)))) => {
                    debug!(intent = %key, error = %e, "pass ended during shutdown");
                }
                Ok((key, Err(e))) => {
                    warn!(intent = %key, error = %e, "reconcile panicked during shutdown");
                }
                _ => {}
            }
        }
        stats
    }

    fn finish(
        &self,
        queue: &ControllerQueue,
        key: &ObjectKey,
        result: Result<Action, ReconcileError>,
        stats: &mut ControllerStats,
    ) {
        let requeue_after = match result {
            Ok(action) => {
                stats.reconciled += 1;
                action.requeue_after
            }
            Err(e) => {
                stats.failed += 1;
                e.requeue_after
            }
        };
        if let Some(delay) = requeue_after {
            queue.enqueue_after(key.clone(), delay);
        }
    }
}
