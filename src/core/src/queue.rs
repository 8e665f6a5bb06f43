//! Bounded worker queue.
//!
//! A fixed number of workers drain one shared queue. Each worker takes one
//! item at a time, runs the per-item operation and loops until the queue is
//! empty, so slow items never hold up the rest of the queue. Outcomes flow
//! over a channel to a single aggregating loop that owns the [`QueueReport`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinSet};

use crate::config::FailurePolicy;
use crate::error::{Result, SyncError};

/// Shared queue state, guarded by one lock so that dequeueing and
/// cancellation are never interleaved.
struct QueueState<T> {
    /// Items not yet taken by a worker (FIFO)
    pending: VecDeque<T>,

    /// Items currently being processed
    active: usize,

    /// Highest number of items processed at the same time
    peak_active: usize,

    /// Set by the first failure under fail-fast
    cancelled: bool,
}

impl<T> QueueState<T> {
    fn take(&mut self) -> Option<T> {
        if self.cancelled {
            return None;
        }
        let item = self.pending.pop_front()?;
        self.active += 1;
        self.peak_active = self.peak_active.max(self.active);
        Some(item)
    }

    fn finish(&mut self, cancel: bool) {
        self.active = self.active.saturating_sub(1);
        if cancel {
            self.cancelled = true;
        }
    }
}

/// Aggregated result of draining a queue.
#[derive(Debug)]
pub struct QueueReport<T, E> {
    /// Items whose operation succeeded
    pub completed: Vec<T>,
    /// Items whose operation failed, with the cause
    pub failed: Vec<(T, E)>,
    /// Items never attempted because the queue was cancelled
    pub skipped: Vec<T>,
    /// Number of workers started
    pub workers: usize,
    /// Highest number of items that were in flight at once
    pub peak_active: usize,
    /// Whether a fail-fast cancellation happened
    pub cancelled: bool,
}

impl<T, E> QueueReport<T, E> {
    fn empty() -> Self {
        Self {
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            workers: 0,
            peak_active: 0,
            cancelled: false,
        }
    }

    /// Total number of items that were attempted.
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

/// A queue of items drained by at most `max_workers` concurrent workers.
pub struct WorkQueue<T> {
    items: Vec<T>,
    max_workers: usize,
    policy: FailurePolicy,
}

impl<T> WorkQueue<T>
where
    T: Clone + Send + 'static,
{
    /// Create a queue over `items`.
    ///
    /// `max_workers` must be at least 1 unless `items` is empty, in which
    /// case running the queue is a no-op.
    pub fn new(items: Vec<T>, max_workers: usize, policy: FailurePolicy) -> Result<Self> {
        if max_workers == 0 && !items.is_empty() {
            return Err(SyncError::ConfigError(
                "worker count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            items,
            max_workers,
            policy,
        })
    }

    /// Number of workers that [`run`](Self::run) will start.
    pub fn worker_count(&self) -> usize {
        self.max_workers.min(self.items.len())
    }

    /// Drain the queue, calling `op` once per item.
    ///
    /// Returns only after every worker has exited. Under
    /// [`FailurePolicy::FailFast`] the first failure stops all workers from
    /// taking new items; operations already running are awaited, and the
    /// untouched items are reported as skipped. An operation that panics is
    /// recorded as a failure of its item.
    pub async fn run<F, Fut, E>(self, op: F) -> QueueReport<T, E>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: From<JoinError> + Send + 'static,
    {
        let workers = self.worker_count();
        if workers == 0 {
            return QueueReport::empty();
        }

        let state = Arc::new(Mutex::new(QueueState {
            pending: VecDeque::from(self.items),
            active: 0,
            peak_active: 0,
            cancelled: false,
        }));
        let op = Arc::new(op);
        let fail_fast = self.policy == FailurePolicy::FailFast;
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<(T, std::result::Result<(), E>)>();

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let state = Arc::clone(&state);
            let op = Arc::clone(&op);
            let outcome_tx = outcome_tx.clone();

            set.spawn(async move {
                loop {
                    let item = state.lock().await.take();
                    let Some(item) = item else {
                        break;
                    };

                    // A panicking operation fails its own item only.
                    let result = match tokio::spawn(op(item.clone())).await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::error!(worker, error = %e, "Queue item task failed");
                            Err(E::from(e))
                        }
                    };
                    state.lock().await.finish(fail_fast && result.is_err());

                    if outcome_tx.send((item, result)).is_err() {
                        break;
                    }
                }
                tracing::trace!(worker, "Queue worker exited");
            });
        }
        // Only workers hold senders now, so the loop below ends once they exit.
        drop(outcome_tx);

        let mut report = QueueReport::empty();
        report.workers = workers;
        while let Some((item, result)) = outcome_rx.recv().await {
            match result {
                Ok(()) => report.completed.push(item),
                Err(e) => report.failed.push((item, e)),
            }
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Queue worker terminated abnormally");
            }
        }

        let mut state = state.lock().await;
        report.skipped = state.pending.drain(..).collect();
        report.peak_active = state.peak_active;
        report.cancelled = state.cancelled;
        report
    }
}
