//! Request/response pool.
//!
//! Instead of a task queue, every idle worker publishes a [`RequestSlot`] on a
//! shared availability channel. A caller claims one slot (racing its own
//! timeout), sends the task through it and waits for the typed result:
//!
//! ```ignore
//! let mut slot = pool.claim(Duration::from_millis(100)).await?;
//! slot.send(task)?;
//! let value = tokio::time::timeout(budget, slot.recv()).await??;
//! slot.release();
//! ```

use super::{
    config::Config,
    errors::{PoolError, Rejection},
    lifecycle::{Intake, Lifecycle, PoolState},
    model::{PoolMetrics, PoolStats},
    slot::{request_slot, RequestSlot},
    task::catch_panic,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct NonBlocking<T: Send + 'static> {
    lifecycle: Lifecycle,
    requests: Intake<RequestSlot<T>>,
    stats: Arc<PoolStats>,
}

impl<T: Send + 'static> NonBlocking<T> {
    pub fn new(workers: usize) -> Self {
        Self {
            lifecycle: Lifecycle::new("nonblocking", workers),
            requests: Intake::new(workers),
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn with_config(config: &Config) -> Self {
        Self::new(config.workers)
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.lifecycle.workers()
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        self.lifecycle.state()
    }

    /// Starts the workers and returns once all of them are ready to take
    /// requests. Tasks receive `cancel` itself, not the pool's shutdown signal.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        let requests = self.requests.sender().ok_or(PoolError::AlreadyStarted)?;
        let stats = Arc::clone(&self.stats);

        self.lifecycle
            .start(cancel, |id, shutdown| {
                worker_loop(
                    id,
                    requests.clone(),
                    Arc::clone(&stats),
                    shutdown,
                    cancel.clone(),
                )
            })
            .await
    }

    /// Channel of idle workers, for callers running their own claim protocol.
    #[inline]
    pub fn availability(&self) -> Availability<'_, T> {
        Availability { pool: self }
    }

    /// Claims an idle worker, waiting at most `timeout`. A zero timeout
    /// only succeeds if a worker is idle right now.
    pub async fn claim(&self, timeout: Duration) -> Result<RequestSlot<T>, Rejection> {
        match tokio::time::timeout(timeout, self.availability().recv()).await {
            Ok(Some(slot)) => Ok(slot),
            Ok(None) => Err(Rejection::PoolClosed),
            Err(_) => Err(Rejection::NoWorkerAvailable),
        }
    }

    pub async fn stop(&self) {
        self.requests.seal();
        self.lifecycle.stop().await;
    }

    pub async fn stop_timeout(&self, timeout: Duration) -> bool {
        self.requests.seal();
        self.lifecycle.stop_timeout(timeout).await
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        self.stats.snapshot(self.lifecycle.workers())
    }

    pub(crate) fn record_rejection(&self) {
        self.stats.rejected();
    }
}

/// Borrowed view of a pool's availability channel.
pub struct Availability<'a, T: Send + 'static> {
    pool: &'a NonBlocking<T>,
}

impl<T: Send + 'static> Availability<'_, T> {
    /// Waits for the next idle worker. Returns `None` if the pool was never
    /// started or has shut down.
    ///
    /// Without a timeout around it this waits as long as every worker is
    /// busy.
    pub async fn recv(&self) -> Option<RequestSlot<T>> {
        if self.pool.state() == PoolState::Created {
            return None;
        }
        loop {
            let slot = self.pool.requests.recv().await?;
            if slot.claim() {
                return Some(slot);
            }
        }
    }

    /// Claims an idle worker only if one is waiting right now.
    ///
    /// Also returns `None` while another caller is parked in
    /// [`Availability::recv`] or [`NonBlocking::claim`], since that caller
    /// holds the intake until an offer arrives.
    pub fn try_recv(&self) -> Option<RequestSlot<T>> {
        if self.pool.state() != PoolState::Running {
            return None;
        }
        while let Some(slot) = self.pool.requests.try_recv() {
            if slot.claim() {
                return Some(slot);
            }
        }
        None
    }
}

async fn worker_loop<T: Send + 'static>(
    id: usize,
    requests: mpsc::Sender<RequestSlot<T>>,
    stats: Arc<PoolStats>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
) {
    tracing::trace!(worker = id, "worker started");

    loop {
        let (slot, mut end) = request_slot::<T>(id);
        slot.mark_offered();
        stats.worker_idle();

        let offered = tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            sent = requests.send(slot) => sent.is_ok(),
        };
        if !offered {
            stats.worker_left_idle();
            break;
        }

        let received = tokio::select! {
            biased;
            task = end.task() => Some(task),
            _ = shutdown.cancelled() => None,
        };
        let task = match received {
            Some(task) => task,
            None if end.abandon() => {
                stats.worker_left_idle();
                tracing::trace!(worker = id, "offer abandoned on shutdown");
                break;
            }
            // Already claimed: the claimant either sends a task or releases.
            None => end.task().await,
        };
        stats.worker_left_idle();

        let Ok(task) = task else {
            continue;
        };
        end.accepted();

        stats.task_started();
        let result = match catch_panic(task.job(cancel.clone())).await {
            Ok(result) => {
                stats.task_finished(false);
                result
            }
            Err(err) => {
                stats.task_finished(true);
                tracing::error!(worker = id, error = %err, "task panicked");
                Err(err.into())
            }
        };

        if end.deliver(result).is_err() {
            tracing::debug!(worker = id, "result dropped, request slot already released");
        }
    }

    tracing::trace!(worker = id, "worker stopped");
}
