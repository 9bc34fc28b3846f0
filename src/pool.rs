use super::{
    config::Config,
    errors::PoolError,
    lifecycle::{Intake, Lifecycle, PoolState},
    model::{PoolMetrics, PoolStats},
    task::{catch_panic, Runner, Task},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// An idle worker waiting for exactly one task.
type Offer = oneshot::Sender<Task>;

/// Fire-and-forget pool.
///
/// `execute` hands a task straight to an idle worker; there is no task queue,
/// so producers are slowed down to the pace of the workers.
pub struct Pool {
    lifecycle: Lifecycle,
    intake: Intake<Offer>,
    stats: Arc<PoolStats>,
}

impl Pool {
    pub fn new(workers: usize) -> Self {
        Self {
            lifecycle: Lifecycle::new("pool", workers),
            intake: Intake::new(workers),
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

    /// Starts the workers. Tasks receive `cancel`; stopping the pool does not
    /// cancel it, so running tasks are never interrupted by [`Pool::stop`].
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        // Sealed intake: the pool was already stopped.
        let offers = self.intake.sender().ok_or(PoolError::AlreadyStarted)?;
        let stats = Arc::clone(&self.stats);

        self.lifecycle
            .start(cancel, |id, shutdown| {
                worker_loop(
                    id,
                    offers.clone(),
                    Arc::clone(&stats),
                    shutdown,
                    cancel.clone(),
                )
            })
            .await
    }

    pub async fn execute<R: Runner>(&self, task: R) -> Result<(), PoolError> {
        self.execute_boxed(Box::new(task)).await
    }

    /// Waits for an idle worker and hands it `task`. `Ok` means a worker owns
    /// the task; on error the task was not run.
    pub async fn execute_boxed(&self, mut task: Task) -> Result<(), PoolError> {
        match self.lifecycle.state() {
            PoolState::Running => {}
            PoolState::Created => return Err(PoolError::NotRunning),
            PoolState::Stopping | PoolState::Stopped => return Err(PoolError::Closed),
        }

        loop {
            let offer = self.intake.recv().await.ok_or(PoolError::Closed)?;
            match offer.send(task) {
                Ok(()) => return Ok(()),
                // The worker left on shutdown before taking it; try the next one.
                Err(returned) => task = returned,
            }
        }
    }

    /// Stops accepting tasks and waits for every worker to finish its current
    /// task and exit.
    pub async fn stop(&self) {
        self.intake.seal();
        self.lifecycle.stop().await;
    }

    /// Bounded [`Pool::stop`]: workers still running after `timeout` are
    /// aborted and `false` is returned.
    pub async fn stop_timeout(&self, timeout: Duration) -> bool {
        self.intake.seal();
        self.lifecycle.stop_timeout(timeout).await
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        self.stats.snapshot(self.lifecycle.workers())
    }
}

async fn worker_loop(
    id: usize,
    offers: mpsc::Sender<Offer>,
    stats: Arc<PoolStats>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
) {
    tracing::trace!(worker = id, "worker started");

    loop {
        let (tx, mut rx) = oneshot::channel::<Task>();
        stats.worker_idle();

        let offered = tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            sent = offers.send(tx) => sent.is_ok(),
        };
        if !offered {
            stats.worker_left_idle();
            break;
        }

        let received = tokio::select! {
            biased;
            task = &mut rx => Some(task),
            _ = shutdown.cancelled() => None,
        };
        stats.worker_left_idle();

        let task = match received {
            Some(Ok(task)) => task,
            // Offer taken without a task, e.g. the caller was cancelled.
            Some(Err(_)) => continue,
            // Refuse late sends; a task that got in before the close still runs.
            None => {
                rx.close();
                match rx.try_recv() {
                    Ok(task) => task,
                    Err(_) => break,
                }
            }
        };

        stats.task_started();
        let outcome = catch_panic(task.job(cancel.clone())).await;
        stats.task_finished(outcome.is_err());
        if let Err(err) = outcome {
            tracing::error!(worker = id, error = %err, "task panicked");
        }
    }

    tracing::trace!(worker = id, "worker stopped");
}
