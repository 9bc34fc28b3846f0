use super::{
    config::Config,
    errors::{Rejection, SubmitError},
    nonblocking::NonBlocking,
    task::{Job, NonBlockingRunner},
};
use std::{sync::Arc, time::Duration};
use tokio::time::{timeout_at, Instant};

/// Admission control on top of a [`NonBlocking`] pool.
///
/// One `busy_timeout` budget covers waiting for a worker and waiting for its
/// result. Running out of it is a rejection ("overloaded, try later"), never a
/// task failure.
pub struct Admission<T: Send + 'static> {
    pool: Arc<NonBlocking<T>>,
    busy_timeout: Duration,
}

impl<T: Send + 'static> Clone for Admission<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            busy_timeout: self.busy_timeout,
        }
    }
}

impl<T: Send + 'static> Admission<T> {
    pub fn new(pool: Arc<NonBlocking<T>>, busy_timeout: Duration) -> Self {
        Self { pool, busy_timeout }
    }

    pub fn with_config(pool: Arc<NonBlocking<T>>, config: &Config) -> Self {
        Self::new(pool, config.busy_timeout)
    }

    #[inline]
    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    #[inline]
    pub fn pool(&self) -> &Arc<NonBlocking<T>> {
        &self.pool
    }

    pub async fn schedule<R: NonBlockingRunner<T>>(&self, task: R) -> Result<T, SubmitError> {
        self.schedule_boxed(Box::new(task)).await
    }

    pub async fn schedule_boxed(&self, task: Job<T>) -> Result<T, SubmitError> {
        let deadline = Instant::now() + self.busy_timeout;
        let outcome = self.try_schedule(task, deadline).await;

        if let Err(SubmitError::Rejected(reason)) = &outcome {
            self.pool.record_rejection();
            tracing::debug!(%reason, budget = ?self.busy_timeout, "request rejected");
        }
        outcome
    }

    async fn try_schedule(&self, task: Job<T>, deadline: Instant) -> Result<T, SubmitError> {
        let mut slot = match timeout_at(deadline, self.pool.availability().recv()).await {
            Ok(Some(slot)) => slot,
            Ok(None) => return Err(SubmitError::Rejected(Rejection::PoolClosed)),
            Err(_) => return Err(SubmitError::Rejected(Rejection::NoWorkerAvailable)),
        };

        if slot.send_boxed(task).is_err() {
            return Err(SubmitError::Rejected(Rejection::PoolClosed));
        }

        // `slot` is released on drop whichever way this ends.
        match timeout_at(deadline, slot.recv()).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(cause))) => Err(SubmitError::Failed(cause)),
            Ok(Err(_)) => Err(SubmitError::Rejected(Rejection::PoolClosed)),
            Err(_) => Err(SubmitError::Rejected(Rejection::ResultTimedOut)),
        }
    }
}
