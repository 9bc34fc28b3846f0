use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PoolError {
    #[error("pool is not running")]
    NotRunning,
    #[error("pool was already started")]
    AlreadyStarted,
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,
    #[error("no tokio runtime to spawn workers on")]
    NoRuntime,
    #[error("pool is closed")]
    Closed,
    #[error("request slot already released")]
    SlotReleased,
    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

/// Reasons an admission-controlled submission was turned away.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum Rejection {
    #[error("no worker became available in time")]
    NoWorkerAvailable,
    #[error("result did not arrive in time")]
    ResultTimedOut,
    #[error("pool is shutting down")]
    PoolClosed,
}

/// Outcome of a failed [`crate::admission::Admission::schedule`] call.
///
/// `Rejected` means the pool was too busy (try later); `Failed` carries the
/// task's own error.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("rejected: {0}")]
    Rejected(Rejection),
    #[error("task failed: {0}")]
    Failed(#[source] anyhow::Error),
}

impl SubmitError {
    #[inline]
    pub fn is_rejected(&self) -> bool {
        matches!(self, SubmitError::Rejected(_))
    }

    #[inline]
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            SubmitError::Rejected(r) => Some(*r),
            SubmitError::Failed(_) => None,
        }
    }
}
