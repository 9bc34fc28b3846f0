use super::{errors::PoolError, model::JobResult};
use async_trait::async_trait;
use futures::FutureExt;
use std::{any::Any, future::Future, panic::AssertUnwindSafe};
use tokio_util::sync::CancellationToken;

/// Fire-and-forget unit of work.
///
/// There is no return channel: a task reports its own failures (usually by
/// logging them).
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    async fn job(&self, cancel: CancellationToken);
}

/// Request/response unit of work producing a typed [`JobResult`].
#[async_trait]
pub trait NonBlockingRunner<T: Send + 'static>: Send + Sync + 'static {
    async fn job(&self, cancel: CancellationToken) -> JobResult<T>;
}

pub type Task = Box<dyn Runner>;
pub type Job<T> = Box<dyn NonBlockingRunner<T>>;

/// Polls `fut` to completion, turning a panic into [`PoolError::TaskPanicked`]
/// so the worker running it survives.
pub(crate) async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, PoolError> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| PoolError::TaskPanicked(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
