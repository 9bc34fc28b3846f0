//! Bounded async worker pools with a fixed number of workers.
//!
//! # Features
//! - [`Pool`]: fire-and-forget execution with direct handoff to idle workers
//! - [`NonBlocking`]: request/response execution through per-worker [`RequestSlot`]s
//! - [`Admission`]: busy-timeout admission control on top of `NonBlocking`
//! - Cooperative shutdown that joins every worker, optionally bounded by a timeout
//! - Panic isolation and pool metrics

pub mod admission;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod model;
pub mod nonblocking;
pub mod pool;
pub mod slot;
pub mod task;

pub use admission::Admission;
pub use config::Config;
pub use errors::{PoolError, Rejection, SubmitError};
pub use lifecycle::PoolState;
pub use model::{JobResult, PoolMetrics};
pub use nonblocking::{Availability, NonBlocking};
pub use pool::Pool;
pub use slot::{RequestSlot, SlotPhase};
pub use task::{Job, NonBlockingRunner, Runner, Task};
pub use tokio_util::sync::CancellationToken;
