//! Start/stop plumbing shared by both pool variants: the lifecycle flag, the
//! start barrier, the join barrier and the intake of worker offers.

use super::errors::PoolError;
use futures::future::join_all;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex as StdMutex, OnceLock, PoisonError,
    },
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::{mpsc, Barrier, Mutex},
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl PoolState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PoolState::Created,
            1 => PoolState::Running,
            2 => PoolState::Stopping,
            _ => PoolState::Stopped,
        }
    }
}

pub(crate) struct Lifecycle {
    name: &'static str,
    workers: usize,
    state: AtomicU8,
    shutdown: OnceLock<CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Lifecycle {
    pub(crate) fn new(name: &'static str, workers: usize) -> Self {
        Self {
            name,
            workers,
            state: AtomicU8::new(PoolState::Created as u8),
            shutdown: OnceLock::new(),
            handles: Mutex::new(Vec::with_capacity(workers)),
        }
    }

    #[inline]
    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    #[inline]
    pub(crate) fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Spawns one worker per capacity unit and waits until every one of them
    /// is past the start barrier.
    ///
    /// `make_worker` builds the loop for worker `id`; the token it receives is
    /// cancelled by [`Lifecycle::stop`].
    pub(crate) async fn start<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut make_worker: F,
    ) -> Result<(), PoolError>
    where
        F: FnMut(usize, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock().await;
        if self.state() != PoolState::Created {
            return Err(PoolError::AlreadyStarted);
        }
        if self.workers == 0 {
            return Err(PoolError::InvalidWorkerCount);
        }
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let shutdown = cancel.child_token();
        if self.shutdown.set(shutdown.clone()).is_err() {
            return Err(PoolError::AlreadyStarted);
        }

        let ready = Arc::new(Barrier::new(self.workers + 1));
        for id in 0..self.workers {
            let worker = make_worker(id, shutdown.clone());
            let ready = Arc::clone(&ready);
            handles.push(runtime.spawn(async move {
                ready.wait().await;
                worker.await;
            }));
        }
        ready.wait().await;

        self.state.store(PoolState::Running as u8, Ordering::Release);
        tracing::info!(pool = self.name, workers = self.workers, "worker pool started");
        Ok(())
    }

    pub(crate) async fn stop(&self) {
        let mut handles = self.handles.lock().await;
        if !self.begin_stop() {
            return;
        }

        let results = join_all(handles.drain(..)).await;
        self.log_join_errors(results);

        self.state.store(PoolState::Stopped as u8, Ordering::Release);
        tracing::info!(pool = self.name, "worker pool stopped");
    }

    /// Like [`Lifecycle::stop`], but aborts whatever is still running after
    /// `timeout`. Returns `false` when workers had to be aborted.
    pub(crate) async fn stop_timeout(&self, timeout: Duration) -> bool {
        let mut handles = self.handles.lock().await;
        if !self.begin_stop() {
            return true;
        }

        let joined = tokio::time::timeout(timeout, join_all(handles.iter_mut())).await;
        let clean = match joined {
            Ok(results) => {
                self.log_join_errors(results);
                true
            }
            Err(_) => {
                tracing::warn!(
                    pool = self.name,
                    timeout = ?timeout,
                    "graceful stop timed out, aborting workers"
                );
                for handle in handles.iter() {
                    handle.abort();
                }
                // Abort lands at the next yield point; wait for it.
                let aborted = join_all(handles.iter_mut()).await;
                self.log_join_errors(
                    aborted
                        .into_iter()
                        .filter(|res| !matches!(res, Err(err) if err.is_cancelled()))
                        .collect(),
                );
                false
            }
        };
        handles.clear();

        self.state.store(PoolState::Stopped as u8, Ordering::Release);
        tracing::info!(pool = self.name, clean, "worker pool stopped");
        clean
    }

    /// Moves the pool out of `Running` and fires the shutdown token.
    /// Returns `false` when there is nothing to join.
    fn begin_stop(&self) -> bool {
        match self.state.compare_exchange(
            PoolState::Running as u8,
            PoolState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                tracing::info!(pool = self.name, "stopping worker pool");
                if let Some(token) = self.shutdown.get() {
                    token.cancel();
                }
                true
            }
            Err(current) => {
                if PoolState::from_u8(current) == PoolState::Created {
                    self.state.store(PoolState::Stopped as u8, Ordering::Release);
                }
                false
            }
        }
    }

    fn log_join_errors(&self, results: Vec<Result<(), JoinError>>) {
        for err in results.into_iter().filter_map(Result::err) {
            tracing::error!(pool = self.name, error = %err, "worker terminated abnormally");
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        // A pool dropped without `stop` must not leave its workers parked forever.
        if let Some(token) = self.shutdown.get() {
            token.cancel();
        }
    }
}

/// Offers from idle workers. Capacity equals the worker count, so the only
/// buffering is the number of idle workers.
pub(crate) struct Intake<M> {
    tx: StdMutex<Option<mpsc::Sender<M>>>,
    rx: Mutex<mpsc::Receiver<M>>,
}

impl<M> Intake<M> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    /// Sender handed to a worker. `None` once sealed.
    pub(crate) fn sender(&self) -> Option<mpsc::Sender<M>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drops the pool's own sender so the intake closes once every worker
    /// has exited.
    pub(crate) fn seal(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub(crate) async fn recv(&self) -> Option<M> {
        self.rx.lock().await.recv().await
    }

    pub(crate) fn try_recv(&self) -> Option<M> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}
