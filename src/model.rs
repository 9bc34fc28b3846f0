use std::sync::atomic::{AtomicUsize, Ordering};

/// Result produced by a request/response task.
pub type JobResult<T> = Result<T, anyhow::Error>;

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub completed_tasks: usize,
    pub panicked_tasks: usize,
    pub rejected_requests: usize,
}

impl PoolMetrics {
    /// Share of the fixed worker set running a task right now.
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        self.busy_workers as f64 / self.workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.panicked_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}

#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    busy_workers: AtomicUsize,
    idle_workers: AtomicUsize,
    completed_tasks: AtomicUsize,
    panicked_tasks: AtomicUsize,
    rejected_requests: AtomicUsize,
}

impl PoolStats {
    #[inline]
    pub(crate) fn worker_idle(&self) {
        self.idle_workers.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn worker_left_idle(&self) {
        self.idle_workers.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn task_started(&self) {
        self.busy_workers.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn task_finished(&self, panicked: bool) {
        self.busy_workers.fetch_sub(1, Ordering::Relaxed);
        if panicked {
            self.panicked_tasks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.completed_tasks.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, workers: usize) -> PoolMetrics {
        PoolMetrics {
            workers,
            busy_workers: self.busy_workers.load(Ordering::Relaxed),
            idle_workers: self.idle_workers.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            panicked_tasks: self.panicked_tasks.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
        }
    }
}
