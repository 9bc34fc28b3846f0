use super::errors::PoolError;
use std::time::Duration;

/// Pool sizing and the timeouts callers race against.
#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    /// Admission budget covering both "wait for a worker" and "wait for the result".
    pub busy_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: num_cpus::get() * 2,
            busy_timeout: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(20),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            workers: num_cpus::get(),
            busy_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        Self {
            workers: num_cpus::get() * 4,
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::InvalidWorkerCount);
        }
        Ok(())
    }
}
