use async_trait::async_trait;
use async_worker_pool::{
    Admission, CancellationToken, Config, JobResult, NonBlocking, NonBlockingRunner, Pool, Runner,
    SubmitError,
};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Summary {
    lines: usize,
    bytes: usize,
    elapsed: Duration,
}

impl Summary {
    fn per_line(&self) -> Duration {
        let lines = u32::try_from(self.lines.max(1)).unwrap_or(u32::MAX);
        self.elapsed / lines
    }
}

/// Pretends to fetch something whose cost grows with the line length.
struct Measure {
    line: String,
    summary: Arc<Mutex<Summary>>,
}

#[async_trait]
impl Runner for Measure {
    async fn job(&self, cancel: CancellationToken) {
        let start = Instant::now();
        let cost = Duration::from_micros(50 * self.line.len() as u64);

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::warn!(line = %self.line, "measurement cancelled");
                return;
            }
            _ = tokio::time::sleep(cost) => {}
        }

        let mut summary = self.summary.lock().unwrap_or_else(PoisonError::into_inner);
        summary.lines += 1;
        summary.bytes += self.line.len();
        summary.elapsed += start.elapsed();
    }
}

struct WordCount(String);

#[async_trait]
impl NonBlockingRunner<usize> for WordCount {
    async fn job(&self, _cancel: CancellationToken) -> JobResult<usize> {
        let words = self.0.split_whitespace().count();
        if words == 0 {
            anyhow::bail!("blank line");
        }
        Ok(words)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rt = Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(run(Config::io_bound()))
}

async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    let cancel = CancellationToken::new();
    let now = Instant::now();

    let pool = Pool::with_config(&config);
    pool.run(&cancel).await?;
    tracing::info!(workers = pool.workers(), "processing started");

    let summary = Arc::new(Mutex::new(Summary::default()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut collected = Vec::new();
    while let Some(line) = lines.next_line().await? {
        pool.execute(Measure {
            line: line.clone(),
            summary: Arc::clone(&summary),
        })
        .await?;
        collected.push(line);
    }

    if !pool.stop_timeout(config.shutdown_timeout).await {
        tracing::warn!("some measurements were aborted");
    }

    {
        let summary = summary.lock().unwrap_or_else(PoisonError::into_inner);
        let lines = summary.lines.max(1);
        println!(
            "measured {} lines, average {} bytes, {:?} per line",
            summary.lines,
            summary.bytes / lines,
            summary.per_line(),
        );
    }

    let counter = Arc::new(NonBlocking::<usize>::with_config(&config));
    counter.run(&cancel).await?;
    let admission = Admission::with_config(Arc::clone(&counter), &config);

    let (mut words, mut rejected, mut failed) = (0, 0, 0);
    for line in collected {
        match admission.schedule(WordCount(line)).await {
            Ok(n) => words += n,
            Err(SubmitError::Rejected(_)) => rejected += 1,
            Err(SubmitError::Failed(err)) => {
                tracing::debug!(error = %err, "word count failed");
                failed += 1;
            }
        }
    }
    counter.stop().await;

    println!("counted {words} words ({rejected} rejected, {failed} failed)");
    println!("elapsed: {:?}", now.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_line_average_saturates() {
        let summary = Summary {
            lines: usize::MAX,
            bytes: 0,
            elapsed: Duration::from_secs(u64::from(u32::MAX)),
        };
        assert_eq!(summary.per_line(), Duration::from_secs(1));

        let empty = Summary::default();
        assert_eq!(empty.per_line(), Duration::ZERO);

        let few = Summary {
            lines: 4,
            bytes: 40,
            elapsed: Duration::from_millis(100),
        };
        assert_eq!(few.per_line(), Duration::from_millis(25));
    }
}
