// ABOUTME: Bounded pool for CPU-heavy synchronous work such as document parsing and rule scans.
// ABOUTME: Jobs run on tokio's blocking threads; a semaphore bounds how many run at once.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::MetaError;

/// Runs blocking closures off the async scheduler with bounded parallelism.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `job` on a blocking thread and await its result.
    ///
    /// `op` names the job in the error returned if it panics.
    pub async fn run<F, T>(&self, op: &str, job: F) -> Result<T, MetaError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.permits.clone().acquire_owned().await.map_err(|e| {
            MetaError::extract("", op, Some(anyhow::anyhow!("worker pool closed: {}", e)))
        })?;
        // The permit lives as long as the job, even if the caller stops waiting.
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| MetaError::extract("", op, Some(anyhow::anyhow!("worker failed: {}", e))))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_job_and_returns_value() {
        let pool = WorkerPool::new(2);
        let sum = pool.run("sum", || (1..=10).sum::<u32>()).await.unwrap();
        assert_eq!(sum, 55);
    }

    #[tokio::test]
    async fn panicking_job_is_an_extract_error() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run("boom", || -> u32 { panic!("bad document") })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Extract);
        assert_eq!(err.op, "boom");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallelism_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..6).map(|_| {
            let running = running.clone();
            let peak = peak.clone();
            pool.run("sleep", move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                running.fetch_sub(1, Ordering::SeqCst);
            })
        });
        futures::future::try_join_all(jobs).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abandoned_job_keeps_its_slot() {
        let pool = WorkerPool::new(1);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            pool.run("slow", || std::thread::sleep(Duration::from_millis(500))),
        )
        .await;
        assert!(abandoned.is_err());

        let started = std::time::Instant::now();
        pool.run("next", || ()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
