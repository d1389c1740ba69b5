// ABOUTME: Background cache warmup: extracts a batch of URLs with bounded concurrency to prefill the cache.
// ABOUTME: Only one batch runs at a time; per-URL failures are logged and counted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::CachedExtractor;
use crate::error::{ErrorCode, MetaError};
use crate::manager::ExtractRequest;

/// Outcome counts of one warmup batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmupReport {
    pub total: usize,
    pub stored: usize,
    pub failed: usize,
}

/// Resets the running flag when the batch ends, including by panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Fire-and-forget cache prefill job.
#[derive(Debug, Clone)]
pub struct Warmup {
    cache: Arc<CachedExtractor>,
    concurrency: usize,
    running: Arc<AtomicBool>,
}

impl Warmup {
    pub fn new(cache: Arc<CachedExtractor>, concurrency: usize) -> Self {
        Self {
            cache,
            concurrency: concurrency.max(1),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start warming `urls` in the background.
    ///
    /// Fails with `Busy` while a previous batch is still running.
    pub fn warm_cache(&self, urls: Vec<String>) -> Result<JoinHandle<WarmupReport>, MetaError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MetaError::new(
                ErrorCode::Busy,
                "",
                "Warmup",
                Some(anyhow::anyhow!("a warmup batch is already running")),
            ));
        }
        let guard = RunningGuard(Arc::clone(&self.running));
        let cache = Arc::clone(&self.cache);
        let concurrency = self.concurrency;

        Ok(tokio::spawn(async move {
            let _guard = guard;
            run_batch(cache, urls, concurrency).await
        }))
    }

    /// Warm `urls` and wait for the batch to finish.
    pub async fn run(&self, urls: Vec<String>) -> Result<WarmupReport, MetaError> {
        let handle = self.warm_cache(urls)?;
        handle.await.map_err(|e| {
            MetaError::extract("", "Warmup", Some(anyhow::anyhow!("warmup task failed: {}", e)))
        })
    }
}

async fn run_batch(cache: Arc<CachedExtractor>, urls: Vec<String>, concurrency: usize) -> WarmupReport {
    let total = urls.len();
    info!(total, concurrency, "cache warmup started");

    let outcomes: Vec<bool> = stream::iter(urls)
        .map(|url| {
            let cache = Arc::clone(&cache);
            async move {
                match cache.refresh(&ExtractRequest::new(url.as_str())).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(url = %url, error = %e, "warmup extraction failed");
                        false
                    }
                }
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let stored = outcomes.iter().filter(|ok| **ok).count();
    let report = WarmupReport {
        total,
        stored,
        failed: total - stored,
    };
    info!(total, stored = report.stored, failed = report.failed, "cache warmup finished");
    report
}
