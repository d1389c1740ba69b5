// ABOUTME: Response cache in front of the MetadataManager with HTTP-cache-like request directives.
// ABOUTME: Defines the backend contract, key building, and the CachedExtractor middleware.

//! Output caching.
//!
//! [`CachedExtractor`] wraps a [`MetadataManager`]. A [`KeyBuilder`] decides
//! whether a request is cacheable; [`CacheControl`] carries the request's
//! `no-cache` / `only-if-cached` directives. Misses are computed by the
//! manager and persisted in the background with the configured TTL.

pub mod memory;
pub mod sqlite;
pub mod warmup;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{ErrorCode, MetaError};
use crate::manager::{ExtractRequest, MetadataManager};
use crate::result::Output;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use warmup::{Warmup, WarmupReport};

/// TTL key-value store for serialized Outputs.
///
/// Implementations must be safe under concurrent use. Expired entries are
/// never returned.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Stored value and its remaining lifetime.
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Duration, String)>, MetaError>;

    async fn get(&self, key: &str) -> Result<Option<String>, MetaError> {
        Ok(self.get_with_ttl(key).await?.map(|(_, value)| value))
    }

    /// Store or overwrite `key`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), MetaError>;

    /// Remove one key, or every key when `key` is `None`.
    async fn clear(&self, key: Option<&str>) -> Result<(), MetaError>;
}

/// Request directives understood by the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// Skip the lookup and recompute.
    pub no_cache: bool,
    /// Never recompute; serve from the cache or fail.
    pub only_if_cached: bool,
}

impl CacheControl {
    /// Parse a `Cache-Control` request header value. Unknown directives are ignored.
    pub fn parse(header: &str) -> Self {
        let mut control = CacheControl::default();
        for directive in header.split(',') {
            let name = directive.split('=').next().unwrap_or("").trim();
            if name.eq_ignore_ascii_case("no-cache") {
                control.no_cache = true;
            } else if name.eq_ignore_ascii_case("only-if-cached") {
                control.only_if_cached = true;
            }
        }
        control
    }
}

/// Maps a request to a stable cache key, or `None` when it cannot be cached.
pub trait KeyBuilder: Send + Sync {
    fn key(&self, request: &ExtractRequest) -> Option<String>;
}

/// Keys URL-addressed requests by their normalized URL; supplied payloads are not cacheable.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlKeyBuilder;

impl KeyBuilder for UrlKeyBuilder {
    fn key(&self, request: &ExtractRequest) -> Option<String> {
        if request.payload.is_some() {
            return None;
        }
        let mut url = url::Url::parse(&request.url).ok()?;
        url.set_fragment(None);
        Some(url.to_string())
    }
}

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Computed without consulting the cache.
    Bypass,
}

/// A value with its cache provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cached<T> {
    pub value: T,
    /// Seconds since the entry was stored; set on hits only.
    pub age: Option<u64>,
    pub status: CacheStatus,
}

/// Background writes not yet finished.
#[derive(Debug, Default)]
struct PendingWrites {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingWrites {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            let idle = self.idle.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Caching middleware around the manager's extraction entry point.
pub struct CachedExtractor {
    manager: Arc<MetadataManager>,
    backend: Arc<dyn CacheBackend>,
    keys: Arc<dyn KeyBuilder>,
    ttl: Duration,
    pending: Arc<PendingWrites>,
}

impl std::fmt::Debug for CachedExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedExtractor")
            .field("manager", &self.manager)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CachedExtractor {
    pub fn new(manager: Arc<MetadataManager>, backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            manager,
            backend,
            keys: Arc::new(UrlKeyBuilder),
            ttl,
            pending: Arc::new(PendingWrites::default()),
        }
    }

    pub fn with_key_builder(mut self, keys: Arc<dyn KeyBuilder>) -> Self {
        self.keys = keys;
        self
    }

    pub fn manager(&self) -> &Arc<MetadataManager> {
        &self.manager
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Serve `request`, consulting and populating the cache per `control`.
    pub async fn extract(
        &self,
        request: &ExtractRequest,
        control: CacheControl,
    ) -> Result<Cached<Output>, MetaError> {
        let key = self.keys.key(request);

        if control.only_if_cached {
            let Some(key) = key else {
                return Err(MetaError::new(
                    ErrorCode::NeverCacheable,
                    &request.url,
                    "Cache",
                    None,
                ));
            };
            return match self.lookup(&key).await? {
                Some((age, output)) => Ok(shape(request, output, Some(age), CacheStatus::Hit)),
                None => Err(MetaError::new(ErrorCode::NotCached, &request.url, "Cache", None)),
            };
        }

        if let (Some(key), false) = (&key, control.no_cache) {
            match self.lookup(key).await {
                Ok(Some((age, output))) => {
                    debug!(key = %key, age, "cache hit");
                    return Ok(shape(request, output, Some(age), CacheStatus::Hit));
                }
                Ok(None) => debug!(key = %key, "cache miss"),
                Err(e) => warn!(key = %key, error = %e, "cache lookup failed, recomputing"),
            }
        }

        let output = self.manager.extract_all(request).await?;
        let status = match (&key, control.no_cache) {
            (Some(_), false) => CacheStatus::Miss,
            _ => CacheStatus::Bypass,
        };
        if let Some(key) = key {
            self.persist_in_background(key, &output);
        }
        Ok(shape(request, output, None, status))
    }

    /// Recompute `request` and store the result before returning.
    pub async fn refresh(&self, request: &ExtractRequest) -> Result<(), MetaError> {
        let key = self.keys.key(request).ok_or_else(|| {
            MetaError::new(ErrorCode::NeverCacheable, &request.url, "Cache", None)
        })?;
        let output = self.manager.extract_all(request).await?;
        if !output.is_cacheable() {
            debug!(key = %key, "output holds placeholders, not stored");
            return Ok(());
        }
        self.backend.set(&key, encode(&key, &output)?, self.ttl).await
    }

    /// Wait until every background write started so far has finished.
    pub async fn flush(&self) {
        self.pending.wait().await;
    }

    async fn lookup(&self, key: &str) -> Result<Option<(u64, Output)>, MetaError> {
        let Some((remaining, value)) = self.backend.get_with_ttl(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Output>(&value) {
            Ok(output) => Ok(Some((self.ttl.saturating_sub(remaining).as_secs(), output))),
            Err(e) => {
                warn!(key, error = %e, "undecodable cache entry ignored");
                Ok(None)
            }
        }
    }

    fn persist_in_background(&self, key: String, output: &Output) {
        if !output.is_cacheable() {
            debug!(key = %key, "output holds placeholders, not stored");
            return;
        }
        let value = match encode(&key, output) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "cache write skipped");
                return;
            }
        };
        let backend = Arc::clone(&self.backend);
        let pending = Arc::clone(&self.pending);
        let ttl = self.ttl;
        pending.start();
        tokio::spawn(async move {
            if let Err(e) = backend.set(&key, value, ttl).await {
                warn!(key = %key, error = %e, "cache write failed");
            }
            pending.finish();
        });
    }
}

fn encode(key: &str, output: &Output) -> Result<String, MetaError> {
    serde_json::to_string(output)
        .map_err(|e| MetaError::extract(key, "Cache", Some(anyhow::anyhow!(e))))
}

fn shape(request: &ExtractRequest, output: Output, age: Option<u64>, status: CacheStatus) -> Cached<Output> {
    let value = if request.include_diagnostics {
        output
    } else {
        output.without_diagnostics()
    };
    Cached { value, age, status }
}
