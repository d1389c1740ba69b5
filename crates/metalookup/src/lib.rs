// ABOUTME: Main library entry point for the metalookup web resource analyzer.
// ABOUTME: Re-exports the public API: MetadataManager, CachedExtractor, Content, Settings, Output, MetaError.

//! Metalookup - rates a web resource on a set of independent quality and risk criteria.
//!
//! A [`MetadataManager`] renders the resource once, runs every registered
//! extractor against the shared [`Content`] concurrently and returns an
//! [`Output`] holding one verdict per extractor, or fails as a whole.
//! [`CachedExtractor`] puts a TTL cache in front of it.
//!
//! # Example
//!
//! ```no_run
//! use metalookup::{ExtractRequest, MetaError, MetadataManager, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MetaError> {
//!     let manager = MetadataManager::builder()
//!         .settings(Settings::from_env())
//!         .with_default_extractors()
//!         .build()
//!         .await?;
//!     let output = manager.extract(&ExtractRequest::new("https://example.com/")).await?;
//!     println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod content;
pub mod error;
pub mod extractors;
pub mod manager;
pub mod options;
pub mod pool;
pub mod resource;
pub mod result;
pub mod rules;

pub use crate::cache::{
    CacheBackend, CacheControl, CacheStatus, Cached, CachedExtractor, KeyBuilder, MemoryBackend,
    SqliteBackend, UrlKeyBuilder, Warmup, WarmupReport,
};
pub use crate::content::{Content, Payload, Renderer, Rendering};
pub use crate::error::{ErrorCode, MetaError};
pub use crate::extractors::{default_extractors, Extractor, ExtractorContext};
pub use crate::manager::{ExtractRequest, ManagerBuilder, MetadataManager};
pub use crate::options::{Settings, SettingsBuilder};
pub use crate::pool::WorkerPool;
pub use crate::result::{ExtractorResult, FieldError, FieldOutcome, Output};
pub use crate::rules::{FilterRuleSet, RequestQuery};
