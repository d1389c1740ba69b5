// ABOUTME: The Extractor contract and the default, ordered set of analyzers.
// ABOUTME: Each analyzer rates one aspect of a resource from a shared lazily fetched Content.

//! Extractors.
//!
//! Every analyzer implements [`Extractor`]: a stable key, an optional
//! one-time [`Extractor::setup`], and [`Extractor::extract`] which rates a
//! [`Content`] from 0 to 5.
//!
//! Submodules:
//! - `html_list`: literal vocabulary search over the HTML.
//! - `adblock`: sub-request matching against filter lists.
//! - `security`: response header predicates.
//! - `gdpr`: additive feature score.
//! - `licence`: licence-name counting.
//! - `accessibility`: external score aggregation.
//! - `files`: text extraction from linked documents.
//! - `malicious`: linked file extension classification.

pub mod accessibility;
pub mod adblock;
pub mod compiled;
pub mod files;
pub mod gdpr;
pub mod html_list;
pub mod licence;
pub mod links;
pub mod malicious;
pub mod security;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::content::Content;
use crate::error::MetaError;
use crate::options::Settings;
use crate::pool::WorkerPool;
use crate::result::ExtractorResult;

pub use accessibility::{Accessibility, AccessibilityScorer, AccessibilityServiceClient, Strategy};
pub use adblock::AdBlockMatch;
pub use files::ExtractFromFiles;
pub use gdpr::Gdpr;
pub use html_list::ListMatch;
pub use licence::Licence;
pub use malicious::MaliciousExtensions;
pub use security::{IFrameEmbeddable, SecurityHeaders};

/// An analyzer producing one rating per resource.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Stable identifier; the key of this extractor's entry in the Output.
    fn key(&self) -> &str;

    /// One-time initialization, run before the first `extract`.
    async fn setup(&mut self) -> Result<(), MetaError> {
        Ok(())
    }

    async fn extract(&self, content: &Content) -> Result<ExtractorResult, MetaError>;

    /// Whether the analyzer needs data only a live render provides, such as
    /// observed sub-requests. Such analyzers are not run on supplied payloads.
    fn needs_live_page(&self) -> bool {
        false
    }
}

/// Shared collaborators handed to the default extractors.
#[derive(Debug, Clone)]
pub struct ExtractorContext {
    pub settings: Settings,
    pub client: reqwest::Client,
    pub pool: WorkerPool,
}

/// One [`ListMatch`] per vocabulary; the first unusable vocabulary fails the set.
pub fn list_extractors(
    vocabularies: &[(&str, &[&str])],
) -> Result<Vec<Box<dyn Extractor>>, MetaError> {
    vocabularies
        .iter()
        .map(|(key, words)| {
            ListMatch::new(*key, *words).map(|e| Box::new(e) as Box<dyn Extractor>)
        })
        .collect()
}

/// The full extractor set in registration order.
///
/// `accessibility` is left out when no scoring endpoint is configured.
pub fn default_extractors(ctx: &ExtractorContext) -> Result<Vec<Box<dyn Extractor>>, MetaError> {
    let mut extractors: Vec<Box<dyn Extractor>> = Vec::new();

    for (key, lists) in adblock::DEFAULT_LISTS {
        extractors.push(Box::new(AdBlockMatch::new(*key, *lists, ctx)));
    }
    extractors.extend(list_extractors(html_list::DEFAULT_VOCABULARIES)?);
    extractors.push(Box::new(IFrameEmbeddable));
    extractors.push(Box::new(SecurityHeaders));
    extractors.push(Box::new(Gdpr));
    extractors.push(Box::new(Licence));

    match ctx.settings.accessibility_endpoint.as_deref() {
        Some(endpoint) => {
            let scorer =
                AccessibilityServiceClient::new(ctx.client.clone(), endpoint, &ctx.settings);
            extractors.push(Box::new(Accessibility::new(Arc::new(scorer))));
        }
        None => warn!("no accessibility endpoint configured, accessibility extractor disabled"),
    }

    extractors.push(Box::new(ExtractFromFiles::new(ctx)));
    extractors.push(Box::new(MaliciousExtensions));
    Ok(extractors)
}
