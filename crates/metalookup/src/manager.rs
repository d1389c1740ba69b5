// ABOUTME: MetadataManager: owns the registered extractors and fans each request out to all of them.
// ABOUTME: The join is all-or-nothing; a single failing extractor fails the whole Output.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, error, info};

use crate::content::{Content, DirectRenderer, Origin, Payload, RenderServiceClient, Renderer};
use crate::error::{ErrorCode, MetaError};
use crate::extractors::{default_extractors, Extractor, ExtractorContext};
use crate::options::Settings;
use crate::pool::WorkerPool;
use crate::resource::{http_client, parse_http_url};
use crate::result::{FieldError, FieldOutcome, Output};

/// One inbound extraction request.
#[derive(Debug, Clone, Default)]
pub struct ExtractRequest {
    pub url: String,
    /// Pre-fetched page data used instead of rendering `url`.
    pub payload: Option<Payload>,
    /// Keep each result's `extra` in the returned Output.
    pub include_diagnostics: bool,
}

impl ExtractRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_diagnostics(mut self, include: bool) -> Self {
        self.include_diagnostics = include;
        self
    }
}

/// Builder for [`MetadataManager`].
pub struct ManagerBuilder {
    settings: Settings,
    client: Option<reqwest::Client>,
    renderer: Option<Arc<dyn Renderer>>,
    defaults: bool,
    extractors: Vec<Box<dyn Extractor>>,
    only: Option<Vec<String>>,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            client: None,
            renderer: None,
            defaults: false,
            extractors: Vec::new(),
            only: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Use a preconfigured HTTP client for every outbound call.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Override the renderer chosen from the settings.
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Register the default extractor set ahead of any explicitly registered ones.
    pub fn with_default_extractors(mut self) -> Self {
        self.defaults = true;
        self
    }

    /// Register one extractor. Registration order is kept.
    pub fn register(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Keep only the extractors with these keys.
    pub fn only<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Assemble the extractor list and run every `setup` concurrently.
    pub async fn build(self) -> Result<MetadataManager, MetaError> {
        let client = match self.client {
            Some(client) => client,
            None => http_client(&self.settings)?,
        };
        let pool = WorkerPool::new(self.settings.worker_threads);

        let mut extractors = if self.defaults {
            default_extractors(&ExtractorContext {
                settings: self.settings.clone(),
                client: client.clone(),
                pool: pool.clone(),
            })?
        } else {
            Vec::new()
        };
        extractors.extend(self.extractors);

        if let Some(only) = &self.only {
            for key in only {
                if !extractors.iter().any(|e| e.key() == key) {
                    return Err(MetaError::new(
                        ErrorCode::Extract,
                        "",
                        "ManagerBuilder",
                        Some(anyhow::anyhow!("unknown extractor key {:?}", key)),
                    ));
                }
            }
            extractors.retain(|e| only.iter().any(|k| k == e.key()));
        }

        let mut seen = HashSet::new();
        for extractor in &extractors {
            if !seen.insert(extractor.key().to_string()) {
                return Err(MetaError::new(
                    ErrorCode::Extract,
                    "",
                    "ManagerBuilder",
                    Some(anyhow::anyhow!("duplicate extractor key {:?}", extractor.key())),
                ));
            }
        }

        try_join_all(extractors.iter_mut().map(|e| e.setup())).await?;

        let renderer: Arc<dyn Renderer> = match self.renderer {
            Some(renderer) => renderer,
            None => match self.settings.render_endpoint.as_deref() {
                Some(endpoint) => Arc::new(RenderServiceClient::new(
                    client.clone(),
                    endpoint,
                    &self.settings,
                )),
                None => Arc::new(DirectRenderer::new(client.clone(), &self.settings)),
            },
        };

        info!(extractors = extractors.len(), "metadata manager ready");
        Ok(MetadataManager {
            extractors,
            renderer,
            settings: self.settings,
        })
    }
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs every registered extractor against one shared Content per request.
pub struct MetadataManager {
    extractors: Vec<Box<dyn Extractor>>,
    renderer: Arc<dyn Renderer>,
    settings: Settings,
}

impl fmt::Debug for MetadataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataManager")
            .field("extractors", &self.keys())
            .finish_non_exhaustive()
    }
}

impl MetadataManager {
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    /// Registered keys in registration order.
    pub fn keys(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.key()).collect()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Full Output with diagnostics; fails if any extractor fails.
    #[tracing::instrument(name = "extract", skip(self, request), fields(url = %request.url))]
    pub async fn extract_all(&self, request: &ExtractRequest) -> Result<Output, MetaError> {
        let url = parse_http_url(&request.url, "Extract")?.to_string();
        let content = match &request.payload {
            Some(payload) => Content::from_payload(url.as_str(), payload.clone()),
            None => Content::new(url.as_str(), Arc::clone(&self.renderer)),
        };
        let content = &content;

        let jobs = self.extractors.iter().map(|extractor| async move {
            let key = extractor.key().to_string();
            if content.origin() == Origin::Supplied && extractor.needs_live_page() {
                debug!(extractor = %key, "skipped for supplied payload");
                let placeholder = FieldError::new(
                    ErrorCode::UnsupportedContent,
                    "requires a live render; not run on a supplied payload",
                );
                return Ok((key, FieldOutcome::Error(placeholder)));
            }
            match extractor.extract(content).await {
                Ok(result) => Ok((key, FieldOutcome::Result(result))),
                Err(e) => {
                    error!(extractor = %key, url = %content.url(), error = %e, "extractor failed");
                    Err(e)
                }
            }
        });

        let mut output = Output::new();
        for (key, outcome) in try_join_all(jobs).await? {
            output.insert(key, outcome);
        }
        debug!(fields = output.len(), "extraction complete");
        Ok(output)
    }

    /// Output shaped for the caller: `extra` is removed unless diagnostics were requested.
    pub async fn extract(&self, request: &ExtractRequest) -> Result<Output, MetaError> {
        let output = self.extract_all(request).await?;
        Ok(if request.include_diagnostics {
            output
        } else {
            output.without_diagnostics()
        })
    }
}
