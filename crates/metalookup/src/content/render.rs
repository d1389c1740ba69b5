// ABOUTME: Renderer collaborators that turn a URL into a Rendering snapshot.
// ABOUTME: RenderServiceClient calls the headless-browser service; DirectRenderer does a plain fetch.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use crate::content::page::{Cookie, ObservedResponse, Rendering};
use crate::error::MetaError;
use crate::options::Settings;
use crate::resource::{fetch, FetchOptions};

/// Produces a rendered snapshot of a URL.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<Rendering, MetaError>;
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    timeout_ms: u64,
    network_idle_ms: u64,
}

/// Client for the external headless-browser rendering service.
///
/// The service answers `POST {endpoint}/render` with a JSON `Rendering`.
#[derive(Debug, Clone)]
pub struct RenderServiceClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    network_idle: Duration,
}

impl RenderServiceClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, settings: &Settings) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout: settings.render_timeout,
            network_idle: settings.network_idle_timeout,
        }
    }
}

#[async_trait]
impl Renderer for RenderServiceClient {
    async fn render(&self, url: &str) -> Result<Rendering, MetaError> {
        let body = RenderRequest {
            url,
            timeout_ms: self.timeout.as_millis() as u64,
            network_idle_ms: self.network_idle.as_millis() as u64,
        };
        debug!(url, endpoint = %self.endpoint, "rendering");

        // The service waits up to `timeout` for the page; allow it a little slack on top.
        let response = self
            .client
            .post(format!("{}/render", self.endpoint))
            .timeout(self.timeout + Duration::from_secs(5))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    anyhow::anyhow!("render service timed out")
                } else {
                    anyhow::anyhow!("render service unreachable: {}", e)
                };
                MetaError::dependency(url, "Render", Some(reason))
            })?;

        let status = response.status();
        let payload = response.text().await.map_err(|e| {
            MetaError::dependency(
                url,
                "Render",
                Some(anyhow::anyhow!("failed to read render response: {}", e)),
            )
        })?;

        if !status.is_success() {
            return Err(MetaError::dependency(
                url,
                "Render",
                Some(anyhow::anyhow!("render service returned HTTP {}", status)),
            ));
        }

        serde_json::from_str::<Rendering>(&payload).map_err(|e| {
            error!(url, %payload, "render service payload violates contract");
            MetaError::validation(
                url,
                "Render",
                Some(anyhow::anyhow!("malformed render payload: {}", e)),
            )
        })
    }
}

/// Renders by fetching the URL directly. No script execution, so no sub-requests are observed.
#[derive(Debug, Clone)]
pub struct DirectRenderer {
    client: reqwest::Client,
    allow_private_networks: bool,
    timeout: Duration,
}

impl DirectRenderer {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            allow_private_networks: settings.allow_private_networks,
            timeout: settings.render_timeout,
        }
    }
}

#[async_trait]
impl Renderer for DirectRenderer {
    async fn render(&self, url: &str) -> Result<Rendering, MetaError> {
        let opts = FetchOptions {
            allow_private_networks: self.allow_private_networks,
            parse_non_200: true,
            ..Default::default()
        };
        let result = tokio::time::timeout(self.timeout, fetch(&self.client, url, &opts))
            .await
            .map_err(|_| {
                MetaError::unavailable(
                    url,
                    "Render",
                    Some(anyhow::anyhow!("no response within {:?}", self.timeout)),
                )
            })??;
        let html = result.text_utf8(None);
        let cookies = result
            .set_cookies
            .iter()
            .filter_map(|raw| Cookie::parse_set_cookie(raw))
            .collect();

        Ok(Rendering {
            html,
            status: result.status,
            final_url: result.final_url.clone(),
            responses: vec![ObservedResponse {
                url: result.final_url,
                status: result.status,
                headers: result.headers.clone(),
            }],
            headers: result.headers,
            requests: Vec::new(),
            cookies,
        })
    }
}
