// ABOUTME: Accessibility extractor: averages desktop and mobile scores from an external scoring service.
// ABOUTME: Also defines the scorer trait and its HTTP client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use crate::content::Content;
use crate::error::{ErrorCode, MetaError};
use crate::extractors::Extractor;
use crate::options::Settings;
use crate::result::ExtractorResult;

/// Lower bound of each rating, index = rating.
const RATING_THRESHOLDS: [f64; 6] = [0.0, 0.5, 0.6, 0.7, 0.8, 0.9];

/// Device profile the page is scored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Desktop,
    Mobile,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Desktop => f.write_str("desktop"),
            Strategy::Mobile => f.write_str("mobile"),
        }
    }
}

/// Scores a URL's accessibility in `[0, 1]`.
#[async_trait]
pub trait AccessibilityScorer: Send + Sync {
    async fn score(&self, url: &str, strategy: Strategy) -> Result<f64, MetaError>;
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: Option<f64>,
    error: Option<ServiceError>,
}

/// HTTP client for the scoring service: `POST {endpoint}/score` with `{url, strategy}`.
#[derive(Debug, Clone)]
pub struct AccessibilityServiceClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl AccessibilityServiceClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, settings: &Settings) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout: settings.accessibility_timeout,
        }
    }
}

#[async_trait]
impl AccessibilityScorer for AccessibilityServiceClient {
    async fn score(&self, url: &str, strategy: Strategy) -> Result<f64, MetaError> {
        debug!(url, %strategy, "requesting accessibility score");
        let response = self
            .client
            .post(format!("{}/score", self.endpoint))
            .timeout(self.timeout)
            .json(&json!({ "url": url, "strategy": strategy }))
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    anyhow::anyhow!("scoring service timed out ({})", strategy)
                } else {
                    anyhow::anyhow!("scoring service unreachable: {}", e)
                };
                MetaError::dependency(url, "Accessibility", Some(reason))
            })?;

        let status = response.status();
        let payload = response.text().await.map_err(|e| {
            MetaError::dependency(
                url,
                "Accessibility",
                Some(anyhow::anyhow!("failed to read scoring response: {}", e)),
            )
        })?;

        // Structured errors may arrive with any status.
        let parsed: ScoreResponse = match serde_json::from_str(&payload) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(MetaError::dependency(
                    url,
                    "Accessibility",
                    Some(anyhow::anyhow!("scoring service returned HTTP {}", status)),
                ));
            }
            Err(e) => {
                error!(url, %payload, "scoring payload violates contract");
                return Err(MetaError::validation(
                    url,
                    "Accessibility",
                    Some(anyhow::anyhow!("malformed scoring payload: {}", e)),
                ));
            }
        };

        if let Some(err) = parsed.error {
            let code = if err.code == "unsupported_content" {
                ErrorCode::UnsupportedContent
            } else {
                ErrorCode::DependencyFailure
            };
            return Err(MetaError::new(
                code,
                url,
                "Accessibility",
                Some(anyhow::anyhow!("{}: {}", err.code, err.message)),
            ));
        }

        match parsed.score {
            Some(score) if (0.0..=1.0).contains(&score) => Ok(score),
            other => {
                error!(url, %payload, "scoring payload violates contract");
                Err(MetaError::validation(
                    url,
                    "Accessibility",
                    Some(anyhow::anyhow!("score {:?} outside [0, 1]", other)),
                ))
            }
        }
    }
}

/// Map an averaged score to a star rating.
pub fn rating_for_score(score: f64) -> u8 {
    RATING_THRESHOLDS
        .iter()
        .rposition(|threshold| score >= *threshold)
        .unwrap_or(0) as u8
}

/// Rates the mean of the desktop and mobile scores.
#[derive(Clone)]
pub struct Accessibility {
    scorer: Arc<dyn AccessibilityScorer>,
}

impl fmt::Debug for Accessibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessibility").finish_non_exhaustive()
    }
}

impl Accessibility {
    pub fn new(scorer: Arc<dyn AccessibilityScorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Extractor for Accessibility {
    fn key(&self) -> &str {
        "accessibility"
    }

    async fn extract(&self, content: &Content) -> Result<ExtractorResult, MetaError> {
        let url = content.url();
        let (desktop, mobile) = tokio::try_join!(
            self.scorer.score(url, Strategy::Desktop),
            self.scorer.score(url, Strategy::Mobile)
        )?;
        let average = (desktop + mobile) / 2.0;
        let rating = rating_for_score(average);
        Ok(ExtractorResult::new(
            rating,
            format!("Average accessibility score {:.2}", average),
        )
        .with_extra(json!({
            "desktop": desktop,
            "mobile": mobile,
            "average": average,
        })))
    }

    fn needs_live_page(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Payload;
    use httpmock::prelude::*;

    struct FixedScorer {
        desktop: f64,
        mobile: f64,
    }

    #[async_trait]
    impl AccessibilityScorer for FixedScorer {
        async fn score(&self, _url: &str, strategy: Strategy) -> Result<f64, MetaError> {
            Ok(match strategy {
                Strategy::Desktop => self.desktop,
                Strategy::Mobile => self.mobile,
            })
        }
    }

    fn content() -> Content {
        Content::from_payload("https://example.com/", Payload::default())
    }

    fn client(server: &MockServer) -> AccessibilityServiceClient {
        let settings = Settings::builder()
            .accessibility_timeout(Duration::from_secs(2))
            .build();
        AccessibilityServiceClient::new(reqwest::Client::new(), server.base_url(), &settings)
    }

    #[test]
    fn thresholds_map_to_ratings() {
        assert_eq!(rating_for_score(0.0), 0);
        assert_eq!(rating_for_score(0.49), 0);
        assert_eq!(rating_for_score(0.5), 1);
        assert_eq!(rating_for_score(0.65), 2);
        assert_eq!(rating_for_score(0.75), 3);
        assert_eq!(rating_for_score(0.85), 4);
        assert_eq!(rating_for_score(0.9), 5);
        assert_eq!(rating_for_score(1.0), 5);
    }

    #[tokio::test]
    async fn averages_both_strategies() {
        let extractor = Accessibility::new(Arc::new(FixedScorer {
            desktop: 1.0,
            mobile: 0.7,
        }));
        let result = extractor.extract(&content()).await.unwrap();
        assert_eq!(result.rating, 4);
        let average = result.extra.unwrap()["average"].as_f64().unwrap();
        assert!((average - 0.85).abs() < 1e-9);
    }

    #[tokio::test]
    async fn service_score_is_returned() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/score");
            then.status(200).json_body(json!({"score": 0.93}));
        });
        let score = client(&server)
            .score("https://example.com/", Strategy::Mobile)
            .await
            .unwrap();
        mock.assert();
        assert_eq!(score, 0.93);
    }

    #[tokio::test]
    async fn structured_errors_are_mapped() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/score");
            then.status(422).json_body(json!({
                "error": {"code": "unsupported_content", "message": "not html"}
            }));
        });
        let err = client(&server)
            .score("https://example.com/", Strategy::Desktop)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedContent);
    }

    #[tokio::test]
    async fn rate_limit_is_dependency_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/score");
            then.status(429).json_body(json!({
                "error": {"code": "rate_limited", "message": "slow down"}
            }));
        });
        let err = client(&server)
            .score("https://example.com/", Strategy::Desktop)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DependencyFailure);
    }

    #[tokio::test]
    async fn out_of_range_score_is_validation_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/score");
            then.status(200).json_body(json!({"score": 87}));
        });
        let err = client(&server)
            .score("https://example.com/", Strategy::Desktop)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailure);
    }
}
