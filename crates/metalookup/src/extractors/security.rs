// ABOUTME: Header-predicate extractors: the security header table and iframe embeddability.
// ABOUTME: A missing header counts as a failed check.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::content::Content;
use crate::error::MetaError;
use crate::extractors::Extractor;
use crate::result::ExtractorResult;

/// Headers every page should send.
const SECURITY_HEADERS: &[&str] = &[
    "cache-control",
    "content-security-policy",
    "referrer-policy",
    "strict-transport-security",
    "x-content-type-options",
    "x-frame-options",
    "x-xss-protection",
];

/// Predicate for one header's lower-cased value.
fn header_ok(name: &str, value: &str) -> bool {
    match name {
        "cache-control" => value.contains("no-cache") || value.contains("no-store"),
        "strict-transport-security" => value.contains("max-age="),
        "x-content-type-options" => value.contains("nosniff"),
        "x-frame-options" => value.contains("deny") || value.contains("sameorigin"),
        "x-xss-protection" => value.trim_start().starts_with('1') && value.contains("mode=block"),
        _ => !value.trim().is_empty(),
    }
}

/// Passed and failed header names, each sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityReport {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
}

/// Evaluate the security table against lower-cased response headers.
pub fn evaluate_security_headers(headers: &HashMap<String, String>) -> SecurityReport {
    let mut report = SecurityReport::default();
    for name in SECURITY_HEADERS {
        let ok = headers
            .get(*name)
            .map_or(false, |v| header_ok(name, &v.to_lowercase()));
        if ok {
            report.passed.push(name.to_string());
        } else {
            report.failed.push(name.to_string());
        }
    }
    report.passed.sort();
    report.failed.sort();
    report
}

/// Rates 5 only when every security header check passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityHeaders;

#[async_trait]
impl Extractor for SecurityHeaders {
    fn key(&self) -> &str {
        "security"
    }

    async fn extract(&self, content: &Content) -> Result<ExtractorResult, MetaError> {
        let report = evaluate_security_headers(content.headers().await?);
        let result = if report.failed.is_empty() {
            ExtractorResult::new(5, "All security headers are set")
        } else {
            ExtractorResult::new(
                0,
                format!("Missing or weak security headers: {}", report.failed.join(", ")),
            )
        };
        Ok(result.with_extra_set(report.passed))
    }
}

/// Rates 0 when `x-frame-options` forbids embedding in foreign frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct IFrameEmbeddable;

#[async_trait]
impl Extractor for IFrameEmbeddable {
    fn key(&self) -> &str {
        "iframe_embeddable"
    }

    async fn extract(&self, content: &Content) -> Result<ExtractorResult, MetaError> {
        let value = content
            .headers()
            .await?
            .get("x-frame-options")
            .map(|v| v.to_lowercase());
        let blocked = value
            .as_deref()
            .map_or(false, |v| v.contains("deny") || v.contains("sameorigin"));
        let result = if blocked {
            ExtractorResult::new(0, "Page forbids embedding in iframes")
        } else {
            ExtractorResult::new(5, "Page can be embedded in iframes")
        };
        Ok(result.with_extra(serde_json::Value::from(value)))
    }
}
