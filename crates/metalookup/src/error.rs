// ABOUTME: Error types for metalookup including the ErrorCode taxonomy and the MetaError struct.
// ABOUTME: Provides categorized errors with convenience constructors and classification helpers.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Error codes representing the failure taxonomy of an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidUrl,
    Ssrf,
    /// Target unreachable or rendered with a non-200 status.
    ResourceUnavailable,
    /// Target rendered fine but is not HTML.
    UnsupportedContent,
    /// A collaborator (renderer, scoring service, list host) is unreachable or timed out.
    DependencyFailure,
    /// A collaborator responded but broke its contract.
    ValidationFailure,
    /// `only-if-cached` on a request that can never be cached.
    NeverCacheable,
    /// `only-if-cached` and no stored entry.
    NotCached,
    /// A background job of the same kind is already running.
    Busy,
    Extract,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidUrl => "invalid URL",
            ErrorCode::Ssrf => "SSRF blocked",
            ErrorCode::ResourceUnavailable => "resource unavailable",
            ErrorCode::UnsupportedContent => "unsupported content",
            ErrorCode::DependencyFailure => "dependency failure",
            ErrorCode::ValidationFailure => "dependency contract violated",
            ErrorCode::NeverCacheable => "request is never cacheable",
            ErrorCode::NotCached => "not found in cache",
            ErrorCode::Busy => "busy",
            ErrorCode::Extract => "extraction error",
        };
        write!(f, "{}", s)
    }
}

type SharedSource = Arc<dyn StdError + Send + Sync + 'static>;

/// The main error type for metalookup operations.
///
/// Cloneable so a single failed fetch can be handed to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub struct MetaError {
    pub code: ErrorCode,
    pub url: String,
    pub op: String,
    #[source]
    pub source: Option<SharedSource>,
}

impl fmt::Display for MetaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metalookup: {} {}: {}", self.op, self.url, self.code)?;
        if let Some(ref src) = self.source {
            write!(f, ": {}", src)?;
        }
        Ok(())
    }
}

fn share(source: Option<anyhow::Error>) -> Option<SharedSource> {
    source.map(|e| Arc::from(Box::<dyn StdError + Send + Sync>::from(e)))
}

impl MetaError {
    /// Create an error with an explicit code.
    pub fn new(
        code: ErrorCode,
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self {
            code,
            url: url.into(),
            op: op.into(),
            source: share(source),
        }
    }

    /// Create an InvalidUrl error.
    pub fn invalid_url(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ErrorCode::InvalidUrl, url, op, source)
    }

    /// Create an SSRF error.
    pub fn ssrf(url: impl Into<String>, op: impl Into<String>, source: Option<anyhow::Error>) -> Self {
        Self::new(ErrorCode::Ssrf, url, op, source)
    }

    /// Create a ResourceUnavailable error.
    pub fn unavailable(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ErrorCode::ResourceUnavailable, url, op, source)
    }

    /// Create an UnsupportedContent error.
    pub fn unsupported(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ErrorCode::UnsupportedContent, url, op, source)
    }

    /// Create a DependencyFailure error.
    pub fn dependency(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ErrorCode::DependencyFailure, url, op, source)
    }

    /// Create a ValidationFailure error.
    pub fn validation(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ErrorCode::ValidationFailure, url, op, source)
    }

    /// Create an Extract error.
    pub fn extract(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ErrorCode::Extract, url, op, source)
    }

    /// Returns true for failures the caller can fix by choosing a different URL.
    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::InvalidUrl
                | ErrorCode::Ssrf
                | ErrorCode::ResourceUnavailable
                | ErrorCode::UnsupportedContent
        )
    }

    /// Returns true for service-side failures worth retrying later.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::DependencyFailure | ErrorCode::ValidationFailure
        )
    }

    /// Returns true if this is a ResourceUnavailable error.
    pub fn is_unavailable(&self) -> bool {
        self.code == ErrorCode::ResourceUnavailable
    }

    /// Returns true if this is an UnsupportedContent error.
    pub fn is_unsupported(&self) -> bool {
        self.code == ErrorCode::UnsupportedContent
    }

    /// Returns true if this is an SSRF error.
    pub fn is_ssrf(&self) -> bool {
        self.code == ErrorCode::Ssrf
    }

    /// Message safe to show to API clients: no source chain, no internals.
    pub fn public_message(&self) -> String {
        match self.code {
            ErrorCode::ResourceUnavailable | ErrorCode::UnsupportedContent | ErrorCode::InvalidUrl => {
                format!("{}: {}", self.code, self.url)
            }
            _ => self.code.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_op_url_code_and_source() {
        let err = MetaError::unavailable(
            "https://example.com",
            "Render",
            Some(anyhow::anyhow!("HTTP status 404")),
        );
        assert_eq!(
            err.to_string(),
            "metalookup: Render https://example.com: resource unavailable: HTTP status 404"
        );
    }

    #[test]
    fn source_survives_clone() {
        let err = MetaError::dependency("u", "Score", Some(anyhow::anyhow!("timed out")));
        let cloned = err.clone();
        assert_eq!(cloned.source().map(|s| s.to_string()), Some("timed out".to_string()));
    }

    #[test]
    fn classification() {
        assert!(MetaError::unsupported("u", "op", None).is_resource_failure());
        assert!(MetaError::ssrf("u", "op", None).is_resource_failure());
        assert!(!MetaError::dependency("u", "op", None).is_resource_failure());
        assert!(MetaError::validation("u", "op", None).is_dependency_failure());
        assert!(!MetaError::extract("u", "op", None).is_dependency_failure());
    }

    #[test]
    fn public_message_hides_source() {
        let err = MetaError::dependency("u", "Render", Some(anyhow::anyhow!("secret detail")));
        assert_eq!(err.public_message(), "dependency failure");
    }
}
