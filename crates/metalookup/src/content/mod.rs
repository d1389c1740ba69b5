// ABOUTME: Per-request lazy access to a rendered resource with single-flight fetching.
// ABOUTME: Every accessor awaits the same one fetch; failures are shared, never retried.

//! Lazily fetched view of one resource.
//!
//! A [`Content`] is created per extraction request. The first accessor call
//! starts the render; concurrent and later callers await the same in-flight
//! operation and observe the identical result, success or failure.

pub mod outline;
pub mod page;
pub mod render;

use std::collections::HashMap;
use std::sync::Arc;

use scraper::Html;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::MetaError;

pub use outline::Outline;
pub use page::{Cookie, ObservedRequest, ObservedResponse, Page, Rendering, ResourceType};
pub use render::{DirectRenderer, RenderServiceClient, Renderer};

/// Content types that can be analyzed.
const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Where a Content's data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Rendered from the URL on first access.
    Rendered,
    /// Supplied by the caller; nothing is fetched.
    Supplied,
}

/// Caller-supplied page data used instead of rendering.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub html: String,
    pub headers: HashMap<String, String>,
}

/// Lazily rendered resource shared by all extractors of one request.
pub struct Content {
    url: String,
    origin: Origin,
    renderer: Option<Arc<dyn Renderer>>,
    page: OnceCell<Result<Arc<Page>, MetaError>>,
    outline: OnceCell<Arc<Outline>>,
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Content")
            .field("url", &self.url)
            .field("origin", &self.origin)
            .field("fetched", &self.page.initialized())
            .finish()
    }
}

impl Content {
    /// Content rendered from `url` on first access.
    pub fn new(url: impl Into<String>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            url: url.into(),
            origin: Origin::Rendered,
            renderer: Some(renderer),
            page: OnceCell::new(),
            outline: OnceCell::new(),
        }
    }

    /// Content built from caller-supplied HTML and headers.
    pub fn from_payload(url: impl Into<String>, payload: Payload) -> Self {
        let url = url.into();
        let rendering = Rendering {
            html: payload.html,
            status: 200,
            headers: payload.headers,
            ..Default::default()
        };
        let page = Page::from_rendering(&url, rendering);
        Self {
            url,
            origin: Origin::Supplied,
            renderer: None,
            page: OnceCell::new_with(Some(Ok(Arc::new(page)))),
            outline: OnceCell::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// The shared snapshot, fetching it if this is the first access.
    pub async fn page(&self) -> Result<Arc<Page>, MetaError> {
        self.snapshot().await.map(Arc::clone)
    }

    pub async fn html(&self) -> Result<&str, MetaError> {
        Ok(&self.snapshot().await?.html)
    }

    pub async fn status(&self) -> Result<u16, MetaError> {
        Ok(self.snapshot().await?.status)
    }

    /// Primary response headers, names lower-cased.
    pub async fn headers(&self) -> Result<&HashMap<String, String>, MetaError> {
        Ok(&self.snapshot().await?.headers)
    }

    pub async fn cookies(&self) -> Result<&[Cookie], MetaError> {
        Ok(&self.snapshot().await?.cookies)
    }

    pub async fn requests(&self) -> Result<&[ObservedRequest], MetaError> {
        Ok(&self.snapshot().await?.requests)
    }

    pub async fn responses(&self) -> Result<&[ObservedResponse], MetaError> {
        Ok(&self.snapshot().await?.responses)
    }

    /// Lower-cased host of the final URL.
    pub async fn host(&self) -> Result<String, MetaError> {
        let page = self.snapshot().await?;
        Ok(url::Url::parse(&page.final_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_default())
    }

    /// Registrable domain of the final URL, e.g. `example.co.uk` for `www.example.co.uk`.
    pub async fn domain(&self) -> Result<String, MetaError> {
        Ok(registrable_domain(&self.host().await?))
    }

    /// Links and form fields of the document, parsed once and shared.
    pub async fn outline(&self) -> Result<Arc<Outline>, MetaError> {
        let page = Arc::clone(self.snapshot().await?);
        let outline = self
            .outline
            .get_or_init(|| async move { Arc::new(Outline::parse(&page.html, &page.final_url)) })
            .await;
        Ok(Arc::clone(outline))
    }

    /// Parse the HTML and run `f` against the DOM.
    ///
    /// The parsed document is not `Send`, so it only lives inside this call.
    pub async fn with_dom<R>(&self, f: impl FnOnce(&Html) -> R) -> Result<R, MetaError> {
        let html = self.html().await?;
        let doc = Html::parse_document(html);
        Ok(f(&doc))
    }

    async fn snapshot(&self) -> Result<&Arc<Page>, MetaError> {
        match self.page.get_or_init(|| self.fetch_once()).await {
            Ok(page) => Ok(page),
            Err(e) => Err(e.clone()),
        }
    }

    async fn fetch_once(&self) -> Result<Arc<Page>, MetaError> {
        let renderer = self.renderer.as_ref().ok_or_else(|| {
            MetaError::extract(&self.url, "Content", Some(anyhow::anyhow!("no renderer")))
        })?;
        debug!(url = %self.url, "fetching content");
        let rendering = renderer.render(&self.url).await?;

        if rendering.status != 200 {
            return Err(MetaError::unavailable(
                &self.url,
                "Content",
                Some(anyhow::anyhow!("HTTP status {}", rendering.status)),
            ));
        }

        let page = Page::from_rendering(&self.url, rendering);
        if let Some(ct) = page.header("content-type") {
            if !is_html_content_type(ct) {
                return Err(MetaError::unsupported(
                    &self.url,
                    "Content",
                    Some(anyhow::anyhow!("content type {} is not HTML", ct)),
                ));
            }
        }
        debug!(
            url = %self.url,
            requests = page.requests.len(),
            cookies = page.cookies.len(),
            "content fetched"
        );
        Ok(Arc::new(page))
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    HTML_CONTENT_TYPES.contains(&mime.as_str())
}

/// Reduce a host name to its registrable domain using the Public Suffix List.
///
/// IP addresses, and names the list has no registrable part for, are returned unchanged.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();
    if host.starts_with('[') || host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }
    match psl::domain_str(&host) {
        Some(domain) => domain.to_string(),
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingRenderer {
        calls: AtomicUsize,
        status: u16,
        content_type: &'static str,
    }

    impl CountingRenderer {
        fn new(status: u16, content_type: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                status,
                content_type,
            })
        }
    }

    #[async_trait]
    impl Renderer for CountingRenderer {
        async fn render(&self, _url: &str) -> Result<Rendering, MetaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Rendering {
                html: "<html><body><p>hello</p></body></html>".to_string(),
                status: self.status,
                final_url: "https://www.example.co.uk/page".to_string(),
                headers: HashMap::from([("Content-Type".to_string(), self.content_type.to_string())]),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn concurrent_accessors_share_one_fetch() {
        let renderer = CountingRenderer::new(200, "text/html; charset=utf-8");
        let content = Content::new("https://www.example.co.uk/page", renderer.clone());

        let (a, b, c, d) = tokio::join!(
            content.html(),
            content.html(),
            content.headers(),
            content.domain()
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(c.unwrap().get("content-type").unwrap(), "text/html; charset=utf-8");
        assert_eq!(d.unwrap(), "example.co.uk");

        let _ = content.cookies().await.unwrap();
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_200_is_resource_unavailable_and_not_retried() {
        let renderer = CountingRenderer::new(404, "text/html");
        let content = Content::new("https://example.com", renderer.clone());

        let first = content.html().await.unwrap_err();
        let second = content.requests().await.unwrap_err();
        assert_eq!(first.code, ErrorCode::ResourceUnavailable);
        assert_eq!(second.code, ErrorCode::ResourceUnavailable);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_html_is_unsupported() {
        let renderer = CountingRenderer::new(200, "application/pdf");
        let content = Content::new("https://example.com/doc.pdf", renderer);
        let err = content.html().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedContent);
        assert!(err.is_unsupported());
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn payload_content_needs_no_renderer() {
        let content = Content::from_payload(
            "https://example.org/x",
            Payload {
                html: "<html><title>t</title></html>".to_string(),
                headers: HashMap::from([("X-Frame-Options".to_string(), "DENY".to_string())]),
            },
        );
        assert_eq!(content.origin(), Origin::Supplied);
        assert_eq!(content.headers().await.unwrap().get("x-frame-options").unwrap(), "DENY");
        let title = content
            .with_dom(|doc| {
                let sel = scraper::Selector::parse("title").unwrap();
                doc.select(&sel).next().map(|e| e.text().collect::<String>())
            })
            .await
            .unwrap();
        assert_eq!(title.as_deref(), Some("t"));
    }

    #[test]
    fn registrable_domain_rules() {
        assert_eq!(registrable_domain("www.example.com"), "example.com");
        assert_eq!(registrable_domain("a.b.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("127.0.0.1"), "127.0.0.1");
        assert_eq!(registrable_domain("Localhost"), "localhost");
    }

    #[test]
    fn registrable_domain_follows_public_suffixes() {
        assert_ne!(registrable_domain("foo.github.io"), registrable_domain("bar.github.io"));
        assert_eq!(registrable_domain("foo.github.io"), "foo.github.io");
        assert_eq!(registrable_domain("a.example.com.ar"), "example.com.ar");
        assert_eq!(registrable_domain("x.blogspot.com"), "x.blogspot.com");
        assert_eq!(registrable_domain("www.example.com."), "example.com");
    }

    #[tokio::test]
    async fn outline_is_parsed_once() {
        let content = Content::from_payload(
            "https://shop.example.com/cart",
            Payload {
                html: "<html><body><a href='/terms.pdf'>t</a><input name='q'></body></html>".to_string(),
                ..Default::default()
            },
        );
        let (a, b) = tokio::join!(content.outline(), content.outline());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.links, vec!["https://shop.example.com/terms.pdf".to_string()]);
        assert_eq!(a.input_fields, 1);
        assert_eq!(content.host().await.unwrap(), "shop.example.com");
        assert_eq!(content.domain().await.unwrap(), "example.com");
    }

    #[test]
    fn html_content_types() {
        assert!(is_html_content_type("text/html; charset=utf-8"));
        assert!(is_html_content_type("application/xhtml+xml"));
        assert!(!is_html_content_type("application/json"));
    }
}
