// ABOUTME: Plain HTTP fetching with SSRF protection, body-size limits and charset decoding.
// ABOUTME: Backs the direct renderer, linked-file downloads and filter-list downloads.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use ipnet::IpNet;
use once_cell::sync::Lazy;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::HeaderMap;

use crate::error::{ErrorCode, MetaError};
use crate::options::Settings;

/// Body size cap used when a caller does not set one (10 MB).
pub const DEFAULT_MAX_BODY: usize = 10 * 1024 * 1024;

const MAX_REDIRECTS: usize = 10;

/// Address ranges a request may never reach unless private networks are allowed.
static BLOCKED_NETWORKS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "::/128",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|cidr| cidr.parse().ok())
    .collect()
});

/// Per-call knobs for [`fetch`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Extra request headers.
    pub headers: HashMap<String, String>,
    pub allow_private_networks: bool,
    /// Return non-200 responses instead of failing on them.
    pub parse_non_200: bool,
    pub max_body: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            allow_private_networks: false,
            parse_non_200: false,
            max_body: DEFAULT_MAX_BODY,
        }
    }
}

/// A downloaded response body together with what the server said about it.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    /// URL as requested.
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    pub content_type: Option<String>,
    /// Response headers with lower-cased names; repeated headers are joined with ", ".
    pub headers: HashMap<String, String>,
    /// Raw `Set-Cookie` values in arrival order.
    pub set_cookies: Vec<String>,
    pub body: Bytes,
}

impl FetchResult {
    /// Body as text. `content_type_hint` overrides the response's own content type.
    pub fn text_utf8(&self, content_type_hint: Option<&str>) -> String {
        decode_body(
            &self.body,
            content_type_hint.or(self.content_type.as_deref()),
        )
    }
}

pub(crate) fn is_private_ip(addr: &IpAddr) -> bool {
    let addr = match addr {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(*v6)),
        v4 => *v4,
    };
    BLOCKED_NETWORKS.iter().any(|net| net.contains(&addr))
}

/// Decode with the declared charset when it is known, otherwise guess it.
pub(crate) fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    let declared = content_type
        .and_then(charset_label)
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()));
    let encoding = declared.unwrap_or_else(|| {
        let mut detector = chardetng::EncodingDetector::new();
        detector.feed(body, true);
        detector.guess(None, true)
    });
    encoding.decode(body).0.into_owned()
}

/// The `charset` parameter of a content type, lower-cased and unquoted.
fn charset_label(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c| c == '"' || c == '\'').to_lowercase())
    })
}

fn blocked(url: &str, op: &str) -> MetaError {
    MetaError::ssrf(
        url,
        op,
        Some(anyhow::anyhow!("target resolves to a private address")),
    )
}

/// Reject URLs whose host is, or resolves to, a private address.
pub(crate) async fn guard_private(url: &url::Url, op: &str) -> Result<(), MetaError> {
    let Some(host) = url.host_str() else {
        return Ok(());
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return if is_private_ip(&ip) {
            Err(blocked(url.as_str(), op))
        } else {
            Ok(())
        };
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let mut resolved = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        MetaError::unavailable(
            url.as_str(),
            op,
            Some(anyhow::anyhow!("cannot resolve {}: {}", host, e)),
        )
    })?;
    if resolved.any(|addr| is_private_ip(&addr.ip())) {
        return Err(blocked(url.as_str(), op));
    }
    Ok(())
}

/// Parse a URL and require an http(s) scheme.
pub(crate) fn parse_http_url(url: &str, op: &str) -> Result<url::Url, MetaError> {
    if url.is_empty() {
        return Err(MetaError::invalid_url(url, op, None));
    }
    let parsed = url::Url::parse(url).map_err(|e| {
        MetaError::invalid_url(url, op, Some(anyhow::anyhow!("invalid URL: {}", e)))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(MetaError::invalid_url(
            url,
            op,
            Some(anyhow::anyhow!("unsupported scheme {:?}", other)),
        )),
    }
}

/// Whether a redirect target may be followed when private networks are off.
///
/// Only literal addresses are checked here; host names are filtered by
/// [`PublicResolver`] when the connection is made.
fn redirect_allowed(target: &url::Url) -> Result<(), &'static str> {
    let Some(host) = target.host_str() else {
        return Ok(());
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    match host.parse::<IpAddr>() {
        Ok(ip) if is_private_ip(&ip) => Err("redirect into a private network"),
        _ => Ok(()),
    }
}

/// DNS resolver that drops private addresses, failing names that only resolve to them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicResolver;

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_public(name.as_str().to_string()))
    }
}

async fn resolve_public(host: String) -> Result<Addrs, Box<dyn std::error::Error + Send + Sync>> {
    let public: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await?
        .filter(|addr| !is_private_ip(&addr.ip()))
        .collect();
    if public.is_empty() {
        return Err(format!("{} resolves only to private addresses", host).into());
    }
    Ok(Box::new(public.into_iter()))
}

/// Build the shared HTTP client.
///
/// Redirects into private address space are refused unless `allow_private_networks` is set.
pub fn http_client(settings: &Settings) -> Result<reqwest::Client, MetaError> {
    let allow_private = settings.allow_private_networks;
    let policy = reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        if allow_private {
            return attempt.follow();
        }
        match redirect_allowed(attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(reason) => attempt.error(reason),
        }
    });

    let mut builder = reqwest::Client::builder()
        .redirect(policy)
        .connect_timeout(settings.connect_timeout)
        .user_agent(&settings.user_agent)
        .cookie_store(true)
        .gzip(true)
        .brotli(true)
        .deflate(true);
    if !allow_private {
        builder = builder.dns_resolver(Arc::new(PublicResolver));
    }
    builder.build()
        .map_err(|e| {
            MetaError::new(
                ErrorCode::Extract,
                "",
                "HttpClient",
                Some(anyhow::anyhow!("cannot build HTTP client: {}", e)),
            )
        })
}

/// Flatten response headers; `Set-Cookie` values are also kept one by one.
fn collect_headers(raw: &HeaderMap) -> (HashMap<String, String>, Vec<String>) {
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut set_cookies = Vec::new();
    for (name, value) in raw {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if *name == reqwest::header::SET_COOKIE {
            set_cookies.push(value.to_string());
        }
        headers
            .entry(name.as_str().to_lowercase())
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    (headers, set_cookies)
}

fn too_large(url: &str, size: u64, limit: usize) -> MetaError {
    MetaError::unavailable(
        url,
        "Fetch",
        Some(anyhow::anyhow!("body of {} bytes exceeds the {} byte limit", size, limit)),
    )
}

/// GET `url` and buffer its body.
///
/// Transport failures and non-200 statuses are resource-level failures; callers that fetch
/// from collaborators remap the code.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    opts: &FetchOptions,
) -> Result<FetchResult, MetaError> {
    let target = parse_http_url(url, "Fetch")?;
    if !opts.allow_private_networks {
        guard_private(&target, "Fetch").await?;
    }

    let request = opts
        .headers
        .iter()
        .fold(client.get(target), |req, (name, value)| req.header(name, value));
    let response = request.send().await.map_err(|e| {
        MetaError::unavailable(url, "Fetch", Some(anyhow::anyhow!("request failed: {}", e)))
    })?;
    if !opts.allow_private_networks {
        guard_private(response.url(), "Fetch").await?;
    }

    if let Some(declared) = response.content_length() {
        if declared > opts.max_body as u64 {
            return Err(too_large(url, declared, opts.max_body));
        }
    }

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let (headers, set_cookies) = collect_headers(response.headers());

    let body = response.bytes().await.map_err(|e| {
        MetaError::unavailable(url, "Fetch", Some(anyhow::anyhow!("body read failed: {}", e)))
    })?;
    if body.len() > opts.max_body {
        return Err(too_large(url, body.len() as u64, opts.max_body));
    }

    if status != 200 && !opts.parse_non_200 {
        return Err(MetaError::unavailable(
            url,
            "Fetch",
            Some(anyhow::anyhow!("server answered {}", status)),
        ));
    }

    Ok(FetchResult {
        status,
        url: url.to_string(),
        final_url,
        content_type: headers.get("content-type").map(|ct| ct.to_lowercase()),
        headers,
        set_cookies,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;

    fn client() -> reqwest::Client {
        http_client(&Settings::builder().allow_private_networks(true).build()).unwrap()
    }

    fn open() -> FetchOptions {
        FetchOptions {
            allow_private_networks: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn headers_are_lowercased_and_cookies_kept() {
        let server = MockServer::start();
        let page = server.mock(|when, then| {
            when.method(GET).path("/page").header("x-trace", "1");
            then.status(200)
                .header("Content-Type", "text/html; charset=utf-8")
                .header("X-Frame-Options", "DENY")
                .header("Set-Cookie", "sid=abc; Path=/")
                .body("<p>ok</p>");
        });

        let opts = FetchOptions {
            headers: HashMap::from([("x-trace".to_string(), "1".to_string())]),
            ..open()
        };
        let result = fetch(&client(), &server.url("/page"), &opts).await.unwrap();
        page.assert();

        assert_eq!(result.text_utf8(None), "<p>ok</p>");
        assert_eq!(result.content_type.as_deref(), Some("text/html; charset=utf-8"));
        assert_eq!(result.headers["x-frame-options"], "DENY");
        assert_eq!(result.set_cookies, vec!["sid=abc; Path=/".to_string()]);
    }

    #[tokio::test]
    async fn error_statuses() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404).body("nope");
        });
        let url = server.url("/missing");

        let err = fetch(&client(), &url, &open()).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(err.url, url);

        let lenient = FetchOptions {
            parse_non_200: true,
            ..open()
        };
        let result = fetch(&client(), &url, &lenient).await.unwrap();
        assert_eq!(result.status, 404);
        assert_eq!(result.text_utf8(None), "nope");
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/big");
            then.status(200).body("x".repeat(64));
        });

        let opts = FetchOptions {
            max_body: 16,
            ..open()
        };
        let err = fetch(&client(), &server.url("/big"), &opts).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn loopback_needs_private_networks() {
        let server = MockServer::start();
        let url = format!("http://127.0.0.1:{}/", server.port());
        let err = fetch(&client(), &url, &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_ssrf());
    }

    #[tokio::test]
    async fn only_http_schemes() {
        for url in ["ftp://example.com/x", "file:///etc/passwd", ""] {
            let err = fetch(&client(), url, &open()).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidUrl, "{}", url);
        }
    }

    #[tokio::test]
    async fn resolver_drops_private_answers() {
        let name: Name = "localhost".parse().unwrap();
        let err = PublicResolver.resolve(name).await.err().expect("loopback only");
        assert!(err.to_string().contains("private"));
    }

    #[test]
    fn redirect_policy_checks_literal_addresses() {
        let private = url::Url::parse("http://10.0.0.8/admin").unwrap();
        let public = url::Url::parse("http://93.184.216.34/").unwrap();
        let named = url::Url::parse("https://example.com/next").unwrap();
        assert!(redirect_allowed(&private).is_err());
        assert!(redirect_allowed(&public).is_ok());
        assert!(redirect_allowed(&named).is_ok());
    }

    #[test]
    fn private_ranges() {
        for ip in ["10.1.2.3", "100.64.0.1", "172.20.0.1", "192.168.1.1", "127.0.0.53", "::1", "fd12::1", "::ffff:192.168.0.1"] {
            assert!(is_private_ip(&ip.parse().unwrap()), "{}", ip);
        }
        for ip in ["1.1.1.1", "172.32.0.1", "2606:4700::1111"] {
            assert!(!is_private_ip(&ip.parse().unwrap()), "{}", ip);
        }
    }

    #[test]
    fn charset_handling() {
        assert_eq!(charset_label("text/html; Charset=\"UTF-8\"").as_deref(), Some("utf-8"));
        assert_eq!(charset_label("text/plain"), None);
        assert_eq!(decode_body(&[0x4e, 0x69, 0xf1, 0x6f], Some("text/html; charset=latin1")), "Niño");
        assert_eq!(decode_body(b"plain ascii", None), "plain ascii");
    }
}
