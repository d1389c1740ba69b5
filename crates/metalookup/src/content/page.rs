// ABOUTME: Snapshot data captured by one render of a resource: HTML, headers, cookies, sub-requests.
// ABOUTME: Also defines ResourceType, shared with the ad-block rule engine.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of resource a sub-request loaded, as reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    Document,
    Subdocument,
    Stylesheet,
    Script,
    Image,
    Font,
    Media,
    Object,
    Xhr,
    Websocket,
    Ping,
    Other,
}

impl ResourceType {
    pub const ALL: [ResourceType; 12] = [
        ResourceType::Document,
        ResourceType::Subdocument,
        ResourceType::Stylesheet,
        ResourceType::Script,
        ResourceType::Image,
        ResourceType::Font,
        ResourceType::Media,
        ResourceType::Object,
        ResourceType::Xhr,
        ResourceType::Websocket,
        ResourceType::Ping,
        ResourceType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Document => "document",
            ResourceType::Subdocument => "subdocument",
            ResourceType::Stylesheet => "stylesheet",
            ResourceType::Script => "script",
            ResourceType::Image => "image",
            ResourceType::Font => "font",
            ResourceType::Media => "media",
            ResourceType::Object => "object",
            ResourceType::Xhr => "xmlhttprequest",
            ResourceType::Websocket => "websocket",
            ResourceType::Ping => "ping",
            ResourceType::Other => "other",
        }
    }

    /// Bit used by compiled rule options.
    pub(crate) fn bit(&self) -> u16 {
        1 << (*self as u16)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ResourceType {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "document" | "main_frame" => ResourceType::Document,
            "subdocument" | "sub_frame" | "iframe" => ResourceType::Subdocument,
            "stylesheet" | "css" => ResourceType::Stylesheet,
            "script" => ResourceType::Script,
            "image" | "imageset" | "img" => ResourceType::Image,
            "font" => ResourceType::Font,
            "media" => ResourceType::Media,
            "object" | "object-subrequest" => ResourceType::Object,
            "xhr" | "xmlhttprequest" | "fetch" | "eventsource" => ResourceType::Xhr,
            "websocket" => ResourceType::Websocket,
            "ping" | "beacon" => ResourceType::Ping,
            _ => ResourceType::Other,
        }
    }
}

impl From<String> for ResourceType {
    fn from(s: String) -> Self {
        ResourceType::from(s.as_str())
    }
}

impl From<ResourceType> for String {
    fn from(t: ResourceType) -> Self {
        t.as_str().to_string()
    }
}

/// A sub-request observed while rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedRequest {
    pub url: String,
    #[serde(default = "default_resource_type", alias = "resourceType")]
    pub resource_type: ResourceType,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_resource_type() -> ResourceType {
    ResourceType::Other
}

fn default_method() -> String {
    "GET".to_string()
}

/// A response observed while rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedResponse {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// A cookie set during navigation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    /// Expiry as epoch seconds; `None` for session cookies.
    pub expires: Option<f64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

impl Cookie {
    /// Parse a raw `Set-Cookie` header value. Returns `None` without a `name=value` pair.
    pub fn parse_set_cookie(raw: &str) -> Option<Cookie> {
        let mut parts = raw.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let mut cookie = Cookie {
            name: name.to_string(),
            value: value.trim().to_string(),
            ..Default::default()
        };
        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim().to_lowercase(), Some(v.trim())),
                None => (attr.trim().to_lowercase(), None),
            };
            match (key.as_str(), val) {
                ("domain", Some(v)) => cookie.domain = Some(v.trim_start_matches('.').to_string()),
                ("path", Some(v)) => cookie.path = Some(v.to_string()),
                ("samesite", Some(v)) => cookie.same_site = Some(v.to_string()),
                ("expires", Some(v)) => {
                    cookie.expires = chrono::DateTime::parse_from_rfc2822(v)
                        .ok()
                        .map(|dt| dt.timestamp() as f64);
                }
                ("max-age", Some(v)) => {
                    if let Ok(secs) = v.parse::<i64>() {
                        cookie.expires = Some((chrono::Utc::now().timestamp() + secs) as f64);
                    }
                }
                ("httponly", _) => cookie.http_only = true,
                ("secure", _) => cookie.secure = true,
                _ => {}
            }
        }
        Some(cookie)
    }
}

/// What a renderer returns for one navigation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Rendering {
    pub html: String,
    pub status: u16,
    /// Final URL after redirects; empty when the renderer did not report one.
    pub final_url: String,
    pub headers: HashMap<String, String>,
    pub requests: Vec<ObservedRequest>,
    pub responses: Vec<ObservedResponse>,
    pub cookies: Vec<Cookie>,
}

/// Immutable snapshot held by a `Content` after its single fetch.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub final_url: String,
    pub html: String,
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub requests: Vec<ObservedRequest>,
    pub responses: Vec<ObservedResponse>,
    pub cookies: Vec<Cookie>,
}

impl Page {
    pub(crate) fn from_rendering(url: &str, rendering: Rendering) -> Self {
        let final_url = if rendering.final_url.is_empty() {
            url.to_string()
        } else {
            rendering.final_url
        };
        Self {
            url: url.to_string(),
            final_url,
            html: rendering.html,
            status: rendering.status,
            headers: rendering
                .headers
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
            requests: rendering.requests,
            responses: rendering.responses,
            cookies: rendering.cookies,
        }
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn resource_type_aliases() {
        assert_eq!(ResourceType::from("fetch"), ResourceType::Xhr);
        assert_eq!(ResourceType::from("sub_frame"), ResourceType::Subdocument);
        assert_eq!(ResourceType::from("Image"), ResourceType::Image);
        assert_eq!(ResourceType::from("manifest"), ResourceType::Other);
    }

    #[test]
    fn rendering_deserializes_service_payload() {
        let json = r#"{
            "html": "<html></html>",
            "status": 200,
            "headers": {"Content-Type": "text/html"},
            "requests": [{"url": "https://ads.example/a.js", "resourceType": "script"}],
            "cookies": [{"name": "sid", "value": "1", "httpOnly": true}]
        }"#;
        let rendering: Rendering = serde_json::from_str(json).unwrap();
        assert_eq!(rendering.requests[0].resource_type, ResourceType::Script);
        assert_eq!(rendering.requests[0].method, "GET");
        assert!(rendering.cookies[0].http_only);

        let page = Page::from_rendering("https://example.com", rendering);
        assert_eq!(page.final_url, "https://example.com");
        assert_eq!(page.header("CONTENT-TYPE"), Some("text/html"));
    }

    #[test]
    fn parse_set_cookie_attributes() {
        let cookie =
            Cookie::parse_set_cookie("id=a3fWa; Domain=.example.com; Path=/; Secure; HttpOnly; SameSite=Lax")
                .unwrap();
        assert_eq!(cookie.name, "id");
        assert_eq!(cookie.value, "a3fWa");
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert!(cookie.secure && cookie.http_only);
        assert_eq!(cookie.same_site.as_deref(), Some("Lax"));
        assert!(Cookie::parse_set_cookie("garbage").is_none());
    }
}
