// ABOUTME: Helpers for collecting linked resource URLs from a document and reading their extensions.
// ABOUTME: URLs are resolved against the page URL; duplicates and non-http links are dropped.

use std::collections::BTreeSet;

use scraper::Html;
use url::Url;

use crate::extractors::compiled::selector;

/// Elements and attributes that reference other resources.
const LINK_SOURCES: &[(&str, &str)] = &[
    ("a[href]", "href"),
    ("link[href]", "href"),
    ("area[href]", "href"),
    ("script[src]", "src"),
    ("img[src]", "src"),
    ("iframe[src]", "src"),
    ("embed[src]", "src"),
    ("source[src]", "src"),
    ("object[data]", "data"),
    ("form[action]", "action"),
];

/// All distinct http(s) URLs the document links to, resolved against `base`.
pub fn linked_urls(doc: &Html, base: &str) -> Vec<String> {
    let base = Url::parse(base).ok();
    let mut urls = BTreeSet::new();
    for (css, attr) in LINK_SOURCES {
        let Some(sel) = selector(css) else {
            continue;
        };
        for el in doc.select(&sel) {
            let Some(raw) = el.value().attr(attr) else {
                continue;
            };
            if let Some(url) = resolve(base.as_ref(), raw) {
                urls.insert(url);
            }
        }
    }
    urls.into_iter().collect()
}

fn resolve(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let url = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Lower-cased file extension of the URL path's last segment, e.g. `pdf`.
pub fn file_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.last()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
