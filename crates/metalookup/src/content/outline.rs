// ABOUTME: One-pass summary of the parsed document shared by the DOM-based extractors.
// ABOUTME: Built once per Content so the HTML is parsed a single time per request.

use scraper::Html;

use crate::extractors::compiled::selector;
use crate::extractors::links::linked_urls;

/// What the extractors need from the document tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    /// Distinct http(s) URLs the document references, resolved against the final URL.
    pub links: Vec<String>,
    /// Raw `href` values of `<link>` elements.
    pub link_hrefs: Vec<String>,
    /// Visible form fields: non-hidden `input` and `textarea`.
    pub input_fields: usize,
}

impl Outline {
    pub fn parse(html: &str, base_url: &str) -> Self {
        let doc = Html::parse_document(html);
        let link_hrefs = selector("link[href]")
            .map(|sel| {
                doc.select(&sel)
                    .filter_map(|el| el.value().attr("href"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let input_fields = selector("input:not([type=hidden]), textarea")
            .map(|sel| doc.select(&sel).count())
            .unwrap_or(0);
        Self {
            links: linked_urls(&doc, base_url),
            link_hrefs,
            input_fields,
        }
    }
}
