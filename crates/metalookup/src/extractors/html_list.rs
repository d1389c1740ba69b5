// ABOUTME: ListMatch extractor: searches the lower-cased HTML for a fixed vocabulary of markers.
// ABOUTME: Rates 0 when any marker occurs, 5 otherwise; extra lists the markers found.

use std::collections::BTreeSet;

use aho_corasick::AhoCorasick;
use async_trait::async_trait;

use crate::content::Content;
use crate::error::MetaError;
use crate::extractors::Extractor;
use crate::result::ExtractorResult;

/// Built-in vocabularies, in registration order.
pub const DEFAULT_VOCABULARIES: &[(&str, &[&str])] = &[
    ("paywalls", &["paywall", "paywalluser"]),
    (
        "regwall",
        &[
            "regwall",
            "regiwall",
            "registrationwall",
            "registration-wall",
            "register-wall",
        ],
    ),
    (
        "log_in_out",
        &["email", "psw", "password", "login", "logout", "username"],
    ),
    (
        "popup",
        &[
            "popup",
            "popuptext",
            "modal fade",
            "modal-dialog",
            "interstitial",
            "pop-up",
        ],
    ),
];

/// Literal substring search over the page HTML.
#[derive(Debug, Clone)]
pub struct ListMatch {
    key: String,
    words: Vec<String>,
    searcher: AhoCorasick,
}

impl ListMatch {
    pub fn new<S: AsRef<str>>(key: impl Into<String>, words: &[S]) -> Result<Self, MetaError> {
        let key = key.into();
        let words: Vec<String> = words
            .iter()
            .map(|w| w.as_ref().to_lowercase())
            .collect();
        if words.iter().any(|w| w.trim().is_empty()) {
            return Err(MetaError::validation(
                "",
                key.as_str(),
                Some(anyhow::anyhow!("vocabulary contains an empty word")),
            ));
        }
        let searcher = AhoCorasick::new(&words).map_err(|e| {
            MetaError::extract("", key.as_str(), Some(anyhow::anyhow!("bad vocabulary: {}", e)))
        })?;
        Ok(Self {
            key,
            words,
            searcher,
        })
    }

    /// Distinct vocabulary entries occurring in `html`, case-insensitively.
    ///
    /// Matches may overlap, so both `paywall` and `paywalluser` are reported
    /// for `paywalluser`.
    pub fn matches(&self, html: &str) -> BTreeSet<String> {
        let lower = html.to_lowercase();
        self.searcher
            .find_overlapping_iter(&lower)
            .map(|m| self.words[m.pattern().as_usize()].clone())
            .collect()
    }
}

#[async_trait]
impl Extractor for ListMatch {
    fn key(&self) -> &str {
        &self.key
    }

    async fn extract(&self, content: &Content) -> Result<ExtractorResult, MetaError> {
        let found = self.matches(content.html().await?);
        let result = if found.is_empty() {
            ExtractorResult::new(5, format!("No {} markers found", self.key))
        } else {
            let listed: Vec<&str> = found.iter().map(String::as_str).collect();
            ExtractorResult::new(0, format!("Found {} markers: {}", self.key, listed.join(", ")))
        };
        Ok(result.with_extra_set(found))
    }
}
