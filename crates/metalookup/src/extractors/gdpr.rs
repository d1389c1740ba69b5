// ABOUTME: GDPR extractor: combines privacy-related page features into an additive score.
// ABOUTME: Rates 1 when the score exceeds the threshold, 0 otherwise.

use async_trait::async_trait;
use serde::Serialize;

use crate::content::{Content, ResourceType};
use crate::error::MetaError;
use crate::extractors::Extractor;
use crate::result::ExtractorResult;

const SCORE_THRESHOLD: i32 = 2;

/// 100 days.
const MIN_HSTS_MAX_AGE: u64 = 100 * 24 * 60 * 60;

const LEGAL_NOTICE_KEYWORDS: &[&str] = &[
    "impressum",
    "imprint",
    "legal notice",
    "datenschutz",
    "privacy policy",
];

const FONT_FILE_EXTENSIONS: &[&str] = &[".woff", ".woff2", ".ttf", ".otf", ".eot"];

/// Features the score is computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GdprFeatures {
    pub https: bool,
    pub legal_notice: bool,
    pub hsts_max_age: Option<u64>,
    pub referrer_policy: bool,
    pub fonts: usize,
    pub input_fields: usize,
}

impl GdprFeatures {
    pub fn score(&self) -> i32 {
        let mut score = 0;
        if self.https {
            score += 1;
        }
        if self.legal_notice {
            score += 1;
        }
        if self.hsts_max_age.map_or(false, |age| age >= MIN_HSTS_MAX_AGE) {
            score += 1;
        }
        if self.referrer_policy {
            score += 1;
        }
        if self.fonts > 0 {
            score -= 1;
        }
        if self.input_fields > 0 {
            score -= 1;
        }
        score
    }
}

/// `max-age` directive of a Strict-Transport-Security value.
fn hsts_max_age(value: &str) -> Option<u64> {
    value.split(';').find_map(|directive| {
        let (name, seconds) = directive.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            seconds.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

fn is_font_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    FONT_FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || lower.contains("fonts.googleapis.com")
        || lower.contains("use.typekit.net")
}

/// Scores privacy posture from transport, headers and page content.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gdpr;

impl Gdpr {
    pub async fn features(&self, content: &Content) -> Result<GdprFeatures, MetaError> {
        let page = content.page().await?;
        let html_lower = page.html.to_lowercase();

        let outline = content.outline().await?;
        let font_links = outline
            .link_hrefs
            .iter()
            .filter(|href| is_font_url(href))
            .count();

        let font_requests = page
            .requests
            .iter()
            .filter(|r| r.resource_type == ResourceType::Font || is_font_url(&r.url))
            .count();
        let font_faces = html_lower.matches("@font-face").count();

        Ok(GdprFeatures {
            https: page.final_url.starts_with("https://"),
            legal_notice: LEGAL_NOTICE_KEYWORDS
                .iter()
                .any(|kw| html_lower.contains(kw)),
            hsts_max_age: page.header("strict-transport-security").and_then(hsts_max_age),
            referrer_policy: page
                .header("referrer-policy")
                .map_or(false, |v| !v.trim().is_empty()),
            fonts: font_links + font_requests + font_faces,
            input_fields: outline.input_fields,
        })
    }
}

#[async_trait]
impl Extractor for Gdpr {
    fn key(&self) -> &str {
        "gdpr"
    }

    async fn extract(&self, content: &Content) -> Result<ExtractorResult, MetaError> {
        let features = self.features(content).await?;
        let score = features.score();
        let result = if score > SCORE_THRESHOLD {
            ExtractorResult::new(1, format!("GDPR score {} is above {}", score, SCORE_THRESHOLD))
        } else {
            ExtractorResult::new(
                0,
                format!("GDPR score {} does not exceed {}", score, SCORE_THRESHOLD),
            )
        };
        let extra = serde_json::to_value(&features).map_err(|e| {
            MetaError::extract(content.url(), "gdpr", Some(anyhow::anyhow!(e)))
        })?;
        Ok(result.with_extra(extra))
    }
}
