// ABOUTME: Licence extractor: counts Creative Commons licence names in the HTML.
// ABOUTME: Occurrences inside longer names are not counted again for the shorter name.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::content::Content;
use crate::error::MetaError;
use crate::extractors::Extractor;
use crate::result::ExtractorResult;

/// Licence names and their ratings.
const LICENCES: &[(&str, u8)] = &[
    ("CC0", 5),
    ("CC BY", 5),
    ("CC BY-SA", 4),
    ("CC BY-ND", 3),
    ("CC BY-NC", 3),
    ("CC BY-NC-SA", 2),
    ("CC BY-NC-ND", 1),
];

fn rating_of(name: &str) -> u8 {
    LICENCES
        .iter()
        .find(|(n, _)| *n == name)
        .map_or(0, |(_, rating)| *rating)
}

/// Occurrence counts per licence name, corrected for containment.
///
/// Names are processed longest first; each name's raw count is reduced by the
/// corrected counts of the longer names that contain it.
pub fn residual_counts(html: &str) -> BTreeMap<&'static str, usize> {
    let lower = html.to_lowercase();
    let mut names: Vec<&'static str> = LICENCES.iter().map(|(name, _)| *name).collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

    let mut residuals: BTreeMap<&'static str, usize> = BTreeMap::new();
    for name in &names {
        let needle = name.to_lowercase();
        let raw = lower.matches(needle.as_str()).count();
        let contained: usize = residuals
            .iter()
            .filter(|(longer, _)| longer.len() > name.len() && longer.to_lowercase().contains(&needle))
            .map(|(_, count)| *count)
            .sum();
        residuals.insert(*name, raw.saturating_sub(contained));
    }
    residuals
}

/// Rates the most frequent licence name found on the page.
#[derive(Debug, Clone, Copy, Default)]
pub struct Licence;

#[async_trait]
impl Extractor for Licence {
    fn key(&self) -> &str {
        "licence"
    }

    async fn extract(&self, content: &Content) -> Result<ExtractorResult, MetaError> {
        let counts = residual_counts(content.html().await?);

        // Highest count wins; ties go to the lower-rated, more restrictive licence.
        let best = counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .max_by(|(a, ca), (b, cb)| {
                ca.cmp(cb)
                    .then(rating_of(b).cmp(&rating_of(a)))
                    .then(a.len().cmp(&b.len()))
                    .then(b.cmp(a))
            });

        let result = match best {
            Some((name, count)) => ExtractorResult::new(
                rating_of(name),
                format!("Found licence {} ({} times)", name, count),
            ),
            None => ExtractorResult::new(0, "No licence found"),
        };
        let extra: serde_json::Map<String, serde_json::Value> = counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(name, count)| (name.to_string(), serde_json::Value::from(count)))
            .collect();
        Ok(result.with_extra(serde_json::Value::Object(extra)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Payload;

    fn content(html: &str) -> Content {
        Content::from_payload(
            "https://example.com/",
            Payload {
                html: html.to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn longer_name_absorbs_contained_shorter_name() {
        let counts = residual_counts("<footer>Licensed under CC BY-SA 4.0</footer>");
        assert_eq!(counts["CC BY-SA"], 1);
        assert_eq!(counts["CC BY"], 0);
    }

    #[test]
    fn standalone_shorter_name_still_counts() {
        let counts = residual_counts("<p>CC BY-SA</p><p>cc by 4.0</p>");
        assert_eq!(counts["CC BY-SA"], 1);
        assert_eq!(counts["CC BY"], 1);
    }

    #[test]
    fn nested_containment() {
        let counts = residual_counts("CC BY-NC-SA, CC BY-NC-ND and CC BY-NC");
        assert_eq!(counts["CC BY-NC-SA"], 1);
        assert_eq!(counts["CC BY-NC-ND"], 1);
        assert_eq!(counts["CC BY-NC"], 1);
        assert_eq!(counts["CC BY"], 0);
    }

    #[tokio::test]
    async fn rates_most_frequent_licence() {
        let result = Licence
            .extract(&content("CC BY-ND here, CC BY-ND there, CC0 once"))
            .await
            .unwrap();
        assert_eq!(result.rating, 3);
        assert!(result.explanation.contains("CC BY-ND"));
    }

    #[tokio::test]
    async fn tie_goes_to_more_restrictive_licence() {
        let result = Licence.extract(&content("CC BY-NC-ND and CC0")).await.unwrap();
        assert_eq!(result.rating, 1);
    }

    #[tokio::test]
    async fn equal_length_tie_picks_lower_rating() {
        let result = Licence
            .extract(&content("CC BY-SA on one page, CC BY-NC on another"))
            .await
            .unwrap();
        assert_eq!(result.rating, 3);
        assert!(result.explanation.contains("CC BY-NC"));
    }

    #[tokio::test]
    async fn no_licence_rates_zero() {
        let result = Licence.extract(&content("<html>all rights reserved</html>")).await.unwrap();
        assert_eq!(result.rating, 0);
        assert_eq!(result.extra, Some(serde_json::json!({})));
    }
}
