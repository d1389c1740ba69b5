// ABOUTME: AdBlockMatch extractor: tests observed sub-requests against merged filter lists.
// ABOUTME: Lists are downloaded and compiled once in setup; scans run on the worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::content::Content;
use crate::error::MetaError;
use crate::extractors::{Extractor, ExtractorContext};
use crate::pool::WorkerPool;
use crate::result::ExtractorResult;
use crate::rules::{FilterListSource, FilterRuleSet};

/// Filter lists per extractor key, in registration order.
pub const DEFAULT_LISTS: &[(&str, &[&str])] = &[
    (
        "advertisement",
        &[
            "https://easylist.to/easylist/easylist.txt",
            "https://easylist.to/easylistgermany/easylistgermany.txt",
        ],
    ),
    ("easy_privacy", &["https://easylist.to/easylist/easyprivacy.txt"]),
    ("cookies", &["https://secure.fanboy.co.nz/fanboy-cookiemonster.txt"]),
    ("fanboy_annoyance", &["https://secure.fanboy.co.nz/fanboy-annoyance.txt"]),
    (
        "fanboy_notification",
        &["https://easylist-downloads.adblockplus.org/fanboy-notifications.txt"],
    ),
    ("fanboy_social_media", &["https://easylist.to/easylist/fanboy-social.txt"]),
    (
        "anti_adblock",
        &["https://easylist-downloads.adblockplus.org/antiadblockfilters.txt"],
    ),
    (
        "easylist_adult",
        &["https://easylist-downloads.adblockplus.org/easylist_adult.txt"],
    ),
];

/// Rates 0 when any observed sub-request is blocked by the lists, 5 otherwise.
#[derive(Debug)]
pub struct AdBlockMatch {
    key: String,
    list_urls: Vec<String>,
    source: Option<FilterListSource>,
    rules: Option<Arc<FilterRuleSet>>,
    match_limit: usize,
    pool: WorkerPool,
}

impl AdBlockMatch {
    /// Extractor whose lists are downloaded during `setup`.
    pub fn new(key: impl Into<String>, list_urls: &[&str], ctx: &ExtractorContext) -> Self {
        Self {
            key: key.into(),
            list_urls: list_urls.iter().map(|u| u.to_string()).collect(),
            source: Some(FilterListSource::new(ctx.client.clone(), &ctx.settings)),
            rules: None,
            match_limit: ctx.settings.adblock_match_limit,
            pool: ctx.pool.clone(),
        }
    }

    /// Extractor over an already compiled rule set; `setup` does nothing.
    pub fn with_rules(
        key: impl Into<String>,
        rules: Arc<FilterRuleSet>,
        match_limit: usize,
        pool: WorkerPool,
    ) -> Self {
        Self {
            key: key.into(),
            list_urls: Vec::new(),
            source: None,
            rules: Some(rules),
            match_limit,
            pool,
        }
    }
}

#[async_trait]
impl Extractor for AdBlockMatch {
    fn key(&self) -> &str {
        &self.key
    }

    async fn setup(&mut self) -> Result<(), MetaError> {
        let Some(source) = self.source.as_ref() else {
            return Ok(());
        };
        let urls: Vec<&str> = self.list_urls.iter().map(String::as_str).collect();
        let lists = source.load_all(&urls).await?;
        let rules = self
            .pool
            .run("FilterRuleSet", move || FilterRuleSet::from_lists(&lists))
            .await?;
        let stats = rules.stats();
        info!(
            extractor = %self.key,
            lists = urls.len(),
            blocking = stats.blocking,
            exceptions = stats.exceptions,
            skipped = stats.cosmetic + stats.comments + stats.unsupported + stats.invalid,
            "filter rules compiled"
        );
        self.rules = Some(Arc::new(rules));
        Ok(())
    }

    async fn extract(&self, content: &Content) -> Result<ExtractorResult, MetaError> {
        let rules = self.rules.clone().ok_or_else(|| {
            MetaError::extract(
                content.url(),
                self.key.as_str(),
                Some(anyhow::anyhow!("filter rules not set up")),
            )
        })?;
        let page = content.page().await?;
        let host = content.host().await?;
        let limit = self.match_limit;

        let hits = self
            .pool
            .run(&self.key, move || rules.scan(&page.requests, &host, limit))
            .await
            .map_err(|e| MetaError {
                url: content.url().to_string(),
                ..e
            })?;

        let blocked: Vec<String> = hits.into_iter().map(|hit| hit.url).collect();
        let result = if blocked.is_empty() {
            ExtractorResult::new(5, format!("No requests matched the {} filters", self.key))
        } else {
            ExtractorResult::new(
                0,
                format!(
                    "{}{} requests matched the {} filters",
                    blocked.len().min(limit),
                    if blocked.len() > limit { "+" } else { "" },
                    self.key
                ),
            )
        };
        Ok(result.with_extra(serde_json::Value::from(blocked)))
    }

    fn needs_live_page(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ObservedRequest, Rendering, Renderer, ResourceType};
    use crate::options::Settings;
    use httpmock::prelude::*;
    use std::collections::HashMap;

    struct FixedRenderer(Vec<ObservedRequest>);

    #[async_trait]
    impl Renderer for FixedRenderer {
        async fn render(&self, _url: &str) -> Result<Rendering, MetaError> {
            Ok(Rendering {
                html: "<html></html>".to_string(),
                status: 200,
                final_url: "https://www.news.com/story".to_string(),
                headers: HashMap::from([("content-type".to_string(), "text/html".to_string())]),
                requests: self.0.clone(),
                ..Default::default()
            })
        }
    }

    fn content(urls: &[&str]) -> Content {
        let requests = urls
            .iter()
            .map(|u| ObservedRequest {
                url: u.to_string(),
                resource_type: ResourceType::Script,
                method: "GET".to_string(),
            })
            .collect();
        Content::new("https://www.news.com/story", Arc::new(FixedRenderer(requests)))
    }

    fn extractor(list: &str, limit: usize) -> AdBlockMatch {
        let rules = Arc::new(FilterRuleSet::from_texts([list]));
        AdBlockMatch::with_rules("advertisement", rules, limit, WorkerPool::new(1))
    }

    #[tokio::test]
    async fn blocked_request_rates_zero() {
        let e = extractor("||ads.example.com^\n", 30);
        let result = e
            .extract(&content(&[
                "https://www.news.com/app.js",
                "https://ads.example.com/serve.js",
            ]))
            .await
            .unwrap();
        assert_eq!(result.rating, 0);
        assert_eq!(result.extra_strings(), vec!["https://ads.example.com/serve.js"]);
    }

    #[tokio::test]
    async fn clean_requests_rate_five() {
        let e = extractor("||ads.example.com^\n", 30);
        let result = e
            .extract(&content(&["https://www.news.com/app.js"]))
            .await
            .unwrap();
        assert_eq!(result.rating, 5);
        assert!(result.extra_strings().is_empty());
    }

    #[tokio::test]
    async fn scanning_stops_past_the_limit() {
        let e = extractor("||ads.example.com^\n", 2);
        let urls: Vec<String> = (0..8)
            .map(|i| format!("https://ads.example.com/{}.js", i))
            .collect();
        let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
        let result = e.extract(&content(&refs)).await.unwrap();
        assert_eq!(result.rating, 0);
        assert_eq!(result.extra_strings().len(), 3);
        assert!(result.explanation.starts_with("2+"));
    }

    #[tokio::test]
    async fn extract_before_setup_fails() {
        let ctx = ExtractorContext {
            settings: Settings::default(),
            client: reqwest::Client::new(),
            pool: WorkerPool::new(1),
        };
        let e = AdBlockMatch::new("advertisement", &["https://lists.invalid/a.txt"], &ctx);
        assert!(e.extract(&content(&[])).await.is_err());
    }

    #[tokio::test]
    async fn setup_downloads_and_compiles_lists() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/a.txt");
            then.status(200).body("! Expires: 1 days\n||tracker.example^\n");
        });
        server.mock(|when, then| {
            when.method(GET).path("/b.txt");
            then.status(200).body("||ads.example.com^\n||tracker.example^\n");
        });

        let ctx = ExtractorContext {
            settings: Settings::builder().allow_private_networks(true).build(),
            client: reqwest::Client::new(),
            pool: WorkerPool::new(1),
        };
        let a = server.url("/a.txt");
        let b = server.url("/b.txt");
        let mut e = AdBlockMatch::new("easy_privacy", &[a.as_str(), b.as_str()], &ctx);
        e.setup().await.expect("setup");

        let result = e
            .extract(&content(&["https://tracker.example/pixel.js"]))
            .await
            .unwrap();
        assert_eq!(result.rating, 0);
    }
}
