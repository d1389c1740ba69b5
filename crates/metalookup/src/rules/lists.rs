// ABOUTME: Downloads remote filter lists, optionally keeping a local copy on disk between runs.
// ABOUTME: A local copy is reused unless it is older than the configured maximum age.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::error::{ErrorCode, MetaError};
use crate::options::Settings;
use crate::resource::{fetch, FetchOptions};
use crate::rules::parse::{parse_meta, FilterListMeta};

/// Filter lists can be large; EasyList is several MB.
const MAX_LIST_SIZE: usize = 32 * 1024 * 1024;

/// One downloaded filter-list document.
#[derive(Debug, Clone)]
pub struct FilterList {
    pub url: String,
    pub text: String,
    pub meta: FilterListMeta,
}

impl FilterList {
    pub fn new(url: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let meta = parse_meta(&text);
        Self {
            url: url.into(),
            text,
            meta,
        }
    }
}

/// Fetches filter lists over HTTP with an optional on-disk cache.
#[derive(Debug, Clone)]
pub struct FilterListSource {
    client: reqwest::Client,
    cache_dir: Option<PathBuf>,
    max_age: Option<Duration>,
    timeout: Duration,
    allow_private_networks: bool,
}

impl FilterListSource {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            cache_dir: settings.filter_cache_dir.clone(),
            max_age: settings.filter_max_age,
            timeout: settings.filter_download_timeout,
            allow_private_networks: settings.allow_private_networks,
        }
    }

    /// Load every list concurrently. The first failure fails the whole load.
    pub async fn load_all(&self, urls: &[&str]) -> Result<Vec<FilterList>, MetaError> {
        try_join_all(urls.iter().map(|url| self.load(url))).await
    }

    pub async fn load(&self, url: &str) -> Result<FilterList, MetaError> {
        let cached = self.cache_path(url);
        if let Some(path) = cached.as_deref() {
            if self.is_fresh(path).await {
                match tokio::fs::read_to_string(path).await {
                    Ok(text) => {
                        debug!(url, path = %path.display(), "using local filter list");
                        return Ok(FilterList::new(url, text));
                    }
                    Err(e) => warn!(url, error = %e, "unreadable local filter list"),
                }
            }
        }

        match self.download(url).await {
            Ok(text) => {
                if let Some(path) = cached.as_deref() {
                    store(path, &text).await;
                }
                let list = FilterList::new(url, text);
                info!(
                    url,
                    expires = ?list.meta.expires,
                    last_modified = list.meta.last_modified.as_deref().unwrap_or("-"),
                    "filter list downloaded"
                );
                Ok(list)
            }
            Err(err) => {
                // A stale copy beats no list at all.
                if let Some(path) = cached.as_deref() {
                    if let Ok(text) = tokio::fs::read_to_string(path).await {
                        warn!(url, error = %err, "download failed, using stale local filter list");
                        return Ok(FilterList::new(url, text));
                    }
                }
                Err(err)
            }
        }
    }

    async fn download(&self, url: &str) -> Result<String, MetaError> {
        let opts = FetchOptions {
            allow_private_networks: self.allow_private_networks,
            max_body: MAX_LIST_SIZE,
            ..Default::default()
        };
        let fetched = tokio::time::timeout(self.timeout, fetch(&self.client, url, &opts))
            .await
            .map_err(|_| {
                MetaError::dependency(
                    url,
                    "FilterList",
                    Some(anyhow::anyhow!("no response within {:?}", self.timeout)),
                )
            })?;
        let result = fetched.map_err(|e| match e.code {
            ErrorCode::InvalidUrl | ErrorCode::Ssrf => e,
            _ => MetaError {
                code: ErrorCode::DependencyFailure,
                op: "FilterList".to_string(),
                ..e
            },
        })?;
        Ok(result.text_utf8(Some("text/plain; charset=utf-8")))
    }

    fn cache_path(&self, url: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(cache_file_name(url)))
    }

    async fn is_fresh(&self, path: &Path) -> bool {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return false;
        };
        let Some(max_age) = self.max_age else {
            return true;
        };
        meta.modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map_or(false, |age| age <= max_age)
    }
}

async fn store(path: &Path, text: &str) {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!(path = %parent.display(), error = %e, "cannot create filter cache dir");
            return;
        }
    }
    if let Err(e) = tokio::fs::write(path, text).await {
        warn!(path = %path.display(), error = %e, "cannot write filter list copy");
    }
}

/// File name of a list's local copy inside the filter cache directory.
pub fn cache_file_name(url: &str) -> String {
    let mut name: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    name.push_str(".txt");
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn settings(dir: Option<&Path>) -> Settings {
        let mut builder = Settings::builder().allow_private_networks(true);
        if let Some(dir) = dir {
            builder = builder.filter_cache_dir(dir);
        }
        builder.build()
    }

    #[tokio::test]
    async fn downloads_and_parses_meta() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/easylist.txt");
            then.status(200)
                .body("[Adblock Plus 2.0]\n! Expires: 2 days\n||ads.example^\n");
        });

        let source = FilterListSource::new(reqwest::Client::new(), &settings(None));
        let list = source.load(&server.url("/easylist.txt")).await.expect("load");
        mock.assert();
        assert_eq!(list.meta.expires, Some(Duration::from_secs(2 * 86_400)));
        assert!(list.text.contains("||ads.example^"));
    }

    #[tokio::test]
    async fn local_copy_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/list.txt");
            then.status(200).body("||tracker.example^\n");
        });

        let source = FilterListSource::new(reqwest::Client::new(), &settings(Some(dir.path())));
        let url = server.url("/list.txt");
        let first = source.load(&url).await.expect("first load");
        let second = source.load(&url).await.expect("second load");
        assert_eq!(first.text, second.text);
        assert_eq!(mock.calls(), 1);
        assert!(dir.path().join(cache_file_name(&url)).exists());
    }

    #[tokio::test]
    async fn host_failure_is_dependency_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/gone.txt");
            then.status(500);
        });

        let source = FilterListSource::new(reqwest::Client::new(), &settings(None));
        let err = source.load(&server.url("/gone.txt")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DependencyFailure);
    }

    #[tokio::test]
    async fn load_all_fails_as_a_whole() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/a.txt");
            then.status(200).body("||a.example^\n");
        });
        server.mock(|when, then| {
            when.method(GET).path("/b.txt");
            then.status(404);
        });

        let source = FilterListSource::new(reqwest::Client::new(), &settings(None));
        let a = server.url("/a.txt");
        let b = server.url("/b.txt");
        assert!(source.load_all(&[a.as_str()]).await.is_ok());
        assert!(source.load_all(&[a.as_str(), b.as_str()]).await.is_err());
    }

    #[tokio::test]
    async fn stalled_host_times_out_as_dependency_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/slow.txt");
            then.status(200)
                .delay(Duration::from_secs(6))
                .body("||slow.example^\n");
        });

        let settings = Settings::builder()
            .allow_private_networks(true)
            .filter_download_timeout(Duration::from_secs(1))
            .build();
        let source = FilterListSource::new(reqwest::Client::new(), &settings);
        let err = tokio::time::timeout(Duration::from_secs(4), source.load(&server.url("/slow.txt")))
            .await
            .expect("download must honour its own timeout")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DependencyFailure);
        assert_eq!(err.op, "FilterList");
    }

    #[test]
    fn cache_file_names_are_flat() {
        assert_eq!(
            cache_file_name("https://easylist.to/easylist/easylist.txt"),
            "https___easylist_to_easylist_easylist_txt.txt"
        );
    }
}
