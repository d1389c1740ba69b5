// ABOUTME: Runtime settings for metalookup: collaborator endpoints, timeouts, limits and cache policy.
// ABOUTME: SettingsBuilder provides a fluent API; Settings::from_env reads METALOOKUP_* variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by the content fetcher, extractors, manager and cache.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the headless rendering service. `None` falls back to a direct HTTP fetch.
    pub render_endpoint: Option<String>,
    pub render_timeout: Duration,
    /// How long the renderer waits for network quiescence before snapshotting.
    pub network_idle_timeout: Duration,
    pub accessibility_endpoint: Option<String>,
    pub accessibility_timeout: Duration,
    pub user_agent: String,
    /// TCP connect limit for every outbound request.
    pub connect_timeout: Duration,
    pub allow_private_networks: bool,
    pub file_download_timeout: Duration,
    /// Linked documents downloaded at once per request.
    pub file_download_concurrency: usize,
    pub max_file_size: usize,
    pub filter_cache_dir: Option<PathBuf>,
    pub filter_download_timeout: Duration,
    /// Maximum age of a locally cached filter list. `None` always prefers the local copy.
    pub filter_max_age: Option<Duration>,
    pub adblock_match_limit: usize,
    pub worker_threads: usize,
    pub cache_ttl: Duration,
    pub cache_database_url: Option<String>,
    pub warmup_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            render_endpoint: None,
            render_timeout: Duration::from_secs(30),
            network_idle_timeout: Duration::from_secs(5),
            accessibility_endpoint: None,
            accessibility_timeout: Duration::from_secs(60),
            user_agent: "metalookup/0.1".to_string(),
            connect_timeout: Duration::from_secs(10),
            allow_private_networks: false,
            file_download_timeout: Duration::from_secs(20),
            file_download_concurrency: 4,
            max_file_size: 10 * 1024 * 1024,
            filter_cache_dir: None,
            filter_download_timeout: Duration::from_secs(60),
            filter_max_age: None,
            adblock_match_limit: 30,
            worker_threads: 4,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            cache_database_url: None,
            warmup_concurrency: 4,
        }
    }
}

impl Settings {
    /// Start a builder from the defaults.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Read settings from `METALOOKUP_*` environment variables on top of the defaults.
    ///
    /// Unparseable numeric values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut s = Settings::default();
        if let Some(v) = var("RENDER_ENDPOINT") {
            s.render_endpoint = Some(v);
        }
        if let Some(v) = secs("RENDER_TIMEOUT") {
            s.render_timeout = v;
        }
        if let Some(v) = secs("NETWORK_IDLE_TIMEOUT") {
            s.network_idle_timeout = v;
        }
        if let Some(v) = var("ACCESSIBILITY_ENDPOINT") {
            s.accessibility_endpoint = Some(v);
        }
        if let Some(v) = secs("ACCESSIBILITY_TIMEOUT") {
            s.accessibility_timeout = v;
        }
        if let Some(v) = var("USER_AGENT") {
            s.user_agent = v;
        }
        if let Some(v) = secs("CONNECT_TIMEOUT") {
            s.connect_timeout = v;
        }
        if let Some(v) = var("ALLOW_PRIVATE_NETWORKS") {
            s.allow_private_networks = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = secs("FILE_DOWNLOAD_TIMEOUT") {
            s.file_download_timeout = v;
        }
        if let Some(v) = number("FILE_DOWNLOAD_CONCURRENCY") {
            s.file_download_concurrency = v.max(1);
        }
        if let Some(v) = number("MAX_FILE_SIZE") {
            s.max_file_size = v;
        }
        if let Some(v) = var("FILTER_CACHE_DIR") {
            s.filter_cache_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = secs("FILTER_DOWNLOAD_TIMEOUT") {
            s.filter_download_timeout = v;
        }
        if let Some(v) = secs("FILTER_MAX_AGE") {
            s.filter_max_age = Some(v);
        }
        if let Some(v) = number("ADBLOCK_MATCH_LIMIT") {
            s.adblock_match_limit = v;
        }
        if let Some(v) = number("WORKER_THREADS") {
            s.worker_threads = v.max(1);
        }
        if let Some(v) = secs("CACHE_TTL") {
            s.cache_ttl = v;
        }
        if let Some(v) = var("CACHE_DATABASE_URL") {
            s.cache_database_url = Some(v);
        }
        if let Some(v) = number("WARMUP_CONCURRENCY") {
            s.warmup_concurrency = v.max(1);
        }
        s
    }
}

fn var(name: &str) -> Option<String> {
    env::var(format!("METALOOKUP_{}", name))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn number(name: &str) -> Option<usize> {
    var(name).and_then(|v| v.parse().ok())
}

fn secs(name: &str) -> Option<Duration> {
    var(name)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Builder for constructing Settings with custom values.
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Create a new SettingsBuilder with default values.
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
        }
    }

    /// Continue building from existing settings.
    pub fn from_settings(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn render_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.settings.render_endpoint = Some(endpoint.into());
        self
    }

    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.settings.render_timeout = timeout;
        self
    }

    pub fn accessibility_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.settings.accessibility_endpoint = Some(endpoint.into());
        self
    }

    pub fn accessibility_timeout(mut self, timeout: Duration) -> Self {
        self.settings.accessibility_timeout = timeout;
        self
    }

    /// Set the User-Agent header for direct fetches and downloads.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.settings.user_agent = user_agent.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connect_timeout = timeout;
        self
    }

    /// Allow or disallow requests to private networks.
    pub fn allow_private_networks(mut self, allow: bool) -> Self {
        self.settings.allow_private_networks = allow;
        self
    }

    pub fn file_download_timeout(mut self, timeout: Duration) -> Self {
        self.settings.file_download_timeout = timeout;
        self
    }

    pub fn file_download_concurrency(mut self, concurrency: usize) -> Self {
        self.settings.file_download_concurrency = concurrency.max(1);
        self
    }

    pub fn max_file_size(mut self, bytes: usize) -> Self {
        self.settings.max_file_size = bytes;
        self
    }

    /// Persist downloaded filter lists under this directory.
    pub fn filter_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.filter_cache_dir = Some(dir.into());
        self
    }

    pub fn filter_download_timeout(mut self, timeout: Duration) -> Self {
        self.settings.filter_download_timeout = timeout;
        self
    }

    pub fn filter_max_age(mut self, max_age: Duration) -> Self {
        self.settings.filter_max_age = Some(max_age);
        self
    }

    pub fn adblock_match_limit(mut self, limit: usize) -> Self {
        self.settings.adblock_match_limit = limit;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.settings.worker_threads = threads.max(1);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.settings.cache_ttl = ttl;
        self
    }

    pub fn cache_database_url(mut self, url: impl Into<String>) -> Self {
        self.settings.cache_database_url = Some(url.into());
        self
    }

    pub fn warmup_concurrency(mut self, concurrency: usize) -> Self {
        self.settings.warmup_concurrency = concurrency.max(1);
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }
}
