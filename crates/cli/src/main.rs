// ABOUTME: Operator CLI for metalookup: extract one URL, warm the cache from a file, or clear the cache.
// ABOUTME: Settings come from METALOOKUP_* variables (and .env), overridden by command-line flags.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use metalookup::{
    CacheBackend, CacheControl, CachedExtractor, ExtractRequest, MemoryBackend, MetaError,
    MetadataManager, Settings, SettingsBuilder, SqliteBackend, Warmup,
};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "metalookup")]
#[command(about = "Rate a web resource on ads, trackers, privacy, security and accessibility")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Base URL of the headless rendering service (default: direct HTTP fetch)
    #[arg(long, global = true)]
    render_endpoint: Option<String>,

    /// Base URL of the accessibility scoring service
    #[arg(long, global = true)]
    accessibility_endpoint: Option<String>,

    /// SQLite database URL for the result cache, e.g. sqlite://cache.db
    #[arg(long, global = true)]
    cache_db: Option<String>,

    /// Directory for local copies of downloaded filter lists
    #[arg(long, global = true)]
    filter_cache_dir: Option<PathBuf>,

    /// Allow fetching from private/local networks
    #[arg(long, global = true)]
    allow_private_networks: bool,

    /// Run only these extractors (repeatable)
    #[arg(long = "only", global = true, value_name = "KEY")]
    only: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rate one URL and print the result as JSON
    Extract {
        url: String,

        /// Keep each extractor's diagnostic data
        #[arg(long)]
        diagnostics: bool,

        /// Recompute even if a cached result exists
        #[arg(long, conflicts_with = "only_if_cached")]
        no_cache: bool,

        /// Only answer from the cache
        #[arg(long)]
        only_if_cached: bool,

        /// Output compact JSON instead of pretty
        #[arg(long)]
        compact: bool,
    },
    /// Prefill the cache with the URLs listed in a file, one per line
    Warmup { file: PathBuf },
    /// Remove one cache entry, or all of them
    CacheClear { key: Option<String> },
}

fn settings(global: &GlobalArgs) -> Settings {
    let mut builder = SettingsBuilder::from_settings(Settings::from_env());
    if let Some(endpoint) = &global.render_endpoint {
        builder = builder.render_endpoint(endpoint);
    }
    if let Some(endpoint) = &global.accessibility_endpoint {
        builder = builder.accessibility_endpoint(endpoint);
    }
    if let Some(url) = &global.cache_db {
        builder = builder.cache_database_url(url);
    }
    if let Some(dir) = &global.filter_cache_dir {
        builder = builder.filter_cache_dir(dir);
    }
    if global.allow_private_networks {
        builder = builder.allow_private_networks(true);
    }
    builder.build()
}

async fn backend(settings: &Settings) -> Result<Arc<dyn CacheBackend>> {
    match settings.cache_database_url.as_deref() {
        Some(url) => Ok(Arc::new(SqliteBackend::connect(url).await?)),
        None => {
            warn!("no cache database configured, results are cached for this run only");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

async fn cached_extractor(settings: Settings, only: &[String]) -> Result<CachedExtractor> {
    let mut builder = MetadataManager::builder()
        .settings(settings.clone())
        .with_default_extractors();
    if !only.is_empty() {
        builder = builder.only(only.iter().cloned());
    }
    let manager = builder.build().await?;
    Ok(CachedExtractor::new(
        Arc::new(manager),
        backend(&settings).await?,
        settings.cache_ttl,
    ))
}

fn print_json(value: &serde_json::Value, compact: bool) -> Result<()> {
    if compact {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let settings = settings(&cli.global);

    match cli.command {
        Command::Extract {
            url,
            diagnostics,
            no_cache,
            only_if_cached,
            compact,
        } => {
            let cache = cached_extractor(settings, &cli.global.only).await?;
            let request = ExtractRequest::new(url.as_str()).with_diagnostics(diagnostics);
            let control = CacheControl {
                no_cache,
                only_if_cached,
            };
            let cached = cache.extract(&request, control).await?;
            cache.flush().await;
            print_json(
                &json!({
                    "url": url,
                    "cache": cached.status,
                    "age": cached.age,
                    "output": cached.value,
                }),
                compact,
            )
        }
        Command::Warmup { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            let urls: Vec<String> = text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect();
            if urls.is_empty() {
                return Err(anyhow!("no URLs in {}", file.display()));
            }
            let concurrency = settings.warmup_concurrency;
            let cache = cached_extractor(settings, &cli.global.only).await?;
            let report = Warmup::new(Arc::new(cache), concurrency).run(urls).await?;
            info!(stored = report.stored, failed = report.failed, "warmup done");
            print_json(&serde_json::to_value(&report)?, false)
        }
        Command::CacheClear { key } => {
            if settings.cache_database_url.is_none() {
                return Err(anyhow!("cache-clear needs --cache-db or METALOOKUP_CACHE_DATABASE_URL"));
            }
            let backend = backend(&settings).await?;
            backend.clear(key.as_deref()).await?;
            match key {
                Some(key) => eprintln!("cleared {}", key),
                None => eprintln!("cleared all entries"),
            }
            Ok(())
        }
    }
}

/// Resource failures exit with 2, collaborator failures with 3, anything else with 1.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<MetaError>() {
        Some(e) if e.is_resource_failure() => ExitCode::from(2),
        Some(e) if e.is_dependency_failure() => ExitCode::from(3),
        _ => ExitCode::from(1),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            exit_code(&err)
        }
    }
}
