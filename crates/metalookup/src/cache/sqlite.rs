// ABOUTME: Durable cache backend on SQLite via sqlx with absolute expiry timestamps.
// ABOUTME: Writes upsert; expiry is checked when an entry is read.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::cache::CacheBackend;
use crate::error::MetaError;

/// SQLite-backed cache store: one `cache(key, value, expires_at)` table.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

fn storage_error(op: &str, e: sqlx::Error) -> MetaError {
    MetaError::dependency("", op, Some(anyhow::anyhow!("cache storage: {}", e)))
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `database_url`, e.g.
    /// `sqlite://cache.db` or `sqlite::memory:`.
    pub async fn connect(database_url: &str) -> Result<Self, MetaError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| storage_error("CacheConnect", e))?
            .create_if_missing(true);

        // Each connection to an in-memory database sees its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| storage_error("CacheConnect", e))?;

        let backend = Self { pool };
        backend.run_migrations().await?;
        debug!(database_url, "sqlite cache ready");
        Ok(backend)
    }

    /// Ephemeral database, mainly for tests.
    pub async fn in_memory() -> Result<Self, MetaError> {
        Self::connect("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> Result<(), MetaError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("CacheMigrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Duration, String)>, MetaError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT value, expires_at FROM cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("CacheGet", e))?;

        let now = Utc::now().timestamp();
        Ok(row.and_then(|(value, expires_at)| {
            (expires_at > now).then(|| (Duration::from_secs((expires_at - now) as u64), value))
        }))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), MetaError> {
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
        sqlx::query(
            r#"
            INSERT INTO cache (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("CacheSet", e))?;
        Ok(())
    }

    async fn clear(&self, key: Option<&str>) -> Result<(), MetaError> {
        let query = match key {
            Some(key) => sqlx::query("DELETE FROM cache WHERE key = ?").bind(key),
            None => sqlx::query("DELETE FROM cache"),
        };
        query
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("CacheClear", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn backend(dir: &TempDir) -> SqliteBackend {
        let url = format!("sqlite://{}", dir.path().join("cache.db").display());
        SqliteBackend::connect(&url).await.unwrap()
    }

    #[tokio::test]
    async fn set_then_get_reports_remaining_ttl() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir).await;
        let ttl = Duration::from_secs(3600);
        backend.set("k", "{\"a\":1}".to_string(), ttl).await.unwrap();

        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("{\"a\":1}"));
        let (remaining, _) = backend.get_with_ttl("k").await.unwrap().unwrap();
        assert!(remaining > Duration::ZERO && remaining <= ttl);
    }

    #[tokio::test]
    async fn expired_rows_are_absent() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir).await;
        backend.set("gone", "v".to_string(), Duration::ZERO).await.unwrap();
        assert_eq!(backend.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_overwrites_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let backend = backend(&dir).await;
            let ttl = Duration::from_secs(60);
            backend.set("k", "old".to_string(), ttl).await.unwrap();
            backend.set("k", "new".to_string(), ttl).await.unwrap();
        }
        let reopened = backend(&dir).await;
        assert_eq!(reopened.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn clear_one_or_all() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let ttl = Duration::from_secs(60);
        backend.set("a", "1".to_string(), ttl).await.unwrap();
        backend.set("b", "2".to_string(), ttl).await.unwrap();

        backend.clear(Some("a")).await.unwrap();
        assert_eq!(backend.get("a").await.unwrap(), None);
        assert_eq!(backend.get("b").await.unwrap().as_deref(), Some("2"));

        backend.clear(None).await.unwrap();
        assert_eq!(backend.get("b").await.unwrap(), None);
    }
}
