//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ContentRepo, TokenRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ContentRepo + TokenRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store and bring its schema up to date.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(30));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits one writer at a time; a single connection serializes
            // request handlers and the sweeper without lock errors.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout,
        };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs = query_timeout.as_secs(),
            "Opened SQLite metadata store (query timeout is advisory only)"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    /// Await a query, warning when it runs past the configured timeout.
    ///
    /// SQLite cannot cancel a running statement, so the timeout only reports.
    async fn timed<T>(
        &self,
        op: &'static str,
        query: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> MetadataResult<T> {
        let started = Instant::now();
        let result = query.await;
        let elapsed = started.elapsed();
        if elapsed > self.query_timeout {
            tracing::warn!(
                op,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.query_timeout.as_millis() as u64,
                "Metadata query exceeded timeout"
            );
        }
        Ok(result?)
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl ContentRepo for SqliteStore {
        async fn insert_content(&self, row: &ContentRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO content (
                    id, owner_id, original_name, stored_name, mime_type,
                    size_bytes, path, created_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.id)
            .bind(&row.owner_id)
            .bind(&row.original_name)
            .bind(&row.stored_name)
            .bind(&row.mime_type)
            .bind(row.size_bytes)
            .bind(&row.path)
            .bind(db_timestamp(row.created_at)?)
            .bind(db_timestamp_opt(row.expires_at)?)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, format!("content {}", row.id)))?;
            Ok(())
        }

        async fn get_content(&self, id: Uuid) -> MetadataResult<Option<ContentRow>> {
            let row = sqlx::query_as::<_, ContentRow>("SELECT * FROM content WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_content_for_owner(
            &self,
            id: Uuid,
            owner_id: &str,
        ) -> MetadataResult<Option<ContentRow>> {
            let row = sqlx::query_as::<_, ContentRow>(
                "SELECT * FROM content WHERE id = ? AND owner_id = ?",
            )
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_content_by_owner(
            &self,
            owner_id: &str,
            limit: u32,
        ) -> MetadataResult<Vec<ContentRow>> {
            self.timed(
                "list_content_by_owner",
                sqlx::query_as::<_, ContentRow>(
                    r#"
                    SELECT * FROM content
                    WHERE owner_id = ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(owner_id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool),
            )
            .await
        }

        async fn list_expired_content(
            &self,
            now: OffsetDateTime,
            after: Option<Uuid>,
            limit: u32,
        ) -> MetadataResult<Vec<ContentRow>> {
            let now = db_timestamp(now)?;
            let query = match after {
                Some(cursor) => sqlx::query_as::<_, ContentRow>(
                    r#"
                    SELECT * FROM content
                    WHERE expires_at IS NOT NULL AND expires_at <= ? AND id > ?
                    ORDER BY id
                    LIMIT ?
                    "#,
                )
                .bind(now)
                .bind(cursor)
                .bind(i64::from(limit)),
                None => sqlx::query_as::<_, ContentRow>(
                    r#"
                    SELECT * FROM content
                    WHERE expires_at IS NOT NULL AND expires_at <= ?
                    ORDER BY id
                    LIMIT ?
                    "#,
                )
                .bind(now)
                .bind(i64::from(limit)),
            };
            self.timed("list_expired_content", query.fetch_all(&self.pool))
                .await
        }

        async fn delete_content(&self, id: Uuid) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM content WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn set_content_expiry(
            &self,
            id: Uuid,
            expires_at: Option<OffsetDateTime>,
        ) -> MetadataResult<bool> {
            let result = sqlx::query("UPDATE content SET expires_at = ? WHERE id = ?")
                .bind(db_timestamp_opt(expires_at)?)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn content_path_exists(&self, path: &str) -> MetadataResult<bool> {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM content WHERE path = ?)")
                    .bind(path)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(exists)
        }

        async fn count_content(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, owner_id, token_hash, scopes, source, expires_at,
                    revoked_at, created_at, last_used_at, description
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(&token.owner_id)
            .bind(&token.token_hash)
            .bind(&token.scopes)
            .bind(&token.source)
            .bind(db_timestamp_opt(token.expires_at)?)
            .bind(db_timestamp_opt(token.revoked_at)?)
            .bind(db_timestamp(token.created_at)?)
            .bind(db_timestamp_opt(token.last_used_at)?)
            .bind(&token.description)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, format!("token {}", token.token_id)))?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_token(&self, token_id: Uuid) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_id = ?")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET last_used_at = ? WHERE token_id = ?")
                .bind(db_timestamp(used_at)?)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE tokens SET revoked_at = ? WHERE token_id = ?")
                .bind(db_timestamp(revoked_at)?)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("token {token_id}")));
            }
            Ok(())
        }

        async fn list_active_tokens_by_source(
            &self,
            source: &str,
        ) -> MetadataResult<Vec<TokenRow>> {
            let rows = sqlx::query_as::<_, TokenRow>(
                "SELECT * FROM tokens WHERE source = ? AND revoked_at IS NULL ORDER BY created_at",
            )
            .bind(source)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Content index
CREATE TABLE IF NOT EXISTS content (
    id BLOB PRIMARY KEY,
    owner_id TEXT NOT NULL,
    original_name TEXT NOT NULL,
    stored_name TEXT NOT NULL UNIQUE,
    mime_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    path TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    expires_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_content_owner_created ON content(owner_id, created_at);
CREATE INDEX IF NOT EXISTS idx_content_expires ON content(expires_at) WHERE expires_at IS NOT NULL;

-- Tokens
CREATE TABLE IF NOT EXISTS tokens (
    token_id BLOB PRIMARY KEY,
    owner_id TEXT NOT NULL,
    token_hash TEXT NOT NULL UNIQUE,
    scopes TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'config',
    expires_at TEXT,
    revoked_at TEXT,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_source ON tokens(source, revoked_at);
"#;
