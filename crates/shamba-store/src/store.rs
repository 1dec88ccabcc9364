//! SQLite-backed message log and subscription store.

mod inbound;
mod outbound;
mod subscriptions;


use shamba_core::error::ShambaError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Window within which an inbound message is linked to the outbound message
/// it is considered a reply to.
pub(crate) const REPLY_LINK_WINDOW_HOURS: i64 = 24;

/// Durable message log backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the store at the given path and run migrations.
    pub async fn new(db_path: &str) -> Result<Self, ShambaError> {
        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ShambaError::Store(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| ShambaError::Store(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| ShambaError::Store(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("Message store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> Result<Self, ShambaError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| ShambaError::Store(format!("invalid db path: {e}")))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| ShambaError::Store(format!("failed to connect to sqlite: {e}")))?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), ShambaError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| ShambaError::Store(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] =
            &[("001_init", include_str!("../migrations/001_init.sql"))];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| ShambaError::Store(format!("migration check failed: {e}")))?;

            if applied.is_none() {
                sqlx::raw_sql(sql)
                    .execute(pool)
                    .await
                    .map_err(|e| ShambaError::Store(format!("migration {name} failed: {e}")))?;
                sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                    .bind(name)
                    .execute(pool)
                    .await
                    .map_err(|e| ShambaError::Store(format!("migration {name} record failed: {e}")))?;
                info!("applied migration {name}");
            }
        }

        Ok(())
    }
}

/// Format a timestamp the way SQLite's `datetime('now')` does, so stored
/// values stay comparable with SQL-side datetime() expressions.
pub(crate) fn sql_ts(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a timestamp column written by [`sql_ts`] or `datetime('now')`.
pub(crate) fn parse_ts(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, ShambaError> {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| ShambaError::Store(format!("bad stored timestamp '{raw}': {e}")))
}
