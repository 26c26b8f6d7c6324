// crates/db/src/lib.rs
//! Durable job store for ferry, backed by SQLite.
//!
//! Every mutation is a single guarded statement on a pool opened with
//! `synchronous = FULL`, so a write that returned `Ok` survives a crash.
//! The schema version lives in SQLite's own `user_version` pragma.

mod migrations;
mod queries;

pub use queries::jobs::{JobFilter, JobOutcome, NewJob, ProgressUpdate, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ferry_core::JobId;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

const POOL_SIZE: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const SLOW_STATEMENT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),

    #[error("Corrupt row for job {id}: {message}")]
    CorruptRow { id: JobId, message: String },
}

pub type DbResult<T> = Result<T, DbError>;

/// Handle to the job store. Clones share one pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl Database {
    /// Open the store file at `path`, creating it and its directory if
    /// needed, and bring the schema up to date.
    pub async fn new(path: &Path) -> DbResult<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT)
            .log_slow_statements(tracing::log::LevelFilter::Warn, SLOW_STATEMENT);

        let db = Self::connect(options, Some(path.to_owned())).await?;
        info!(path = %path.display(), "job store opened");
        Ok(db)
    }

    /// A private in-memory store, for tests. Pool connections share one
    /// database through the shared cache.
    pub async fn new_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .shared_cache(true)
            .busy_timeout(Duration::from_secs(5));
        Self::connect(options, None).await
    }

    async fn connect(options: SqliteConnectOptions, path: Option<PathBuf>) -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await?;
        let db = Self { pool, path };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply every migration past the stored `user_version`, each in its own
    /// transaction together with the version bump.
    async fn migrate(&self) -> DbResult<()> {
        let (applied,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        let applied = usize::try_from(applied).unwrap_or(0);

        for (index, sql) in migrations::MIGRATIONS.iter().enumerate().skip(applied) {
            let version = index + 1;
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql).execute(&mut *tx).await?;
            let bump = format!("PRAGMA user_version = {version}");
            sqlx::raw_sql(&bump).execute(&mut *tx).await?;
            tx.commit().await?;
            debug!(version, "store migration applied");
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The backing file; `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn schema_version(db: &Database) -> i64 {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(db.pool())
            .await
            .unwrap();
        version
    }

    #[tokio::test]
    async fn test_fresh_store_has_empty_jobs_table() {
        let db = Database::new_in_memory().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(schema_version(&db).await as usize, migrations::MIGRATIONS.len());
        assert!(db.path().is_none());
    }

    #[tokio::test]
    async fn test_migrate_twice_is_a_no_op() {
        let db = Database::new_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        assert_eq!(schema_version(&db).await as usize, migrations::MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ferry.db");

        let db = Database::new(&path).await.unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
        sqlx::query(
            "INSERT INTO jobs (operation, source, destination, created_at) VALUES ('copy', 'a', 'b', 0)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        db.close().await;

        let reopened = Database::new(&path).await.unwrap();
        let (count, attempt): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), MAX(attempt) FROM jobs")
                .fetch_one(reopened.pool())
                .await
                .unwrap();
        assert_eq!((count, attempt), (1, 1));
        assert_eq!(schema_version(&reopened).await as usize, migrations::MIGRATIONS.len());
    }
}
