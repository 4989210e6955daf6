//! # Cache Database Handle
//!
//! Owns the SQLite connection pool behind an explicit lifecycle:
//! [`CacheDatabase::open`] connects and migrates, [`CacheDatabase::close`]
//! waits for in-flight operations and shuts the pool down. Every operation
//! issued after close fails with [`CacheError::NotInitialized`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_cache::{CacheConfig, CacheDatabase};
//!
//! let db = CacheDatabase::open(&CacheConfig::in_memory()).await?;
//! let version = db.schema_version().await?;
//! db.close().await;
//! ```

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::schema;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, instrument, warn};

/// Database configuration for the SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// sqlx database URL, e.g. `sqlite:songbook.db` or `sqlite::memory:`
    pub database_url: String,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    /// Maximum idle time for a connection before being closed
    pub idle_timeout: Option<Duration>,

    /// Number of prepared statements cached per connection
    pub statement_cache_capacity: usize,
}

impl DatabaseConfig {
    /// Configuration for a database file at `database_path`.
    pub fn new(database_path: impl AsRef<std::path::Path>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.as_ref().display()),
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            statement_cache_capacity: 100,
        }
    }

    /// In-memory database for tests.
    ///
    /// Each SQLite in-memory connection is its own database, so the pool is
    /// pinned to a single connection that is never recycled.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: None,
            statement_cache_capacity: 100,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Explicit handle to the cache database.
///
/// Operations hold a read lock on the pool for their whole duration, so
/// [`close`](Self::close) is serialized against them.
pub struct CacheDatabase {
    pool: RwLock<Option<SqlitePool>>,
    database_url: String,
    operation_timeout: Duration,
}

impl CacheDatabase {
    /// Connect, configure and migrate the database.
    #[instrument(skip(config), fields(database_url = %config.database.database_url))]
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let pool = create_pool(config).await?;

        let version = schema::migrate(&pool).await?;

        info!(schema_version = version, "Cache database opened");

        Ok(Self {
            pool: RwLock::new(Some(pool)),
            database_url: config.database.database_url.clone(),
            operation_timeout: config.operation_timeout,
        })
    }

    /// Close the pool once in-flight operations finish. Idempotent.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
            info!(database_url = %self.database_url, "Cache database closed");
        }
    }

    pub async fn is_open(&self) -> bool {
        self.pool.read().await.is_some()
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Borrow the live pool for the duration of one operation.
    ///
    /// Must not be called while the caller already holds a session.
    pub(crate) async fn session(&self) -> Result<RwLockReadGuard<'_, SqlitePool>> {
        let guard = self.pool.read().await;
        RwLockReadGuard::try_map(guard, |pool| pool.as_ref())
            .map_err(|_| CacheError::NotInitialized)
    }

    /// Run `operation` under the configured deadline.
    pub(crate) async fn with_deadline<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.operation_timeout, "Operation deadline exceeded");
                Err(CacheError::Timeout {
                    operation,
                    timeout: self.operation_timeout,
                })
            }
        }
    }

    /// Applied schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        self.with_deadline("db.schema_version", async {
            let pool = self.session().await?;
            schema::current_version(&pool).await
        })
        .await
    }

    /// Empty every store in one transaction. On failure nothing is removed.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<()> {
        self.with_deadline("db.clear_all", async {
            let pool = self.session().await?;
            let mut tx = pool.begin().await?;

            for table in ["songs", "setlists", "preferences", "sync_queue", "storage_stats"] {
                sqlx::query(&format!("DELETE FROM {}", table))
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            info!("Cleared all cache stores");
            Ok(())
        })
        .await
    }

    /// Run a raw statement. Test fixtures use this to install triggers.
    #[doc(hidden)]
    pub async fn execute_raw(&self, sql: &str) -> Result<u64> {
        let pool = self.session().await?;
        let result = sqlx::query(sql).execute(&*pool).await?;
        Ok(result.rows_affected())
    }
}

async fn create_pool(config: &CacheConfig) -> Result<SqlitePool> {
    let db = &config.database;
    info!(
        database_url = %db.database_url,
        min_connections = db.min_connections,
        max_connections = db.max_connections,
        "Creating database connection pool"
    );

    let mut connect_options = SqliteConnectOptions::from_str(&db.database_url)?
        .foreign_keys(true)
        .create_if_missing(true)
        .statement_cache_capacity(db.statement_cache_capacity);

    if !db.is_in_memory() {
        connect_options = connect_options
            // WAL: concurrent readers with one writer
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("cache_size", "-16000")
            .pragma("auto_vacuum", "INCREMENTAL");
    }

    debug!("SQLite connection options configured");

    let mut pool_options = SqlitePoolOptions::new()
        .min_connections(db.min_connections)
        .max_connections(db.max_connections)
        .acquire_timeout(db.acquire_timeout)
        .idle_timeout(db.idle_timeout);

    if db.is_in_memory() {
        pool_options = pool_options.max_lifetime(Option::<Duration>::None);
    }

    let pool = pool_options
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            CacheError::Database(e)
        })?;

    sqlx::query("SELECT 1").fetch_one(&pool).await?;
    debug!("Database health check passed");

    Ok(pool)
}
