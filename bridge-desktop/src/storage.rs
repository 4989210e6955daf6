//! Storage Estimator Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{StorageEstimate, StorageEstimator},
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Default storage budget for the desktop cache (1 GiB)
pub const DEFAULT_QUOTA_BYTES: u64 = 1024 * 1024 * 1024;

/// Location of the cache database under the platform data directory.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
        .join("songbook-core")
        .join("songbook-cache.db")
}

/// Estimates usage from the SQLite database files on disk.
///
/// SQLite in WAL mode keeps committed-but-not-checkpointed pages in the
/// `-wal` file and its shared-memory index in `-shm`, so all three files
/// count toward usage.
pub struct DatabaseFileEstimator {
    database_path: Option<PathBuf>,
    quota_bytes: u64,
}

impl DatabaseFileEstimator {
    /// Create an estimator for the database at `database_path`.
    pub fn new(database_path: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            database_path: Some(database_path.into()),
            quota_bytes,
        }
    }

    /// Create an estimator from a sqlx-style database URL.
    ///
    /// In-memory databases have no files to measure; the resulting estimator
    /// reports no estimate.
    pub fn from_database_url(database_url: &str, quota_bytes: u64) -> Self {
        let path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);

        let database_path = if path.is_empty() || path.starts_with(":memory:") {
            None
        } else {
            Some(PathBuf::from(path.split('?').next().unwrap_or(path)))
        };

        Self {
            database_path,
            quota_bytes,
        }
    }

    async fn file_size(path: &Path) -> Result<u64> {
        match fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    fn sidecar(path: &Path, suffix: &str) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }
}

#[async_trait]
impl StorageEstimator for DatabaseFileEstimator {
    async fn estimate(&self) -> Result<Option<StorageEstimate>> {
        let Some(path) = self.database_path.as_deref() else {
            debug!("In-memory database, no storage estimate available");
            return Ok(None);
        };

        let mut used = Self::file_size(path).await?;
        used += Self::file_size(&Self::sidecar(path, "-wal")).await?;
        used += Self::file_size(&Self::sidecar(path, "-shm")).await?;

        debug!(used, quota = self.quota_bytes, path = ?path, "Estimated database usage");
        Ok(Some(StorageEstimate::new(used, self.quota_bytes)))
    }
}
