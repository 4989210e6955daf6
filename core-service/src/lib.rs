//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (storage estimate,
//! clock) into the songbook cache and exposes one handle, [`SongbookCache`],
//! to host applications. Desktop apps typically enable the `desktop-shims`
//! feature, which measures the SQLite database files through
//! `bridge-desktop`; other hosts supply their own [`StorageEstimator`].
//!
//! Logging is configured separately through
//! [`core_runtime::logging::init_logging`].

pub mod error;

pub use error::{CoreError, Result};

pub use core_cache::{
    CacheConfig, CacheError, CachedSetlist, CachedSong, DatabaseConfig, Difficulty, EntityKind,
    EntityStore, NewSyncOperation, OperationKind, QueueStats, RetryPolicy, SetlistQuery,
    SetlistSong, SongQuery, StorageStats, SyncOperation, SyncOperationStatus, SyncPayload,
    SyncQueue, SyncStatus, UserPreference,
};
pub use core_runtime::events::{CacheEvent, CoreEvent, EventBus, EventStream, SyncEvent};
pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};

use bridge_traits::storage::StorageEstimator;
use bridge_traits::time::{Clock, SystemClock};
use core_cache::{CacheContext, CacheDatabase};
use core_runtime::events::DEFAULT_EVENT_BUFFER_SIZE;
use std::sync::Arc;
use tracing::{info, instrument};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{default_database_path, DatabaseFileEstimator, DEFAULT_QUOTA_BYTES};

/// Top-level configuration for [`SongbookCache::bootstrap`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    /// Events buffered per subscriber before slow subscribers lag
    pub event_buffer_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl ServiceConfig {
    pub fn new(cache: CacheConfig) -> Self {
        Self {
            cache,
            ..Self::default()
        }
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(CoreError::Runtime(core_runtime::Error::Config(
                "event_buffer_size must be at least 1".to_string(),
            )));
        }
        self.cache.validate()?;
        Ok(())
    }
}

/// Aggregated handle to the bridge dependencies the core requires.
#[derive(Clone)]
pub struct CoreDependencies {
    /// Host storage estimate; without one, quota checks never run
    pub storage_estimator: Option<Arc<dyn StorageEstimator>>,
    pub clock: Arc<dyn Clock>,
}

impl Default for CoreDependencies {
    fn default() -> Self {
        Self {
            storage_estimator: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl CoreDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage_estimator(mut self, estimator: Arc<dyn StorageEstimator>) -> Self {
        self.storage_estimator = Some(estimator);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Desktop bridges: storage is measured from the database files.
    #[cfg(feature = "desktop-shims")]
    pub fn desktop(config: &CacheConfig) -> Self {
        let estimator =
            DatabaseFileEstimator::from_database_url(&config.database.database_url, DEFAULT_QUOTA_BYTES);
        Self::default().with_storage_estimator(Arc::new(estimator))
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct SongbookCache {
    db: Arc<CacheDatabase>,
    store: Arc<EntityStore>,
    queue: SyncQueue,
    events: EventBus,
}

impl SongbookCache {
    /// Open the database, wire the components and release sync leases left
    /// behind by a previous run.
    #[instrument(skip_all)]
    pub async fn bootstrap(config: ServiceConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(CacheDatabase::open(&config.cache).await?);
        let events = EventBus::new(config.event_buffer_size);
        let ctx = CacheContext::new(db.clone(), config.cache)
            .with_clock(deps.clock)
            .with_event_bus(events.clone());

        let mut store = EntityStore::new(ctx.clone());
        if let Some(estimator) = deps.storage_estimator {
            store = store.with_storage_estimator(estimator);
        }
        let queue = SyncQueue::new(ctx);

        let released = queue.release_stale_leases().await?;
        info!(
            released_leases = released,
            quota_monitoring = store.quota_monitor().is_some(),
            "Songbook cache ready"
        );

        Ok(Self {
            db,
            store: Arc::new(store),
            queue,
            events,
        })
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    /// Record a local setlist edit: write it as `pending` and append the
    /// mutation to the outbox in one transaction. A setlist not yet cached
    /// is a create.
    pub async fn stage_setlist(&self, setlist: CachedSetlist) -> Result<SyncOperation> {
        Ok(self.store.stage_setlist(setlist).await?)
    }

    /// Record a local preference change and queue it for upload.
    pub async fn stage_preference(&self, preference: UserPreference) -> Result<SyncOperation> {
        Ok(self.store.stage_preference(preference).await?)
    }

    /// The remote system acknowledged `operation_id`: drop it from the outbox
    /// and, once nothing else is queued for its setlist, mark that setlist
    /// `synced` again.
    ///
    /// Returns `false` when the operation is unknown.
    pub async fn confirm_operation(&self, operation_id: &str) -> Result<bool> {
        Ok(self.store.confirm_operation(operation_id).await?.is_some())
    }

    /// The remote system rejected `operation_id`; count the retry and keep
    /// the error for inspection.
    pub async fn reject_operation(
        &self,
        operation_id: &str,
        error: &str,
    ) -> Result<Option<SyncOperation>> {
        Ok(self.queue.mark_failed(operation_id, error).await?)
    }

    /// Close the database once in-flight operations finish. Every later call
    /// fails with `NotInitialized`.
    pub async fn shutdown(&self) {
        self.db.close().await;
    }
}

/// Convenience bootstrapper for desktop hosts.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// use core_service::{bootstrap_desktop, default_database_path, CacheConfig, DatabaseConfig, ServiceConfig};
///
/// let cache = CacheConfig::default().with_database(DatabaseConfig::new(default_database_path()));
/// let core = bootstrap_desktop(ServiceConfig::new(cache)).await?;
/// let pending = core.queue().list_pending().await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(config: ServiceConfig) -> Result<SongbookCache> {
    let database = &config.cache.database;
    if !database.is_in_memory() {
        let path = database
            .database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let path = path.split('?').next().unwrap_or(path);

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
            }
        }
    }

    let deps = CoreDependencies::desktop(&config.cache);
    SongbookCache::bootstrap(config, deps).await
}
