//! # Songbook Cache
//!
//! Offline-first persistence for songs, setlists and user preferences.
//!
//! ## Components
//!
//! - [`EntityStore`] - durable stores with secondary indexes and LRU recency
//! - [`SyncQueue`] - ordered outbox of mutations awaiting the remote system
//! - [`QuotaMonitor`] - compares storage usage with the host quota and evicts
//! - [`StatsAggregator`] - derived counts and size estimate
//!
//! Everything runs over one explicit [`CacheDatabase`] handle. After a store
//! mutation commits, the post-commit hooks run in order: stats, then quota,
//! then any eviction the quota check asks for.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_cache::{CacheConfig, CacheContext, CacheDatabase, EntityStore, SyncQueue};
//! use std::sync::Arc;
//!
//! let config = CacheConfig::in_memory();
//! let db = Arc::new(CacheDatabase::open(&config).await?);
//! let ctx = CacheContext::new(db, config);
//!
//! let store = EntityStore::new(ctx.clone());
//! let queue = SyncQueue::new(ctx);
//! ```

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod eviction;
pub mod hooks;
pub mod models;
pub mod quota;
pub mod repositories;
pub mod schema;
pub mod stats;
pub mod store;
pub mod sync_queue;

pub use config::{CacheConfig, RetryPolicy};
pub use context::CacheContext;
pub use db::{CacheDatabase, DatabaseConfig};
pub use error::{CacheError, Result};
pub use eviction::LruEvictor;
pub use hooks::{HookChain, Mutation, PostCommitHook, StatsHook};
pub use models::{
    CachedSetlist, CachedSong, Difficulty, EntityKind, FontSize, NewSyncOperation,
    NotationSystem, OperationKind, QueueStats, SetlistQuery, SetlistSong, SongQuery,
    StorageStats, SyncOperation, SyncOperationStatus, SyncPayload, SyncStatus, Theme,
    Timestamp, UserPreference, STORAGE_STATS_KEY,
};
pub use quota::{QuotaCheck, QuotaMonitor};
pub use stats::StatsAggregator;
pub use store::EntityStore;
pub use sync_queue::SyncQueue;
