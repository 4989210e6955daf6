//! # Entity Store
//!
//! Durable storage for songs, setlists and preferences. Every mutation runs
//! the post-commit [`HookChain`] once the write is durable: stats recompute
//! first, then the quota check when a storage estimator is attached.
//!
//! A mutation and its hooks run together on a spawned task. A caller that
//! stops waiting does not cancel either of them.
//!
//! ```rust,ignore
//! let store = EntityStore::new(ctx).with_storage_estimator(estimator);
//! let song = store.put_song(song).await?;
//! let fetched = store.get_song(&song.id).await?; // refreshes last_accessed
//! ```

use crate::context::CacheContext;
use crate::error::{CacheError, Result};
use crate::eviction::LruEvictor;
use crate::hooks::{HookChain, Mutation, PostCommitHook, StatsHook};
use crate::models::{
    CachedSetlist, CachedSong, EntityKind, NewSyncOperation, OperationKind, SetlistQuery,
    SongQuery, StorageStats, SyncOperation, SyncPayload, SyncStatus, UserPreference,
};
use crate::quota::QuotaMonitor;
use crate::repositories::preference::write_preference;
use crate::repositories::setlist::write_setlist;
use crate::repositories::{
    PreferenceRepository, SetlistRepository, SongRepository, SqlitePreferenceRepository,
    SqliteSetlistRepository, SqliteSongRepository,
};
use crate::stats::StatsAggregator;
use crate::sync_queue::{enqueued, insert_operation, new_operation, operation_from_row};
use bridge_traits::storage::StorageEstimator;
use core_runtime::events::{CacheEvent, SyncEvent};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, Instrument};

pub struct EntityStore {
    ctx: CacheContext,
    songs: Arc<dyn SongRepository>,
    setlists: Arc<dyn SetlistRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    stats: StatsAggregator,
    evictor: LruEvictor,
    quota: Option<QuotaMonitor>,
    hooks: Arc<HookChain>,
}

impl EntityStore {
    /// Store over the context's database with the stats hook installed.
    pub fn new(ctx: CacheContext) -> Self {
        let songs: Arc<dyn SongRepository> = Arc::new(SqliteSongRepository::new(ctx.db.clone()));
        let setlists: Arc<dyn SetlistRepository> =
            Arc::new(SqliteSetlistRepository::new(ctx.db.clone()));
        let preferences: Arc<dyn PreferenceRepository> =
            Arc::new(SqlitePreferenceRepository::new(ctx.db.clone()));

        let stats = StatsAggregator::new(ctx.clone());
        let evictor = LruEvictor::new(ctx.clone(), songs.clone(), stats.clone());

        let mut hooks = HookChain::new();
        hooks.push(Arc::new(StatsHook::new(stats.clone())));

        Self {
            ctx,
            songs,
            setlists,
            preferences,
            stats,
            evictor,
            quota: None,
            hooks: Arc::new(hooks),
        }
    }

    /// Attach the host storage estimate and run quota checks after song and
    /// setlist writes.
    pub fn with_storage_estimator(mut self, estimator: Arc<dyn StorageEstimator>) -> Self {
        let monitor = QuotaMonitor::new(
            self.ctx.clone(),
            estimator,
            self.stats.clone(),
            self.evictor.clone(),
        );
        Arc::make_mut(&mut self.hooks).push(Arc::new(monitor.clone()));
        self.quota = Some(monitor);
        self
    }

    /// Append a hook after the built-in ones.
    pub fn with_hook(mut self, hook: Arc<dyn PostCommitHook>) -> Self {
        Arc::make_mut(&mut self.hooks).push(hook);
        self
    }

    pub fn context(&self) -> &CacheContext {
        &self.ctx
    }

    pub fn quota_monitor(&self) -> Option<&QuotaMonitor> {
        self.quota.as_ref()
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    /// Run `write` and then the hooks for the mutation it reports, as one
    /// spawned task.
    async fn commit<T, W>(&self, operation: &'static str, write: W) -> Result<T>
    where
        T: Send + 'static,
        W: Future<Output = Result<(T, Option<Mutation>)>> + Send + 'static,
    {
        let hooks = self.hooks.clone();
        let task = tokio::spawn(
            async move {
                let (value, mutation) = write.await?;
                if let Some(mutation) = mutation {
                    hooks.run(&mutation).await;
                }
                Ok::<T, CacheError>(value)
            }
            .in_current_span(),
        );

        task.await.map_err(|e| {
            error!(operation, error = %e, "Store task panicked or was cancelled");
            CacheError::Task(format!("{}: {}", operation, e))
        })?
    }

    // ------------------------------------------------------------------
    // Songs
    // ------------------------------------------------------------------

    /// Upsert a song, stamping `cached_at` and `last_accessed` with now.
    #[instrument(skip(self, song), fields(song_id = %song.id))]
    pub async fn put_song(&self, mut song: CachedSong) -> Result<CachedSong> {
        let now = self.ctx.now_millis();
        song.cached_at = now;
        song.last_accessed = now;

        let songs = self.songs.clone();
        self.commit("songs.put", async move {
            songs.upsert(&song).await?;
            let mutation = Mutation::SongWritten {
                id: song.id.clone(),
            };
            Ok((song, Some(mutation)))
        })
        .await
    }

    /// Fetch a song and refresh its recency.
    pub async fn get_song(&self, id: &str) -> Result<Option<CachedSong>> {
        self.songs.find_and_touch(id, self.ctx.now_millis()).await
    }

    pub async fn query_songs(&self, query: &SongQuery) -> Result<Vec<CachedSong>> {
        self.songs.query(query).await
    }

    pub async fn song_count(&self) -> Result<u64> {
        self.songs.count().await
    }

    // ------------------------------------------------------------------
    // Setlists
    // ------------------------------------------------------------------

    /// Upsert a setlist as received from the remote system: status becomes
    /// `synced`, `last_modified` and `cached_at` become now.
    #[instrument(skip(self, setlist), fields(setlist_id = %setlist.id))]
    pub async fn put_setlist(&self, mut setlist: CachedSetlist) -> Result<CachedSetlist> {
        let now = self.ctx.now_millis();
        setlist.sync_status = SyncStatus::Synced;
        setlist.last_modified = now;
        setlist.cached_at = now;
        setlist.songs.sort_by_key(|s| s.position);

        let setlists = self.setlists.clone();
        self.commit("setlists.put", async move {
            setlists.upsert(&setlist).await?;
            let mutation = Mutation::SetlistWritten {
                id: setlist.id.clone(),
            };
            Ok((setlist, Some(mutation)))
        })
        .await
    }

    pub async fn get_setlist(&self, id: &str) -> Result<Option<CachedSetlist>> {
        self.setlists.find_by_id(id).await
    }

    pub async fn query_setlists(&self, query: &SetlistQuery) -> Result<Vec<CachedSetlist>> {
        self.setlists.query(query).await
    }

    /// Change only `sync_status` and `last_modified`.
    ///
    /// Returns `false`, writing nothing, when the setlist does not exist.
    #[instrument(skip(self))]
    pub async fn update_sync_status(&self, id: &str, status: SyncStatus) -> Result<bool> {
        let now = self.ctx.now_millis();
        let setlists = self.setlists.clone();
        let ctx = self.ctx.clone();
        let id = id.to_string();

        self.commit("setlists.update_sync_status", async move {
            if !setlists.update_sync_status(&id, status, now).await? {
                debug!("Setlist not cached, sync status unchanged");
                return Ok((false, None));
            }

            ctx.emit(CacheEvent::SetlistStatusChanged {
                setlist_id: id.clone(),
                status: status.to_string(),
            });
            Ok((true, Some(Mutation::SetlistStatusChanged { id, status })))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    pub async fn put_preference(&self, preference: UserPreference) -> Result<UserPreference> {
        let preferences = self.preferences.clone();
        self.commit("preferences.put", async move {
            preferences.upsert(&preference).await?;
            let mutation = Mutation::PreferenceWritten {
                user_id: preference.user_id.clone(),
            };
            Ok((preference, Some(mutation)))
        })
        .await
    }

    pub async fn get_preference(&self, user_id: &str) -> Result<Option<UserPreference>> {
        self.preferences.find_by_user(user_id).await
    }

    // ------------------------------------------------------------------
    // Local edits
    // ------------------------------------------------------------------

    /// Record a local setlist edit. The setlist is written as `pending` and
    /// its outbox operation appended in the same transaction: a create when
    /// the setlist was not cached yet, an update otherwise.
    #[instrument(skip(self, setlist), fields(setlist_id = %setlist.id))]
    pub async fn stage_setlist(&self, mut setlist: CachedSetlist) -> Result<SyncOperation> {
        setlist.validate()?;

        let now = self.ctx.now_millis();
        setlist.sync_status = SyncStatus::Pending;
        setlist.last_modified = now;
        setlist.cached_at = now;
        setlist.songs.sort_by_key(|s| s.position);

        let ctx = self.ctx.clone();
        self.commit("setlists.stage", async move {
            let db = ctx.db.clone();
            let op = db
                .with_deadline("setlists.stage", async {
                    let pool = db.session().await?;
                    let mut tx = pool.begin().await?;

                    let existing: i64 =
                        sqlx::query_scalar("SELECT COUNT(*) FROM setlists WHERE id = ?")
                            .bind(&setlist.id)
                            .fetch_one(&mut *tx)
                            .await?;
                    write_setlist(&mut *tx, &setlist).await?;

                    let payload = SyncPayload::Setlist(setlist.clone());
                    let staged = if existing > 0 {
                        NewSyncOperation::update(payload)
                    } else {
                        NewSyncOperation::create(payload)
                    };
                    let op = new_operation(staged, now);
                    insert_operation(&mut *tx, &op).await?;

                    tx.commit().await?;
                    Ok(op)
                })
                .await?;

            debug!(operation_id = %op.id, operation = %op.operation, "Setlist edit staged");
            ctx.emit(enqueued(&op));

            let mutation = Mutation::SetlistWritten {
                id: op.entity_id.clone(),
            };
            Ok((op, Some(mutation)))
        })
        .await
    }

    /// Record a local preference change and its outbox update in one
    /// transaction.
    #[instrument(skip(self, preference), fields(user_id = %preference.user_id))]
    pub async fn stage_preference(&self, preference: UserPreference) -> Result<SyncOperation> {
        let now = self.ctx.now_millis();
        let ctx = self.ctx.clone();

        self.commit("preferences.stage", async move {
            let db = ctx.db.clone();
            let op = db
                .with_deadline("preferences.stage", async {
                    let pool = db.session().await?;
                    let mut tx = pool.begin().await?;

                    write_preference(&mut *tx, &preference).await?;
                    let op = new_operation(
                        NewSyncOperation::update(SyncPayload::Preference(preference.clone())),
                        now,
                    );
                    insert_operation(&mut *tx, &op).await?;

                    tx.commit().await?;
                    Ok(op)
                })
                .await?;

            ctx.emit(enqueued(&op));

            let mutation = Mutation::PreferenceWritten {
                user_id: op.entity_id.clone(),
            };
            Ok((op, Some(mutation)))
        })
        .await
    }

    /// The remote system acknowledged `operation_id`. The operation leaves
    /// the outbox and, when it was the last one queued for a setlist, that
    /// setlist returns to `synced` in the same transaction.
    ///
    /// Returns `None` when the operation is not queued.
    #[instrument(skip(self))]
    pub async fn confirm_operation(&self, operation_id: &str) -> Result<Option<SyncOperation>> {
        let now = self.ctx.now_millis();
        let ctx = self.ctx.clone();
        let operation_id = operation_id.to_string();

        self.commit("sync_queue.confirm", async move {
            let db = ctx.db.clone();
            let confirmed = db
                .with_deadline("sync_queue.confirm", async {
                    let pool = db.session().await?;
                    let mut tx = pool.begin().await?;

                    let row = sqlx::query("DELETE FROM sync_queue WHERE id = ? RETURNING *")
                        .bind(&operation_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                    let Some(row) = row else {
                        tx.commit().await?;
                        return Ok(None);
                    };
                    let op = operation_from_row(&row)?;

                    let mut synced = false;
                    if op.entity_type == EntityKind::Setlist && op.operation != OperationKind::Delete
                    {
                        let result = sqlx::query(
                            r#"
                            UPDATE setlists
                            SET sync_status = ?, last_modified = MAX(last_modified, ?)
                            WHERE id = ? AND NOT EXISTS (
                                SELECT 1 FROM sync_queue WHERE entity_type = ? AND entity_id = ?
                            )
                            "#,
                        )
                        .bind(SyncStatus::Synced.as_str())
                        .bind(now)
                        .bind(&op.entity_id)
                        .bind(EntityKind::Setlist.as_str())
                        .bind(&op.entity_id)
                        .execute(&mut *tx)
                        .await?;
                        synced = result.rows_affected() > 0;
                    }

                    tx.commit().await?;
                    Ok(Some((op, synced)))
                })
                .await?;

            let Some((op, synced)) = confirmed else {
                debug!("Confirmed operation is not queued");
                return Ok((None, None));
            };

            ctx.emit(SyncEvent::OperationRemoved {
                operation_id: op.id.clone(),
            });
            if !synced {
                return Ok((Some(op), None));
            }

            ctx.emit(CacheEvent::SetlistStatusChanged {
                setlist_id: op.entity_id.clone(),
                status: SyncStatus::Synced.to_string(),
            });
            let mutation = Mutation::SetlistStatusChanged {
                id: op.entity_id.clone(),
                status: SyncStatus::Synced,
            };
            Ok((Some(op), Some(mutation)))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Evict least recently used songs if the population exceeds the ceiling.
    pub async fn evict_least_recently_used(&self) -> Result<Vec<String>> {
        self.evictor.evict().await
    }

    /// Empty every store, the sync queue and the stats in one transaction.
    ///
    /// Stats are not recomputed afterwards.
    pub async fn clear_all(&self) -> Result<()> {
        self.ctx.db.clear_all().await?;
        info!("Songbook cache cleared");
        self.ctx.emit(CacheEvent::Cleared);
        Ok(())
    }

    pub async fn get_storage_stats(&self) -> Result<Option<StorageStats>> {
        self.stats.current().await
    }
}
