//! Setlist repository trait and implementation

use crate::db::CacheDatabase;
use crate::error::{CacheError, Result};
use crate::models::{CachedSetlist, SetlistQuery, SetlistSong, SyncStatus, Timestamp};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Row, SqliteExecutor};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Setlist repository interface for data access operations
#[async_trait]
pub trait SetlistRepository: Send + Sync {
    /// Insert or replace a setlist by id.
    ///
    /// # Errors
    /// Returns `InvalidInput` if two song references share a position.
    async fn upsert(&self, setlist: &CachedSetlist) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<CachedSetlist>>;

    async fn query(&self, query: &SetlistQuery) -> Result<Vec<CachedSetlist>>;

    /// Set `sync_status` and move `last_modified` forward to `now`.
    ///
    /// # Returns
    /// - `Ok(true)` if the setlist exists
    /// - `Ok(false)` if it does not (nothing is written)
    async fn update_sync_status(&self, id: &str, status: SyncStatus, now: Timestamp)
        -> Result<bool>;

    async fn count(&self) -> Result<u64>;
}

/// SQLite implementation of SetlistRepository
pub struct SqliteSetlistRepository {
    db: Arc<CacheDatabase>,
}

impl SqliteSetlistRepository {
    pub fn new(db: Arc<CacheDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SetlistRepository for SqliteSetlistRepository {
    #[instrument(skip(self, setlist), fields(setlist_id = %setlist.id))]
    async fn upsert(&self, setlist: &CachedSetlist) -> Result<()> {
        setlist.validate()?;

        self.db
            .with_deadline("setlists.put", async {
                let pool = self.db.session().await?;
                write_setlist(&*pool, setlist).await
            })
            .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CachedSetlist>> {
        self.db
            .with_deadline("setlists.get", async {
                let pool = self.db.session().await?;
                let row = query("SELECT * FROM setlists WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&*pool)
                    .await?;

                row.as_ref().map(setlist_from_row).transpose()
            })
            .await
    }

    #[instrument(skip(self))]
    async fn query(&self, setlist_query: &SetlistQuery) -> Result<Vec<CachedSetlist>> {
        self.db
            .with_deadline("setlists.query", async {
                let pool = self.db.session().await?;

                let rows = match setlist_query {
                    SetlistQuery::CreatedBy(owner) => {
                        query("SELECT * FROM setlists WHERE created_by = ? ORDER BY last_modified DESC, id")
                            .bind(owner)
                            .fetch_all(&*pool)
                            .await?
                    }
                    SetlistQuery::SyncStatus(status) => {
                        query("SELECT * FROM setlists WHERE sync_status = ? ORDER BY last_modified DESC, id")
                            .bind(status.as_str())
                            .fetch_all(&*pool)
                            .await?
                    }
                    SetlistQuery::RecentlyModified { limit } => {
                        query("SELECT * FROM setlists ORDER BY last_modified DESC, id LIMIT ?")
                            .bind(i64::from(*limit))
                            .fetch_all(&*pool)
                            .await?
                    }
                };

                rows.iter().map(setlist_from_row).collect()
            })
            .await
    }

    #[instrument(skip(self))]
    async fn update_sync_status(
        &self,
        id: &str,
        status: SyncStatus,
        now: Timestamp,
    ) -> Result<bool> {
        self.db
            .with_deadline("setlists.update_sync_status", async {
                let pool = self.db.session().await?;
                let result = query(
                    "UPDATE setlists SET sync_status = ?, last_modified = MAX(last_modified, ?) WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(now)
                .bind(id)
                .execute(&*pool)
                .await?;

                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn count(&self) -> Result<u64> {
        self.db
            .with_deadline("setlists.count", async {
                let pool = self.db.session().await?;
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM setlists")
                    .fetch_one(&*pool)
                    .await?;
                Ok(count.max(0) as u64)
            })
            .await
    }
}

/// Insert or replace one setlist row. Callers validate first.
pub(crate) async fn write_setlist<'e, E>(executor: E, setlist: &CachedSetlist) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let mut ordered = setlist.songs.clone();
    ordered.sort_by_key(|s| s.position);
    let songs = serde_json::to_string(&ordered)?;
    let tags = serde_json::to_string(&setlist.tags)?;
    let service_date = setlist.service_date.map(|d| d.to_string());

    query(
        r#"
        INSERT INTO setlists (
            id, name, created_by, songs, tags, is_public, venue,
            service_date, sync_status, last_modified, cached_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            created_by = excluded.created_by,
            songs = excluded.songs,
            tags = excluded.tags,
            is_public = excluded.is_public,
            venue = excluded.venue,
            service_date = excluded.service_date,
            sync_status = excluded.sync_status,
            last_modified = excluded.last_modified,
            cached_at = excluded.cached_at
        "#,
    )
    .bind(&setlist.id)
    .bind(&setlist.name)
    .bind(&setlist.created_by)
    .bind(&songs)
    .bind(&tags)
    .bind(setlist.is_public)
    .bind(&setlist.venue)
    .bind(&service_date)
    .bind(setlist.sync_status.as_str())
    .bind(setlist.last_modified)
    .bind(setlist.cached_at)
    .execute(executor)
    .await?;

    debug!(setlist_id = %setlist.id, songs = ordered.len(), "Setlist stored");
    Ok(())
}

pub(crate) fn setlist_from_row(row: &SqliteRow) -> Result<CachedSetlist> {
    let songs: String = row.try_get("songs")?;
    let tags: String = row.try_get("tags")?;
    let sync_status: String = row.try_get("sync_status")?;
    let service_date: Option<String> = row.try_get("service_date")?;

    let service_date = service_date
        .map(|d| d.parse::<NaiveDate>())
        .transpose()
        .map_err(|e| CacheError::corrupt("setlists", format!("service_date: {}", e)))?;

    Ok(CachedSetlist {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_by: row.try_get("created_by")?,
        songs: serde_json::from_str::<Vec<SetlistSong>>(&songs)?,
        tags: serde_json::from_str(&tags)?,
        is_public: row.try_get("is_public")?,
        venue: row.try_get("venue")?,
        service_date,
        sync_status: sync_status.parse()?,
        last_modified: row.try_get("last_modified")?,
        cached_at: row.try_get("cached_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    async fn repo() -> SqliteSetlistRepository {
        let db = CacheDatabase::open(&CacheConfig::in_memory()).await.unwrap();
        SqliteSetlistRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn test_songs_are_stored_in_position_order() {
        let repo = repo().await;
        let mut setlist = CachedSetlist::new("s1", "Sunday AM", "leader");
        setlist.songs = vec![
            SetlistSong { song_id: "c".into(), transpose: 0, position: 7 },
            SetlistSong { song_id: "a".into(), transpose: -2, position: 1 },
            SetlistSong { song_id: "b".into(), transpose: 3, position: 4 },
        ];
        setlist.service_date = NaiveDate::from_ymd_opt(2024, 3, 10);

        repo.upsert(&setlist).await.unwrap();

        let stored = repo.find_by_id("s1").await.unwrap().unwrap();
        let order: Vec<_> = stored.songs.iter().map(|s| s.song_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(stored.service_date, NaiveDate::from_ymd_opt(2024, 3, 10));
    }

    #[tokio::test]
    async fn test_duplicate_positions_are_rejected() {
        let repo = repo().await;
        let mut setlist = CachedSetlist::new("s1", "Sunday AM", "leader").with_song("a", 0);
        setlist.songs.push(SetlistSong { song_id: "b".into(), transpose: 0, position: 0 });

        let result = repo.upsert(&setlist).await;
        assert!(matches!(result, Err(CacheError::InvalidInput { .. })));
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_sync_status_on_missing_setlist() {
        let repo = repo().await;
        let updated = repo
            .update_sync_status("missing", SyncStatus::Pending, 10)
            .await
            .unwrap();
        assert!(!updated);
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
