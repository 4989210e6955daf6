//! # Stats Aggregator
//!
//! Owns the singleton [`StorageStats`] record. [`StatsAggregator::recompute`]
//! rebuilds everything except `quota_usage`, which only the quota monitor
//! writes through [`StatsAggregator::set_quota_usage`].

use crate::context::CacheContext;
use crate::error::Result;
use crate::models::{StorageStats, STORAGE_STATS_KEY};
use crate::repositories::setlist::setlist_from_row;
use crate::repositories::song::song_from_row;
use core_runtime::events::CacheEvent;
use sqlx::{query, Row};
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct StatsAggregator {
    ctx: CacheContext,
}

impl StatsAggregator {
    pub fn new(ctx: CacheContext) -> Self {
        Self { ctx }
    }

    /// Re-derive counts and the size estimate from the songs and setlists
    /// stores and persist them, stamping `last_cleanup` with the current time.
    #[instrument(skip(self))]
    pub async fn recompute(&self) -> Result<StorageStats> {
        let now = self.ctx.now_millis();
        let multiplier = self.ctx.config.size_multiplier;
        let db = &self.ctx.db;

        let stats = db
            .with_deadline("stats.recompute", async {
                let pool = db.session().await?;
                let mut tx = pool.begin().await?;

                let mut serialized_len: u64 = 0;

                let song_rows = query("SELECT * FROM songs").fetch_all(&mut *tx).await?;
                for row in &song_rows {
                    serialized_len += serde_json::to_vec(&song_from_row(row)?)?.len() as u64;
                }

                let setlist_rows = query("SELECT * FROM setlists").fetch_all(&mut *tx).await?;
                for row in &setlist_rows {
                    serialized_len += serde_json::to_vec(&setlist_from_row(row)?)?.len() as u64;
                }

                let total_size = serialized_len.saturating_mul(multiplier);
                let song_count = song_rows.len() as u64;
                let setlist_count = setlist_rows.len() as u64;

                query(
                    r#"
                    INSERT INTO storage_stats (key, total_size, song_count, setlist_count, last_cleanup)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        total_size = excluded.total_size,
                        song_count = excluded.song_count,
                        setlist_count = excluded.setlist_count,
                        last_cleanup = excluded.last_cleanup
                    "#,
                )
                .bind(STORAGE_STATS_KEY)
                .bind(total_size as i64)
                .bind(song_count as i64)
                .bind(setlist_count as i64)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                let stats = fetch_stats(&mut *tx).await?.unwrap_or_default();
                tx.commit().await?;
                Ok(stats)
            })
            .await?;

        debug!(
            song_count = stats.song_count,
            setlist_count = stats.setlist_count,
            total_size = stats.total_size,
            "Storage stats recomputed"
        );
        self.ctx.emit(CacheEvent::StatsUpdated {
            song_count: stats.song_count,
            setlist_count: stats.setlist_count,
            total_size: stats.total_size,
        });

        Ok(stats)
    }

    /// Persist the quota usage percentage, leaving every other field alone.
    pub async fn set_quota_usage(&self, usage_percent: f64) -> Result<()> {
        let db = &self.ctx.db;
        db.with_deadline("stats.set_quota_usage", async {
            let pool = db.session().await?;
            query(
                r#"
                INSERT INTO storage_stats (key, quota_usage) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET quota_usage = excluded.quota_usage
                "#,
            )
            .bind(STORAGE_STATS_KEY)
            .bind(usage_percent)
            .execute(&*pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// The persisted stats, if any have been computed since the last clear.
    pub async fn current(&self) -> Result<Option<StorageStats>> {
        let db = &self.ctx.db;
        db.with_deadline("stats.get", async {
            let pool = db.session().await?;
            let mut conn = pool.acquire().await?;
            fetch_stats(&mut *conn).await
        })
        .await
    }
}

async fn fetch_stats(conn: &mut sqlx::SqliteConnection) -> Result<Option<StorageStats>> {
    let row = query("SELECT * FROM storage_stats WHERE key = ?")
        .bind(STORAGE_STATS_KEY)
        .fetch_optional(conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let total_size: i64 = row.try_get("total_size")?;
    let song_count: i64 = row.try_get("song_count")?;
    let setlist_count: i64 = row.try_get("setlist_count")?;

    Ok(Some(StorageStats {
        total_size: total_size.max(0) as u64,
        song_count: song_count.max(0) as u64,
        setlist_count: setlist_count.max(0) as u64,
        last_cleanup: row.try_get("last_cleanup")?,
        quota_usage: row.try_get("quota_usage")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::db::CacheDatabase;
    use bridge_traits::time::ManualClock;
    use std::sync::Arc;

    async fn aggregator() -> (StatsAggregator, Arc<ManualClock>) {
        let db = CacheDatabase::open(&CacheConfig::in_memory()).await.unwrap();
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let ctx = CacheContext::new(Arc::new(db), CacheConfig::in_memory()).with_clock(clock.clone());
        (StatsAggregator::new(ctx), clock)
    }

    #[tokio::test]
    async fn test_recompute_on_empty_store() {
        let (stats, _) = aggregator().await;
        assert!(stats.current().await.unwrap().is_none());

        let computed = stats.recompute().await.unwrap();
        assert_eq!(computed.song_count, 0);
        assert_eq!(computed.setlist_count, 0);
        assert_eq!(computed.total_size, 0);
        assert_eq!(computed.last_cleanup, 1_000);
    }

    #[tokio::test]
    async fn test_recompute_preserves_quota_usage() {
        let (stats, clock) = aggregator().await;
        stats.set_quota_usage(42.5).await.unwrap();

        clock.set_millis(2_000);
        let computed = stats.recompute().await.unwrap();
        assert_eq!(computed.quota_usage, 42.5);
        assert_eq!(computed.last_cleanup, 2_000);

        stats.set_quota_usage(10.0).await.unwrap();
        let current = stats.current().await.unwrap().unwrap();
        assert_eq!(current.quota_usage, 10.0);
        assert_eq!(current.last_cleanup, 2_000);
    }
}
