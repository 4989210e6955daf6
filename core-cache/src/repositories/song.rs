//! Song repository trait and implementation

use crate::db::CacheDatabase;
use crate::error::{CacheError, Result};
use crate::models::{CachedSong, SongQuery, Timestamp};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Row};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Song repository interface for data access operations
#[async_trait]
pub trait SongRepository: Send + Sync {
    /// Insert or replace a song by id.
    ///
    /// `last_accessed` never moves backwards: the stored value is the maximum
    /// of the existing and the incoming one.
    async fn upsert(&self, song: &CachedSong) -> Result<()>;

    /// Refresh `last_accessed` to `now` and return the song, in one
    /// transaction.
    ///
    /// # Returns
    /// - `Ok(Some(song))` if found
    /// - `Ok(None)` if not found
    async fn find_and_touch(&self, id: &str, now: Timestamp) -> Result<Option<CachedSong>>;

    /// Index lookup. Does not refresh recency.
    async fn query(&self, query: &SongQuery) -> Result<Vec<CachedSong>>;

    async fn count(&self) -> Result<u64>;

    /// Remove `floor(population * percent / 100)` least recently accessed
    /// songs when the population exceeds `ceiling`.
    ///
    /// # Returns
    /// Ids of the removed songs, oldest first
    async fn evict_least_recently_used(&self, ceiling: u64, percent: u8) -> Result<Vec<String>>;
}

/// SQLite implementation of SongRepository
pub struct SqliteSongRepository {
    db: Arc<CacheDatabase>,
}

impl SqliteSongRepository {
    pub fn new(db: Arc<CacheDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SongRepository for SqliteSongRepository {
    #[instrument(skip(self, song), fields(song_id = %song.id))]
    async fn upsert(&self, song: &CachedSong) -> Result<()> {
        let themes = serde_json::to_string(&song.themes)?;
        let chord_data = serde_json::to_string(&song.chord_data)?;

        self.db
            .with_deadline("songs.put", async {
                let pool = self.db.session().await?;
                query(
                    r#"
                    INSERT INTO songs (
                        id, title, artist, song_key, tempo, difficulty, themes,
                        chord_data, created_by, is_public, last_accessed, cached_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        title = excluded.title,
                        artist = excluded.artist,
                        song_key = excluded.song_key,
                        tempo = excluded.tempo,
                        difficulty = excluded.difficulty,
                        themes = excluded.themes,
                        chord_data = excluded.chord_data,
                        created_by = excluded.created_by,
                        is_public = excluded.is_public,
                        last_accessed = MAX(songs.last_accessed, excluded.last_accessed),
                        cached_at = excluded.cached_at
                    "#,
                )
                .bind(&song.id)
                .bind(&song.title)
                .bind(&song.artist)
                .bind(&song.key)
                .bind(song.tempo.map(i64::from))
                .bind(song.difficulty.as_str())
                .bind(&themes)
                .bind(&chord_data)
                .bind(&song.created_by)
                .bind(song.is_public)
                .bind(song.last_accessed)
                .bind(song.cached_at)
                .execute(&*pool)
                .await?;

                debug!("Song stored");
                Ok(())
            })
            .await
    }

    #[instrument(skip(self))]
    async fn find_and_touch(&self, id: &str, now: Timestamp) -> Result<Option<CachedSong>> {
        self.db
            .with_deadline("songs.get", async {
                let pool = self.db.session().await?;
                let mut tx = pool.begin().await?;

                let touched = query("UPDATE songs SET last_accessed = MAX(last_accessed, ?) WHERE id = ?")
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();

                if touched == 0 {
                    tx.commit().await?;
                    return Ok(None);
                }

                let row = query("SELECT * FROM songs WHERE id = ?")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;
                tx.commit().await?;

                song_from_row(&row).map(Some)
            })
            .await
    }

    #[instrument(skip(self))]
    async fn query(&self, song_query: &SongQuery) -> Result<Vec<CachedSong>> {
        self.db
            .with_deadline("songs.query", async {
                let pool = self.db.session().await?;

                let rows = match song_query {
                    SongQuery::Search(_) => {
                        query("SELECT * FROM songs ORDER BY title, id")
                            .fetch_all(&*pool)
                            .await?
                    }
                    SongQuery::Title(title) => {
                        query("SELECT * FROM songs WHERE title = ? ORDER BY id")
                            .bind(title)
                            .fetch_all(&*pool)
                            .await?
                    }
                    SongQuery::Artist(artist) => {
                        query("SELECT * FROM songs WHERE artist = ? ORDER BY title, id")
                            .bind(artist)
                            .fetch_all(&*pool)
                            .await?
                    }
                    SongQuery::Difficulty(difficulty) => {
                        query("SELECT * FROM songs WHERE difficulty = ? ORDER BY title, id")
                            .bind(difficulty.as_str())
                            .fetch_all(&*pool)
                            .await?
                    }
                    SongQuery::RecentlyAccessed { limit } => {
                        query("SELECT * FROM songs ORDER BY last_accessed DESC, id LIMIT ?")
                            .bind(i64::from(*limit))
                            .fetch_all(&*pool)
                            .await?
                    }
                };

                let songs = rows
                    .iter()
                    .map(song_from_row)
                    .collect::<Result<Vec<_>>>()?;

                Ok(match song_query {
                    SongQuery::Search(term) => songs
                        .into_iter()
                        .filter(|song| song.matches_search(term))
                        .collect(),
                    _ => songs,
                })
            })
            .await
    }

    async fn count(&self) -> Result<u64> {
        self.db
            .with_deadline("songs.count", async {
                let pool = self.db.session().await?;
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM songs")
                    .fetch_one(&*pool)
                    .await?;
                Ok(count.max(0) as u64)
            })
            .await
    }

    #[instrument(skip(self))]
    async fn evict_least_recently_used(&self, ceiling: u64, percent: u8) -> Result<Vec<String>> {
        self.db
            .with_deadline("songs.evict", async {
                let pool = self.db.session().await?;
                let mut tx = pool.begin().await?;

                let population: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM songs")
                    .fetch_one(&mut *tx)
                    .await?;
                let population = population.max(0) as u64;

                if population <= ceiling {
                    tx.commit().await?;
                    debug!(population, ceiling, "Song population within ceiling");
                    return Ok(Vec::new());
                }

                let victims = population * u64::from(percent) / 100;
                let ids: Vec<String> = sqlx::query_scalar(
                    "SELECT id FROM songs ORDER BY last_accessed ASC, id ASC LIMIT ?",
                )
                .bind(victims as i64)
                .fetch_all(&mut *tx)
                .await?;

                for id in &ids {
                    query("DELETE FROM songs WHERE id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }

                tx.commit().await?;
                debug!(population, removed = ids.len(), "Evicted least recently used songs");
                Ok(ids)
            })
            .await
    }
}

pub(crate) fn song_from_row(row: &SqliteRow) -> Result<CachedSong> {
    let tempo: Option<i64> = row.try_get("tempo")?;
    let tempo = tempo
        .map(u32::try_from)
        .transpose()
        .map_err(|_| CacheError::corrupt("songs", "tempo out of range"))?;

    let difficulty: String = row.try_get("difficulty")?;
    let themes: String = row.try_get("themes")?;
    let chord_data: String = row.try_get("chord_data")?;

    Ok(CachedSong {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
        key: row.try_get("song_key")?,
        tempo,
        difficulty: difficulty.parse()?,
        themes: serde_json::from_str::<BTreeSet<String>>(&themes)?,
        chord_data: serde_json::from_str(&chord_data)?,
        created_by: row.try_get("created_by")?,
        is_public: row.try_get("is_public")?,
        last_accessed: row.try_get("last_accessed")?,
        cached_at: row.try_get("cached_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::models::Difficulty;

    async fn repo() -> SqliteSongRepository {
        let db = CacheDatabase::open(&CacheConfig::in_memory()).await.unwrap();
        SqliteSongRepository::new(Arc::new(db))
    }

    fn song(id: &str, last_accessed: Timestamp) -> CachedSong {
        let mut song = CachedSong::new(id, format!("Song {}", id), "Artist", "C", Difficulty::Beginner);
        song.last_accessed = last_accessed;
        song.cached_at = last_accessed;
        song
    }

    #[tokio::test]
    async fn test_upsert_never_lowers_last_accessed() {
        let repo = repo().await;
        repo.upsert(&song("a", 500)).await.unwrap();
        repo.upsert(&song("a", 100)).await.unwrap();

        let stored = repo.find_and_touch("a", 0).await.unwrap().unwrap();
        assert_eq!(stored.last_accessed, 500);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_and_touch_missing_returns_none() {
        let repo = repo().await;
        assert!(repo.find_and_touch("missing", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eviction_breaks_ties_by_id() {
        let repo = repo().await;
        for id in ["c", "b", "a", "d", "e"] {
            repo.upsert(&song(id, 10)).await.unwrap();
        }

        let removed = repo.evict_least_recently_used(4, 40).await.unwrap();
        assert_eq!(removed, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_recently_accessed_orders_newest_first() {
        let repo = repo().await;
        repo.upsert(&song("old", 1)).await.unwrap();
        repo.upsert(&song("new", 3)).await.unwrap();
        repo.upsert(&song("mid", 2)).await.unwrap();

        let recent = repo
            .query(&SongQuery::RecentlyAccessed { limit: 2 })
            .await
            .unwrap();
        let ids: Vec<_> = recent.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }
}
