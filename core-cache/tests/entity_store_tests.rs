mod common;

use bridge_traits::time::Clock;
use common::{setlist, song, TestCache, START_MILLIS};
use core_cache::{
    CacheError, Difficulty, FontSize, NotationSystem, SetlistQuery, SongQuery, SyncStatus, Theme,
    UserPreference,
};
use core_runtime::events::{CacheEvent, CoreEvent};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn test_song_round_trip_refreshes_last_accessed() {
    let cache = TestCache::new().await;

    let stored = cache.store.put_song(song("amazing-grace")).await.unwrap();
    assert_eq!(stored.cached_at, START_MILLIS);
    assert_eq!(stored.last_accessed, START_MILLIS);

    cache.clock.advance(Duration::from_secs(5));
    let fetched = cache.store.get_song("amazing-grace").await.unwrap().unwrap();

    assert!(fetched.last_accessed >= stored.cached_at);
    assert_eq!(fetched.last_accessed, START_MILLIS + 5_000);

    let mut expected = stored.clone();
    expected.last_accessed = fetched.last_accessed;
    assert_eq!(fetched, expected);
}

#[tokio::test]
async fn test_get_missing_song_is_none() {
    let cache = TestCache::new().await;
    assert!(cache.store.get_song("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_last_accessed_never_decreases() {
    let cache = TestCache::new().await;
    cache.store.put_song(song("a")).await.unwrap();

    let mut previous = 0;
    for step in [10_i64, 0, 25, -40, 5] {
        let now = START_MILLIS + step;
        cache.clock.set_millis(now);
        let fetched = cache.store.get_song("a").await.unwrap().unwrap();
        assert!(fetched.last_accessed >= previous);
        previous = fetched.last_accessed;
    }

    // a re-put with an older clock does not move recency backwards
    cache.clock.set_millis(START_MILLIS - 1_000);
    cache.store.put_song(song("a")).await.unwrap();
    let fetched = cache.store.get_song("a").await.unwrap().unwrap();
    assert_eq!(fetched.last_accessed, previous);
}

#[tokio::test]
async fn test_eviction_removes_twenty_percent_oldest_above_ceiling() {
    let cache = TestCache::new().await;
    let songs = cache.seed_songs(60).await;

    // touch the first ten so they become the most recent
    for song in songs.iter().take(10) {
        cache.tick();
        cache.store.get_song(&song.id).await.unwrap();
    }

    let mut by_recency: Vec<_> = cache
        .store
        .query_songs(&SongQuery::RecentlyAccessed { limit: 100 })
        .await
        .unwrap();
    by_recency.reverse();
    let expected: HashSet<String> = by_recency.iter().take(12).map(|s| s.id.clone()).collect();

    let evicted = cache.store.evict_least_recently_used().await.unwrap();

    assert_eq!(evicted.len(), 12);
    assert_eq!(evicted.iter().cloned().collect::<HashSet<_>>(), expected);
    assert!(evicted.iter().all(|id| id.as_str() >= "song-010"));
    assert_eq!(cache.store.song_count().await.unwrap(), 48);

    let stats = cache.store.get_storage_stats().await.unwrap().unwrap();
    assert_eq!(stats.song_count, 48);
}

#[tokio::test]
async fn test_no_eviction_below_ceiling() {
    let cache = TestCache::new().await;
    cache.seed_songs(40).await;

    let evicted = cache.store.evict_least_recently_used().await.unwrap();
    assert!(evicted.is_empty());
    assert_eq!(cache.store.song_count().await.unwrap(), 40);
}

#[tokio::test]
async fn test_setlists_are_never_evicted() {
    let cache = TestCache::new().await;
    cache.store.put_setlist(setlist("s1")).await.unwrap();
    cache.seed_songs(55).await;

    cache.store.evict_least_recently_used().await.unwrap();

    assert!(cache.store.get_setlist("s1").await.unwrap().is_some());
    assert_eq!(cache.store.song_count().await.unwrap(), 44);
}

#[tokio::test]
async fn test_put_setlist_forces_synced_and_stamps() {
    let cache = TestCache::new().await;
    let mut incoming = setlist("s1");
    incoming.sync_status = SyncStatus::Conflict;
    incoming.last_modified = 1;

    let stored = cache.store.put_setlist(incoming).await.unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert_eq!(stored.last_modified, START_MILLIS);
    assert_eq!(stored.cached_at, START_MILLIS);

    let fetched = cache.store.get_setlist("s1").await.unwrap().unwrap();
    assert_eq!(fetched, stored);
}

#[tokio::test]
async fn test_sync_status_change_touches_only_status_and_last_modified() {
    let cache = TestCache::new().await;
    let before = cache.store.put_setlist(setlist("s1")).await.unwrap();

    cache.clock.advance(Duration::from_secs(60));
    let updated = cache
        .store
        .update_sync_status("s1", SyncStatus::Pending)
        .await
        .unwrap();
    assert!(updated);

    let after = cache.store.get_setlist("s1").await.unwrap().unwrap();
    assert_eq!(after.sync_status, SyncStatus::Pending);
    assert_eq!(after.last_modified, START_MILLIS + 60_000);

    let mut expected = before.clone();
    expected.sync_status = SyncStatus::Pending;
    expected.last_modified = after.last_modified;
    assert_eq!(after, expected);
}

#[tokio::test]
async fn test_sync_status_change_on_missing_setlist_is_noop() {
    let cache = TestCache::new().await;
    let updated = cache
        .store
        .update_sync_status("ghost", SyncStatus::Pending)
        .await
        .unwrap();

    assert!(!updated);
    assert!(cache.store.get_setlist("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_song_queries() {
    let cache = TestCache::new().await;
    cache
        .store
        .put_song(
            core_cache::CachedSong::new("1", "Amazing Grace", "John Newton", "G", Difficulty::Beginner)
                .with_theme("Grace"),
        )
        .await
        .unwrap();
    cache
        .store
        .put_song(
            core_cache::CachedSong::new("2", "How Great Is Our God", "Chris Tomlin", "C", Difficulty::Intermediate)
                .with_theme("Majesty"),
        )
        .await
        .unwrap();
    cache
        .store
        .put_song(
            core_cache::CachedSong::new("3", "Graves Into Gardens", "Elevation Worship", "B", Difficulty::Advanced)
                .with_theme("Resurrection"),
        )
        .await
        .unwrap();

    let search = cache
        .store
        .query_songs(&SongQuery::Search("GRA".to_string()))
        .await
        .unwrap();
    let ids: Vec<_> = search.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);

    let by_artist = cache
        .store
        .query_songs(&SongQuery::Artist("Chris Tomlin".to_string()))
        .await
        .unwrap();
    assert_eq!(by_artist.len(), 1);
    assert_eq!(by_artist[0].id, "2");

    let by_title = cache
        .store
        .query_songs(&SongQuery::Title("Amazing Grace".to_string()))
        .await
        .unwrap();
    assert_eq!(by_title.len(), 1);

    let advanced = cache
        .store
        .query_songs(&SongQuery::Difficulty(Difficulty::Advanced))
        .await
        .unwrap();
    assert_eq!(advanced.len(), 1);
    assert_eq!(advanced[0].id, "3");

    let theme = cache
        .store
        .query_songs(&SongQuery::Search("majesty".to_string()))
        .await
        .unwrap();
    assert_eq!(theme.len(), 1);
}

#[tokio::test]
async fn test_setlist_queries() {
    let cache = TestCache::new().await;
    cache.store.put_setlist(setlist("s1")).await.unwrap();
    cache.tick();
    cache.store.put_setlist(setlist("s2")).await.unwrap();
    cache.tick();
    let mut other = setlist("s3");
    other.created_by = "leader-2".to_string();
    cache.store.put_setlist(other).await.unwrap();

    cache.tick();
    cache
        .store
        .update_sync_status("s1", SyncStatus::Pending)
        .await
        .unwrap();

    let mine = cache
        .store
        .query_setlists(&SetlistQuery::CreatedBy("leader-1".to_string()))
        .await
        .unwrap();
    assert_eq!(mine.len(), 2);

    let pending = cache
        .store
        .query_setlists(&SetlistQuery::SyncStatus(SyncStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "s1");

    let recent = cache
        .store
        .query_setlists(&SetlistQuery::RecentlyModified { limit: 2 })
        .await
        .unwrap();
    let ids: Vec<_> = recent.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s3"]);
}

#[tokio::test]
async fn test_preferences_upsert() {
    let cache = TestCache::new().await;
    assert!(cache.store.get_preference("user-1").await.unwrap().is_none());

    let mut pref = UserPreference::new("user-1");
    cache.store.put_preference(pref.clone()).await.unwrap();

    pref.theme = Theme::Dark;
    pref.font_size = FontSize::Large;
    pref.notation = NotationSystem::Nashville;
    pref.default_key = "D".to_string();
    cache.store.put_preference(pref.clone()).await.unwrap();

    assert_eq!(cache.store.get_preference("user-1").await.unwrap(), Some(pref));
}

#[tokio::test]
async fn test_stats_follow_mutations() {
    let cache = TestCache::new().await;
    cache.seed_songs(3).await;
    cache.store.put_setlist(setlist("s1")).await.unwrap();

    let stats = cache.store.get_storage_stats().await.unwrap().unwrap();
    assert_eq!(stats.song_count, 3);
    assert_eq!(stats.setlist_count, 1);
    assert!(stats.total_size > 0);
    assert_eq!(stats.total_size % 2, 0);
    assert_eq!(stats.last_cleanup, cache.clock.unix_timestamp_millis());
}

#[tokio::test]
async fn test_stats_event_is_published() {
    let cache = TestCache::new().await;
    let mut events = cache.events.subscribe();

    cache.store.put_song(song("a")).await.unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(
        event,
        CoreEvent::Cache(CacheEvent::StatsUpdated {
            song_count: 1,
            setlist_count: 0,
            total_size: cache.store.get_storage_stats().await.unwrap().unwrap().total_size,
        })
    );
}

#[tokio::test]
async fn test_operations_after_close_are_fatal() {
    let cache = TestCache::new().await;
    cache.store.put_song(song("a")).await.unwrap();
    cache.db.close().await;

    let err = cache.store.get_song("a").await.unwrap_err();
    assert!(matches!(err, CacheError::NotInitialized));
    assert!(err.is_fatal());

    assert!(matches!(
        cache.store.put_song(song("b")).await,
        Err(CacheError::NotInitialized)
    ));
    assert!(matches!(
        cache.store.clear_all().await,
        Err(CacheError::NotInitialized)
    ));
}
