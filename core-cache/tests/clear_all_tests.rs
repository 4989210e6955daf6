mod common;

use common::{setlist, song, TestCache};
use core_cache::{CacheError, EntityKind, NewSyncOperation, SyncPayload, UserPreference};
use core_runtime::events::{CacheEvent, CoreEvent, EventStream};

async fn populated() -> TestCache {
    let cache = TestCache::new().await;
    cache.seed_songs(3).await;
    cache.store.put_setlist(setlist("s1")).await.unwrap();
    cache
        .store
        .put_preference(UserPreference::new("user-1"))
        .await
        .unwrap();
    cache
        .queue
        .enqueue(NewSyncOperation::update(SyncPayload::Setlist(setlist("s1"))))
        .await
        .unwrap();
    cache
        .queue
        .enqueue(NewSyncOperation::delete(EntityKind::Song, "song-000"))
        .await
        .unwrap();
    cache
}

#[tokio::test]
async fn test_clear_all_empties_every_store() {
    let cache = populated().await;
    let mut events = EventStream::new(cache.events.subscribe())
        .filter(|e| matches!(e, CoreEvent::Cache(CacheEvent::Cleared)));

    cache.store.clear_all().await.unwrap();

    assert_eq!(cache.store.song_count().await.unwrap(), 0);
    assert!(cache.store.get_setlist("s1").await.unwrap().is_none());
    assert!(cache.store.get_preference("user-1").await.unwrap().is_none());
    assert!(cache.queue.list_pending().await.unwrap().is_empty());
    assert!(cache.queue.stats().await.unwrap().is_empty());
    assert!(cache.store.get_storage_stats().await.unwrap().is_none());
    assert!(events.recv().await.is_ok());
}

#[tokio::test]
async fn test_failed_clear_all_leaves_stores_unchanged() {
    let cache = populated().await;
    let stats_before = cache.store.get_storage_stats().await.unwrap();
    let pending_before = cache.queue.list_pending().await.unwrap();

    // preferences are cleared after songs and setlists, so the abort lands
    // mid-transaction
    cache
        .db
        .execute_raw(
            "CREATE TRIGGER abort_clear BEFORE DELETE ON preferences \
             BEGIN SELECT RAISE(ABORT, 'simulated failure'); END",
        )
        .await
        .unwrap();

    let err = cache.store.clear_all().await.unwrap_err();
    assert!(matches!(err, CacheError::Database(_)));
    assert!(err.is_retryable());

    assert_eq!(cache.store.song_count().await.unwrap(), 3);
    assert!(cache.store.get_setlist("s1").await.unwrap().is_some());
    assert!(cache.store.get_preference("user-1").await.unwrap().is_some());
    assert_eq!(cache.queue.list_pending().await.unwrap(), pending_before);
    assert_eq!(cache.store.get_storage_stats().await.unwrap(), stats_before);

    cache.db.execute_raw("DROP TRIGGER abort_clear").await.unwrap();
    cache.store.clear_all().await.unwrap();
    assert_eq!(cache.store.song_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_clear_all_then_reuse() {
    let cache = populated().await;
    cache.store.clear_all().await.unwrap();

    cache.store.put_song(song("after")).await.unwrap();
    let stats = cache.store.get_storage_stats().await.unwrap().unwrap();
    assert_eq!(stats.song_count, 1);
    assert_eq!(stats.setlist_count, 0);
}
