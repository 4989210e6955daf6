mod common;

use common::{setlist, song, TestCache, START_MILLIS};
use core_cache::{
    CacheConfig, EntityKind, NewSyncOperation, OperationKind, RetryPolicy, SyncOperationStatus,
    SyncPayload,
};
use core_runtime::events::{CoreEvent, EventStream, SyncEvent};
use std::time::Duration;

#[tokio::test]
async fn test_enqueue_starts_pending_with_zero_retries() {
    let cache = TestCache::new().await;
    let op = cache
        .queue
        .enqueue(NewSyncOperation::create(SyncPayload::Song(song("a"))))
        .await
        .unwrap();

    assert_eq!(op.status, SyncOperationStatus::Pending);
    assert_eq!(op.retries, 0);
    assert_eq!(op.timestamp, START_MILLIS);
    assert_eq!(op.entity_type, EntityKind::Song);
    assert_eq!(op.entity_id, "a");
    assert!(op.id.starts_with(&format!("song-a-{}-", START_MILLIS)));

    let stored = cache.queue.get(&op.id).await.unwrap().unwrap();
    assert_eq!(stored, op);
}

#[tokio::test]
async fn test_list_pending_preserves_insertion_order() {
    let cache = TestCache::new().await;
    let mut ids = Vec::new();
    for id in ["c", "a", "b"] {
        // same millisecond for every enqueue
        let op = cache
            .queue
            .enqueue(NewSyncOperation::delete(EntityKind::Song, id))
            .await
            .unwrap();
        ids.push(op.id);
    }

    let pending: Vec<_> = cache
        .queue
        .list_pending()
        .await
        .unwrap()
        .into_iter()
        .map(|op| op.id)
        .collect();
    assert_eq!(pending, ids);
}

#[tokio::test]
async fn test_retry_accounting() {
    let cache = TestCache::new().await;
    let op = cache
        .queue
        .enqueue(NewSyncOperation::update(SyncPayload::Setlist(setlist("s1"))))
        .await
        .unwrap();

    for _ in 0..2 {
        assert!(cache
            .queue
            .mark_status(&op.id, SyncOperationStatus::Failed, true)
            .await
            .unwrap());
    }

    let stored = cache.queue.get(&op.id).await.unwrap().unwrap();
    assert_eq!(stored.retries, 2);
    assert_eq!(stored.status, SyncOperationStatus::Failed);
}

#[tokio::test]
async fn test_mark_status_without_increment_keeps_retries() {
    let cache = TestCache::new().await;
    let op = cache
        .queue
        .enqueue(NewSyncOperation::delete(EntityKind::Preference, "user-1"))
        .await
        .unwrap();

    cache
        .queue
        .mark_status(&op.id, SyncOperationStatus::Processing, false)
        .await
        .unwrap();
    let stored = cache.queue.get(&op.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncOperationStatus::Processing);
    assert_eq!(stored.retries, 0);

    // processing operations are leased and not listed
    assert!(cache.queue.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mark_failed_records_error_and_publishes() {
    let cache = TestCache::new().await;
    let mut events =
        EventStream::new(cache.events.subscribe()).filter(|e| matches!(e, CoreEvent::Sync(_)));

    let op = cache
        .queue
        .enqueue(NewSyncOperation::delete(EntityKind::Setlist, "s1"))
        .await
        .unwrap();
    let failed = cache
        .queue
        .mark_failed(&op.id, "503 Service Unavailable")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(failed.retries, 1);
    assert_eq!(failed.last_error.as_deref(), Some("503 Service Unavailable"));

    assert!(matches!(
        events.recv().await.unwrap(),
        CoreEvent::Sync(SyncEvent::OperationEnqueued { .. })
    ));
    assert_eq!(
        events.recv().await.unwrap(),
        CoreEvent::Sync(SyncEvent::OperationFailed {
            operation_id: op.id.clone(),
            retries: 1,
            message: Some("503 Service Unavailable".to_string()),
        })
    );
}

#[tokio::test]
async fn test_exhausted_operations_are_dead_lettered() {
    let config = CacheConfig::in_memory().with_retry_policy(
        RetryPolicy::default()
            .with_max_retries(2)
            .with_backoff(Duration::from_secs(1), Duration::from_secs(30)),
    );
    let cache = TestCache::build(config, None).await;

    let op = cache
        .queue
        .enqueue(NewSyncOperation::delete(EntityKind::Song, "a"))
        .await
        .unwrap();

    cache.queue.mark_failed(&op.id, "timeout").await.unwrap();
    let listed = cache.queue.list_pending().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed[0].next_retry_delay(cache.queue.retry_policy()),
        Duration::from_secs(1)
    );

    cache.queue.mark_failed(&op.id, "timeout").await.unwrap();
    assert!(cache.queue.list_pending().await.unwrap().is_empty());
    assert!(cache.queue.claim(&op.id).await.unwrap().is_none());

    let dead = cache.queue.list_dead_lettered().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, op.id);

    let stats = cache.queue.stats().await.unwrap();
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.total(), 1);
}

#[tokio::test]
async fn test_list_for_entity_and_stats() {
    let cache = TestCache::new().await;
    cache
        .queue
        .enqueue(NewSyncOperation::create(SyncPayload::Setlist(setlist("s1"))))
        .await
        .unwrap();
    cache
        .queue
        .enqueue(NewSyncOperation::create(SyncPayload::Setlist(setlist("s2"))))
        .await
        .unwrap();
    let claimed = cache
        .queue
        .enqueue(NewSyncOperation::delete(EntityKind::Setlist, "s1"))
        .await
        .unwrap();
    cache.queue.claim(&claimed.id).await.unwrap().unwrap();

    let for_s1 = cache
        .queue
        .list_for_entity(EntityKind::Setlist, "s1")
        .await
        .unwrap();
    assert_eq!(for_s1.len(), 2);
    assert_eq!(for_s1[0].operation, OperationKind::Create);
    assert_eq!(for_s1[1].operation, OperationKind::Delete);

    let stats = cache.queue.stats().await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.processing, 1);
    assert_eq!(stats.total(), 3);
}

#[tokio::test]
async fn test_payload_round_trips_through_queue() {
    let cache = TestCache::new().await;
    let payload = SyncPayload::Setlist(setlist("s1"));
    let op = cache
        .queue
        .enqueue(NewSyncOperation::update(payload.clone()))
        .await
        .unwrap();

    let stored = cache.queue.get(&op.id).await.unwrap().unwrap();
    assert_eq!(stored.payload, Some(payload));
    assert_eq!(stored.operation, OperationKind::Update);
}

#[tokio::test]
async fn test_drain_scenario_create_update_delete() {
    let cache = TestCache::new().await;
    let mut ids = Vec::new();
    for op in [
        NewSyncOperation::create(SyncPayload::Setlist(setlist("s1"))),
        NewSyncOperation::update(SyncPayload::Setlist(setlist("s1"))),
        NewSyncOperation::delete(EntityKind::Setlist, "s1"),
    ] {
        ids.push(cache.queue.enqueue(op).await.unwrap().id);
    }

    let pending = cache.queue.list_pending().await.unwrap();
    assert_eq!(pending.len(), 3);
    let kinds: Vec<_> = pending.iter().map(|op| op.operation).collect();
    assert_eq!(
        kinds,
        vec![OperationKind::Create, OperationKind::Update, OperationKind::Delete]
    );

    assert!(cache.queue.remove(&ids[0]).await.unwrap());
    assert!(cache.queue.remove(&ids[1]).await.unwrap());
    assert!(cache
        .queue
        .mark_status(&ids[2], SyncOperationStatus::Failed, true)
        .await
        .unwrap());

    let pending = cache.queue.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, ids[2]);
    assert_eq!(pending[0].retries, 1);
    assert_eq!(pending[0].status, SyncOperationStatus::Failed);

    // retry: lease, then confirmed by the remote system
    let leased = cache.queue.claim(&ids[2]).await.unwrap().unwrap();
    assert_eq!(leased.status, SyncOperationStatus::Processing);
    assert!(cache.queue.remove(&ids[2]).await.unwrap());

    assert!(cache.queue.list_pending().await.unwrap().is_empty());
    assert!(!cache.queue.remove(&ids[2]).await.unwrap());
}
