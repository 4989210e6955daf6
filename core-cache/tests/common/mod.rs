#![allow(dead_code)]

use bridge_traits::storage::StorageEstimator;
use bridge_traits::time::ManualClock;
use core_cache::{
    CacheConfig, CacheContext, CacheDatabase, CachedSetlist, CachedSong, Difficulty, EntityStore,
    SyncQueue,
};
use core_runtime::events::EventBus;
use std::sync::Arc;
use std::time::Duration;

pub const START_MILLIS: i64 = 1_700_000_000_000;

pub struct TestCache {
    pub db: Arc<CacheDatabase>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
    pub ctx: CacheContext,
    pub store: EntityStore,
    pub queue: SyncQueue,
}

impl TestCache {
    pub async fn new() -> Self {
        Self::build(CacheConfig::in_memory(), None).await
    }

    pub async fn with_estimator(estimator: Arc<dyn StorageEstimator>) -> Self {
        Self::build(CacheConfig::in_memory(), Some(estimator)).await
    }

    pub async fn build(config: CacheConfig, estimator: Option<Arc<dyn StorageEstimator>>) -> Self {
        let db = Arc::new(
            CacheDatabase::open(&config)
                .await
                .expect("open in-memory cache"),
        );
        let clock = Arc::new(ManualClock::starting_at(START_MILLIS));
        let events = EventBus::new(256);
        let ctx = CacheContext::new(db.clone(), config)
            .with_clock(clock.clone())
            .with_event_bus(events.clone());

        let mut store = EntityStore::new(ctx.clone());
        if let Some(estimator) = estimator {
            store = store.with_storage_estimator(estimator);
        }
        let queue = SyncQueue::new(ctx.clone());

        Self {
            db,
            clock,
            events,
            ctx,
            store,
            queue,
        }
    }

    pub fn tick(&self) {
        self.clock.advance(Duration::from_millis(1));
    }

    /// Put `count` songs, each one millisecond after the previous.
    pub async fn seed_songs(&self, count: usize) -> Vec<CachedSong> {
        let mut stored = Vec::with_capacity(count);
        for i in 0..count {
            self.tick();
            stored.push(self.store.put_song(song(&format!("song-{:03}", i))).await.unwrap());
        }
        stored
    }
}

pub fn song(id: &str) -> CachedSong {
    CachedSong::new(id, format!("Title {}", id), "Chris Tomlin", "G", Difficulty::Intermediate)
        .with_tempo(72)
        .with_theme("Worship")
        .with_chord_data(serde_json::json!({
            "sections": [{ "name": "Verse 1", "lines": ["[G]How great is our [C]God"] }]
        }))
        .with_owner("leader-1", true)
}

pub fn setlist(id: &str) -> CachedSetlist {
    CachedSetlist::new(id, format!("Service {}", id), "leader-1")
        .with_song("song-000", 0)
        .with_song("song-001", 2)
        .with_tag("sunday")
        .with_venue("Main Hall", chrono::NaiveDate::from_ymd_opt(2024, 6, 2))
}
