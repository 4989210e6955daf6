use crate::context::CacheContext;
use crate::error::Result;
use crate::repositories::SongRepository;
use crate::stats::StatsAggregator;
use core_runtime::events::CacheEvent;
use std::sync::Arc;
use tracing::{info, instrument};

/// Least-recently-used song eviction. Setlists are never evicted.
#[derive(Clone)]
pub struct LruEvictor {
    ctx: CacheContext,
    songs: Arc<dyn SongRepository>,
    stats: StatsAggregator,
}

impl LruEvictor {
    pub fn new(ctx: CacheContext, songs: Arc<dyn SongRepository>, stats: StatsAggregator) -> Self {
        Self { ctx, songs, stats }
    }

    /// Remove the configured share of songs when the population is above the
    /// ceiling, then recompute stats. Returns the evicted ids.
    #[instrument(skip(self))]
    pub async fn evict(&self) -> Result<Vec<String>> {
        let config = &self.ctx.config;
        let evicted = self
            .songs
            .evict_least_recently_used(config.eviction_ceiling, config.eviction_percent)
            .await?;

        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted least recently used songs");
            self.ctx.emit(CacheEvent::SongsEvicted {
                count: evicted.len() as u64,
            });
        }

        self.stats.recompute().await?;
        Ok(evicted)
    }
}
