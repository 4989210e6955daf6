//! # Quota Monitor
//!
//! Compares host-reported storage usage against the quota and evicts least
//! recently used songs above the configured threshold. An estimate the host
//! cannot provide skips the check; it is logged and never raised.

use crate::context::CacheContext;
use crate::error::{CacheError, Result};
use crate::eviction::LruEvictor;
use crate::hooks::{Mutation, PostCommitHook};
use crate::stats::StatsAggregator;
use async_trait::async_trait;
use bridge_traits::storage::{StorageEstimate, StorageEstimator};
use core_runtime::events::CacheEvent;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of one quota check.
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaCheck {
    /// No estimate was available
    Skipped { reason: String },
    Measured { usage_percent: f64, evicted: usize },
}

impl QuotaCheck {
    pub fn evicted(&self) -> usize {
        match self {
            QuotaCheck::Skipped { .. } => 0,
            QuotaCheck::Measured { evicted, .. } => *evicted,
        }
    }
}

#[derive(Clone)]
pub struct QuotaMonitor {
    ctx: CacheContext,
    estimator: Arc<dyn StorageEstimator>,
    stats: StatsAggregator,
    evictor: LruEvictor,
}

impl QuotaMonitor {
    pub fn new(
        ctx: CacheContext,
        estimator: Arc<dyn StorageEstimator>,
        stats: StatsAggregator,
        evictor: LruEvictor,
    ) -> Self {
        Self {
            ctx,
            estimator,
            stats,
            evictor,
        }
    }

    #[instrument(skip(self))]
    pub async fn check_and_cleanup(&self) -> Result<QuotaCheck> {
        let estimate = match self.estimate().await {
            Ok(estimate) => estimate,
            Err(e) => return Ok(self.skip(e.to_string())),
        };

        let usage_percent = estimate.usage_percent();
        self.stats.set_quota_usage(usage_percent).await?;
        self.ctx.emit(CacheEvent::QuotaChecked { usage_percent });

        let threshold = self.ctx.config.quota_threshold_percent;
        if usage_percent <= threshold {
            debug!(usage_percent, threshold, "Storage usage within quota");
            return Ok(QuotaCheck::Measured {
                usage_percent,
                evicted: 0,
            });
        }

        info!(usage_percent, threshold, "Storage usage above threshold, evicting");
        let evicted = self.evictor.evict().await?;

        Ok(QuotaCheck::Measured {
            usage_percent,
            evicted: evicted.len(),
        })
    }

    async fn estimate(&self) -> Result<StorageEstimate> {
        self.ctx
            .db
            .with_deadline("quota.estimate", async {
                self.estimator.estimate().await?.ok_or_else(|| {
                    CacheError::QuotaUnavailable("host reported no storage estimate".to_string())
                })
            })
            .await
    }

    fn skip(&self, reason: String) -> QuotaCheck {
        warn!(%reason, "Storage estimate unavailable, skipping quota check");
        self.ctx.emit(CacheEvent::QuotaUnavailable {
            reason: reason.clone(),
        });
        QuotaCheck::Skipped { reason }
    }
}

#[async_trait]
impl PostCommitHook for QuotaMonitor {
    fn name(&self) -> &'static str {
        "quota"
    }

    async fn after_commit(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::SongWritten { .. } | Mutation::SetlistWritten { .. } => {
                self.check_and_cleanup().await.map(|_| ())
            }
            _ => Ok(()),
        }
    }
}
