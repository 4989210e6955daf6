//! # Post-Commit Hooks
//!
//! Ordered follow-up work run on the same spawned task as a store mutation,
//! once the mutation has committed: stats recompute first, then the quota check (which may
//! evict). The primary write is already durable, so a failing hook is logged
//! and the chain moves on.

use crate::error::Result;
use crate::models::SyncStatus;
use crate::stats::StatsAggregator;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// A committed mutation of the entity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SongWritten { id: String },
    SetlistWritten { id: String },
    SetlistStatusChanged { id: String, status: SyncStatus },
    PreferenceWritten { user_id: String },
}

#[async_trait]
pub trait PostCommitHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn after_commit(&self, mutation: &Mutation) -> Result<()>;
}

/// Recomputes storage stats after every mutation.
pub struct StatsHook {
    stats: StatsAggregator,
}

impl StatsHook {
    pub fn new(stats: StatsAggregator) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl PostCommitHook for StatsHook {
    fn name(&self) -> &'static str {
        "stats"
    }

    async fn after_commit(&self, _mutation: &Mutation) -> Result<()> {
        self.stats.recompute().await.map(|_| ())
    }
}

#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn PostCommitHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn PostCommitHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in order. Failures never reach the caller.
    pub async fn run(&self, mutation: &Mutation) {
        for hook in &self.hooks {
            match hook.after_commit(mutation).await {
                Ok(()) => debug!(hook = hook.name(), ?mutation, "Post-commit hook completed"),
                Err(e) => warn!(
                    hook = hook.name(),
                    ?mutation,
                    error = %e,
                    "Post-commit hook failed"
                ),
            }
        }
    }
}
