//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the songbook core:
//! - Logging and tracing setup
//! - Event bus for cache and outbox notifications
//!
//! Other workspace crates depend on this crate for their logging conventions
//! and for the events they publish.

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
pub use events::{CacheEvent, CoreEvent, EventBus, EventStream, SyncEvent};
