use crate::config::CacheConfig;
use crate::db::CacheDatabase;
use bridge_traits::time::{Clock, SystemClock};
use core_runtime::events::{CoreEvent, EventBus};
use std::sync::Arc;
use tracing::trace;

/// Shared collaborators handed to every cache component.
#[derive(Clone)]
pub struct CacheContext {
    pub db: Arc<CacheDatabase>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<CacheConfig>,
    events: Option<EventBus>,
}

impl CacheContext {
    pub fn new(db: Arc<CacheDatabase>, config: CacheConfig) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
            events: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.events.as_ref()
    }

    /// Current time in Unix milliseconds.
    pub fn now_millis(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    /// Publish to the bus if one is attached. Nobody listening is not an error.
    pub(crate) fn emit(&self, event: impl Into<CoreEvent>) {
        if let Some(bus) = &self.events {
            if bus.emit(event.into()).is_err() {
                trace!("No event subscribers");
            }
        }
    }
}
