//! # Event Bus System
//!
//! Broadcasts typed notifications from the songbook cache to interested
//! listeners (UI layers refreshing storage indicators, the drain process
//! waking up when new work is enqueued) using `tokio::sync::broadcast`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Entity Store ├──────────────>│           │     subscribe    ┌────────────┐
//! └──────────────┘               │ EventBus  ├─────────────────>│ UI layer   │
//! ┌──────────────┐     emit      │ (broadcast│                  └────────────┘
//! │ Sync Queue   ├──────────────>│  channel) ├─────────────────>│ Drain task │
//! └──────────────┘               └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Cache(CacheEvent::SongsEvicted { count: 12 }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Songs evicted from cache");
//! # }
//! ```
//!
//! Emitting with no subscribers returns an error; publishers in this
//! workspace ignore it, since nobody listening is a normal state.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Entity store, stats and quota events
    Cache(CacheEvent),
    /// Outbox events
    Sync(SyncEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::OperationFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::QuotaUnavailable { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::SongsEvicted { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Cleared) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events raised by the entity store and its post-commit hooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Storage stats were recomputed.
    StatsUpdated {
        song_count: u64,
        setlist_count: u64,
        total_size: u64,
    },
    /// Quota usage was measured and persisted.
    QuotaChecked {
        usage_percent: f64,
    },
    /// The host could not report storage usage; cleanup was skipped.
    QuotaUnavailable {
        reason: String,
    },
    /// Least-recently-used songs were removed.
    SongsEvicted {
        count: u64,
    },
    /// A setlist's sync status changed.
    SetlistStatusChanged {
        setlist_id: String,
        status: String,
    },
    /// Every store was emptied.
    Cleared,
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::StatsUpdated { .. } => "Storage stats recomputed",
            CacheEvent::QuotaChecked { .. } => "Storage quota checked",
            CacheEvent::QuotaUnavailable { .. } => "Storage quota unavailable",
            CacheEvent::SongsEvicted { .. } => "Songs evicted from cache",
            CacheEvent::SetlistStatusChanged { .. } => "Setlist sync status changed",
            CacheEvent::Cleared => "Cache cleared",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events raised by the sync queue (outbox).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A mutation was appended to the outbox.
    OperationEnqueued {
        operation_id: String,
        entity_type: String,
        entity_id: String,
    },
    /// The drain reported a failed transmission.
    OperationFailed {
        operation_id: String,
        retries: u32,
        message: Option<String>,
    },
    /// The drain confirmed the operation and it left the outbox.
    OperationRemoved {
        operation_id: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::OperationEnqueued { .. } => "Sync operation enqueued",
            SyncEvent::OperationFailed { .. } => "Sync operation failed",
            SyncEvent::OperationRemoved { .. } => "Sync operation removed",
        }
    }
}

impl From<CacheEvent> for CoreEvent {
    fn from(event: CacheEvent) -> Self {
        CoreEvent::Cache(event)
    }
}

impl From<SyncEvent> for CoreEvent {
    fn from(event: SyncEvent) -> Self {
        CoreEvent::Sync(event)
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus yields another producer on the same channel; each
/// `subscribe()` creates an independent receiver that sees only future
/// events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let sync_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Sync(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n`
    /// events and `RecvError::Closed` once every sender is dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueued(id: &str) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::OperationEnqueued {
            operation_id: id.to_string(),
            entity_type: "setlist".to_string(),
            entity_id: "sunday-am".to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(CoreEvent::Cache(CacheEvent::Cleared)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = enqueued("op-1");
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream =
            EventStream::new(bus.subscribe()).filter(|event| matches!(event, CoreEvent::Sync(_)));

        bus.emit(CoreEvent::Cache(CacheEvent::SongsEvicted { count: 3 }))
            .ok();
        let sync_event = enqueued("op-2");
        bus.emit(sync_event.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), sync_event);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(enqueued(&format!("op-{}", i))).ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Sync(SyncEvent::OperationFailed {
            operation_id: "op-1".to_string(),
            retries: 2,
            message: Some("503".to_string()),
        });
        assert_eq!(failed.severity(), EventSeverity::Warning);

        let evicted = CoreEvent::Cache(CacheEvent::SongsEvicted { count: 12 });
        assert_eq!(evicted.severity(), EventSeverity::Info);

        let stats = CoreEvent::Cache(CacheEvent::StatsUpdated {
            song_count: 1,
            setlist_count: 0,
            total_size: 512,
        });
        assert_eq!(stats.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Cache(CacheEvent::QuotaChecked {
            usage_percent: 42.5,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Cache\""));
        assert!(json.contains("\"event\":\"QuotaChecked\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
