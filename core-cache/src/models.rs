//! # Domain Models
//!
//! Records persisted by the songbook cache. All timestamps are Unix
//! milliseconds taken from the injected [`Clock`](bridge_traits::time::Clock).

use crate::config::RetryPolicy;
use crate::error::{CacheError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Unix timestamp in milliseconds.
pub type Timestamp = i64;

/// Key of the single `storage_stats` row.
pub const STORAGE_STATS_KEY: &str = "current";

macro_rules! string_enum {
    ($name:ident, $store:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = CacheError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(CacheError::corrupt(
                        $store,
                        format!("unknown {} '{}'", stringify!($name), other),
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// =============================================================================
// Songs
// =============================================================================

/// Difficulty tier of a song arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

string_enum!(Difficulty, "songs" {
    Beginner => "beginner",
    Intermediate => "intermediate",
    Advanced => "advanced",
});

/// A song held in the local cache.
///
/// `chord_data` is the chord/lyric document exactly as the remote system
/// delivered it; the cache never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSong {
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Musical key, e.g. "G" or "Bb"
    pub key: String,
    /// Beats per minute
    pub tempo: Option<u32>,
    pub difficulty: Difficulty,
    pub themes: BTreeSet<String>,
    pub chord_data: serde_json::Value,
    pub created_by: Option<String>,
    pub is_public: bool,
    /// Refreshed on every read, drives LRU eviction
    pub last_accessed: Timestamp,
    pub cached_at: Timestamp,
}

impl CachedSong {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        key: impl Into<String>,
        difficulty: Difficulty,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            key: key.into(),
            tempo: None,
            difficulty,
            themes: BTreeSet::new(),
            chord_data: serde_json::Value::Null,
            created_by: None,
            is_public: true,
            last_accessed: 0,
            cached_at: 0,
        }
    }

    pub fn with_tempo(mut self, bpm: u32) -> Self {
        self.tempo = Some(bpm);
        self
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.themes.insert(theme.into());
        self
    }

    pub fn with_chord_data(mut self, chord_data: serde_json::Value) -> Self {
        self.chord_data = chord_data;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>, is_public: bool) -> Self {
        self.created_by = Some(owner.into());
        self.is_public = is_public;
        self
    }

    /// Case-insensitive substring match over title, artist and themes.
    pub fn matches_search(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        self.title.to_lowercase().contains(&needle)
            || self.artist.to_lowercase().contains(&needle)
            || self
                .themes
                .iter()
                .any(|theme| theme.to_lowercase().contains(&needle))
    }
}

/// Secondary-index lookups over the songs store.
#[derive(Debug, Clone, PartialEq)]
pub enum SongQuery {
    /// Full scan, case-insensitive substring over title, artist and themes
    Search(String),
    /// Exact title via the by-title index
    Title(String),
    /// Exact artist via the by-artist index
    Artist(String),
    /// Exact tier via the by-difficulty index
    Difficulty(Difficulty),
    /// Most recently read first, via the by-last-accessed index
    RecentlyAccessed { limit: u32 },
}

// =============================================================================
// Setlists
// =============================================================================

/// Synchronization state of a setlist relative to the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    Pending,
    Conflict,
}

string_enum!(SyncStatus, "setlists" {
    Synced => "synced",
    Pending => "pending",
    Conflict => "conflict",
});

/// A song reference inside a setlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetlistSong {
    pub song_id: String,
    /// Semitones to transpose from the song's key
    pub transpose: i8,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSetlist {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub songs: Vec<SetlistSong>,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub venue: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub sync_status: SyncStatus,
    pub last_modified: Timestamp,
    pub cached_at: Timestamp,
}

impl CachedSetlist {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_by: created_by.into(),
            songs: Vec::new(),
            tags: Vec::new(),
            is_public: false,
            venue: None,
            service_date: None,
            sync_status: SyncStatus::Synced,
            last_modified: 0,
            cached_at: 0,
        }
    }

    /// Append a song after the current last position.
    pub fn with_song(mut self, song_id: impl Into<String>, transpose: i8) -> Self {
        let position = self
            .songs
            .iter()
            .map(|s| s.position + 1)
            .max()
            .unwrap_or(0);
        self.songs.push(SetlistSong {
            song_id: song_id.into(),
            transpose,
            position,
        });
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>, service_date: Option<NaiveDate>) -> Self {
        self.venue = Some(venue.into());
        self.service_date = service_date;
        self
    }

    /// Positions must be unique so they form a total order.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CacheError::invalid_input("id", "setlist id cannot be empty"));
        }

        let mut seen = HashSet::with_capacity(self.songs.len());
        for song in &self.songs {
            if !seen.insert(song.position) {
                return Err(CacheError::invalid_input(
                    "songs",
                    format!("duplicate position {} in setlist {}", song.position, self.id),
                ));
            }
        }

        Ok(())
    }
}

/// Secondary-index lookups over the setlists store.
#[derive(Debug, Clone, PartialEq)]
pub enum SetlistQuery {
    CreatedBy(String),
    SyncStatus(SyncStatus),
    /// Most recently modified first
    RecentlyModified { limit: u32 },
}

// =============================================================================
// Preferences
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    Dark,
    System,
}

string_enum!(Theme, "preferences" {
    Light => "light",
    Dark => "dark",
    System => "system",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontSize {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

string_enum!(FontSize, "preferences" {
    Small => "small",
    Medium => "medium",
    Large => "large",
    ExtraLarge => "extra_large",
});

/// How chords are written on the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotationSystem {
    /// C, D, E...
    Letter,
    /// 1, 4, 5...
    Nashville,
    /// Do, Re, Mi...
    Solfege,
}

string_enum!(NotationSystem, "preferences" {
    Letter => "letter",
    Nashville => "nashville",
    Solfege => "solfege",
});

/// Per-user display preferences. Upsert-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    pub user_id: String,
    pub theme: Theme,
    pub font_size: FontSize,
    pub default_key: String,
    pub notation: NotationSystem,
    pub last_sync: Option<Timestamp>,
}

impl UserPreference {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            theme: Theme::System,
            font_size: FontSize::Medium,
            default_key: "C".to_string(),
            notation: NotationSystem::Letter,
            last_sync: None,
        }
    }
}

// =============================================================================
// Sync operations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

string_enum!(OperationKind, "sync_queue" {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Song,
    Setlist,
    Preference,
}

string_enum!(EntityKind, "sync_queue" {
    Song => "song",
    Setlist => "setlist",
    Preference => "preference",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperationStatus {
    /// Waiting for the drain
    Pending,
    /// Leased by exactly one drain attempt
    Processing,
    /// Last transmission failed
    Failed,
}

string_enum!(SyncOperationStatus, "sync_queue" {
    Pending => "pending",
    Processing => "processing",
    Failed => "failed",
});

/// Entity snapshot carried by a create/update operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "data", rename_all = "snake_case")]
pub enum SyncPayload {
    Song(CachedSong),
    Setlist(CachedSetlist),
    Preference(UserPreference),
}

impl SyncPayload {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            SyncPayload::Song(_) => EntityKind::Song,
            SyncPayload::Setlist(_) => EntityKind::Setlist,
            SyncPayload::Preference(_) => EntityKind::Preference,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            SyncPayload::Song(song) => &song.id,
            SyncPayload::Setlist(setlist) => &setlist.id,
            SyncPayload::Preference(pref) => &pref.user_id,
        }
    }
}

/// A mutation to append to the outbox.
///
/// Built only through [`create`](Self::create), [`update`](Self::update) and
/// [`delete`](Self::delete), so the entity kind and id always agree with the
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncOperation {
    operation: OperationKind,
    entity_type: EntityKind,
    entity_id: String,
    payload: Option<SyncPayload>,
}

impl NewSyncOperation {
    pub fn create(payload: SyncPayload) -> Self {
        Self::with_payload(OperationKind::Create, payload)
    }

    pub fn update(payload: SyncPayload) -> Self {
        Self::with_payload(OperationKind::Update, payload)
    }

    pub fn delete(entity_type: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            operation: OperationKind::Delete,
            entity_type,
            entity_id: entity_id.into(),
            payload: None,
        }
    }

    fn with_payload(operation: OperationKind, payload: SyncPayload) -> Self {
        Self {
            operation,
            entity_type: payload.entity_kind(),
            entity_id: payload.entity_id().to_string(),
            payload: Some(payload),
        }
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn entity_type(&self) -> EntityKind {
        self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub(crate) fn into_parts(self) -> (OperationKind, EntityKind, String, Option<SyncPayload>) {
        (self.operation, self.entity_type, self.entity_id, self.payload)
    }
}

/// An outbox entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    pub operation: OperationKind,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub payload: Option<SyncPayload>,
    /// Enqueue time
    pub timestamp: Timestamp,
    pub retries: u32,
    pub status: SyncOperationStatus,
    pub last_error: Option<String>,
}

impl SyncOperation {
    /// Identity derived from the target entity and the enqueue time.
    ///
    /// `sequence` disambiguates operations enqueued for the same entity within
    /// the same millisecond.
    pub fn derive_id(
        entity_type: EntityKind,
        entity_id: &str,
        timestamp: Timestamp,
        sequence: u64,
    ) -> String {
        format!("{}-{}-{}-{}", entity_type, entity_id, timestamp, sequence)
    }

    /// Whether the drain may attempt this operation again.
    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        self.retries < policy.max_retries
    }

    /// Failed and out of retries.
    pub fn is_dead_lettered(&self, policy: &RetryPolicy) -> bool {
        self.status == SyncOperationStatus::Failed && !self.can_retry(policy)
    }

    /// Exponential backoff before the next attempt.
    pub fn next_retry_delay(&self, policy: &RetryPolicy) -> Duration {
        if self.retries == 0 {
            return Duration::ZERO;
        }

        let exponent = (self.retries - 1).min(31);
        policy
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(policy.max_delay)
            .min(policy.max_delay)
    }
}

/// Outbox counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    /// Failed and still retryable
    pub failed: u64,
    /// Failed with no retries left
    pub dead_lettered: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.failed + self.dead_lettered
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

// =============================================================================
// Storage stats
// =============================================================================

/// Derived summary of the cache contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Estimated bytes used by songs and setlists
    pub total_size: u64,
    pub song_count: u64,
    pub setlist_count: u64,
    pub last_cleanup: Timestamp,
    /// Written only by the quota monitor
    pub quota_usage: f64,
}
