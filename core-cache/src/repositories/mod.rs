//! # Repositories
//!
//! One async trait per entity store with a SQLite implementation behind it.
//! Every call borrows the [`CacheDatabase`](crate::db::CacheDatabase) session
//! for its own duration and runs under the configured deadline.

pub mod preference;
pub mod setlist;
pub mod song;

pub use preference::{PreferenceRepository, SqlitePreferenceRepository};
pub use setlist::{SetlistRepository, SqliteSetlistRepository};
pub use song::{SongRepository, SqliteSongRepository};
