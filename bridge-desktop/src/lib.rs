//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `StorageEstimator` using the on-disk size of the SQLite cache database
//!   measured with `tokio::fs`, compared against a configured quota
//!
//! Desktop hosts have no browser-style storage manager, so the quota is a
//! budget chosen by the application rather than one imposed by the OS.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{default_database_path, DatabaseFileEstimator};
//!
//! let path = default_database_path();
//! let estimator = DatabaseFileEstimator::new(&path, 512 * 1024 * 1024);
//! ```

mod storage;

pub use storage::{default_database_path, DatabaseFileEstimator, DEFAULT_QUOTA_BYTES};
