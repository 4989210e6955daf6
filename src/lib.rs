//! Songbook offline cache.
//!
//! Single dependency for host applications: `desktop-shims` (default) brings
//! the SQLite cache with the desktop storage estimator, `headless` brings the
//! cache alone and leaves the bridges to the host.

#[cfg(any(feature = "desktop-shims", feature = "headless"))]
pub use core_service::*;
