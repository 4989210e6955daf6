//! Thread-safety marker used by every bridge trait.
//!
//! Bridge implementations are shared across async tasks behind `Arc`, so the
//! traits require `Send + Sync`. The blanket impl keeps those bounds in one
//! place instead of repeating them on each trait definition.

/// Marker trait equivalent to `Send + Sync`.
pub trait PlatformSendSync: Send + Sync {}

impl<T> PlatformSendSync for T where T: Send + Sync {}
