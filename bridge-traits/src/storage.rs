//! Storage Quota Abstractions
//!
//! The offline cache needs to know how much local persistent storage it is
//! consuming and how much the host allows. Browsers expose this through the
//! storage manager estimate, mobile platforms through their sandbox APIs, and
//! desktop builds derive it from the database files. Not every host can
//! answer, so the estimate is optional.

use serde::{Deserialize, Serialize};

use crate::{error::Result, platform::PlatformSendSync};

/// Snapshot of local storage consumption reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEstimate {
    /// Bytes currently used by the application
    pub used: u64,
    /// Bytes the host allows the application to use
    pub quota: u64,
}

impl StorageEstimate {
    pub fn new(used: u64, quota: u64) -> Self {
        Self { used, quota }
    }

    /// Usage as a percentage of the quota.
    ///
    /// A host that reports a zero quota yields `0.0` rather than dividing by
    /// zero.
    pub fn usage_percent(&self) -> f64 {
        if self.quota == 0 {
            return 0.0;
        }

        (self.used as f64 / self.quota as f64) * 100.0
    }
}

/// Storage usage estimate provider
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::StorageEstimator;
///
/// async fn report(estimator: &dyn StorageEstimator) {
///     match estimator.estimate().await {
///         Ok(Some(estimate)) => println!("{:.1}% used", estimate.usage_percent()),
///         Ok(None) => println!("host cannot report storage usage"),
///         Err(e) => eprintln!("estimate failed: {}", e),
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait StorageEstimator: PlatformSendSync {
    /// Query the host for current usage.
    ///
    /// Returns `Ok(None)` when the host environment has no way to report
    /// usage; callers must treat that as "unknown", not as "empty".
    async fn estimate(&self) -> Result<Option<StorageEstimate>>;
}

/// Estimator for hosts that cannot report storage usage at all.
#[derive(Debug, Clone, Default)]
pub struct UnsupportedStorageEstimator;

#[async_trait::async_trait]
impl StorageEstimator for UnsupportedStorageEstimator {
    async fn estimate(&self) -> Result<Option<StorageEstimate>> {
        Ok(None)
    }
}
