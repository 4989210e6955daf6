use bridge_traits::error::BridgeError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache database is not initialized (open it before use, and not after close)")]
    NotInitialized,

    #[error("Storage transaction failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Corrupt record in {store}: {message}")]
    CorruptRecord { store: &'static str, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Operation {operation} exceeded its deadline of {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Storage quota unavailable: {0}")]
    QuotaUnavailable(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

impl CacheError {
    pub(crate) fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn corrupt(store: &'static str, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            store,
            message: message.into(),
        }
    }

    /// Precondition violations the caller must fix rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized | Self::Migration(_) | Self::Config(_)
        )
    }

    /// Environmental failures where trying the same call again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
