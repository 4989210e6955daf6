use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Cache error: {0}")]
    Cache(#[from] core_cache::CacheError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),
}

impl CoreError {
    /// The service cannot continue; the host must rebuild it.
    pub fn is_fatal(&self) -> bool {
        match self {
            CoreError::InitializationFailed(_) => true,
            CoreError::Cache(e) => e.is_fatal(),
            CoreError::Runtime(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
