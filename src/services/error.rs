use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("required files missing: {}", .0.join(", "))]
    ValidationFailed(Vec<String>),
    #[error("restore of {target} failed: {reason}")]
    RestoreFailed { target: String, reason: String },
    #[error("operation failed: {0}")]
    OperationFailed(String),
    #[error("operation timed out after {attempts} attempts")]
    OperationTimeout { attempts: u32 },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("unexpected response from remote service: {0}")]
    Remote(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Failure of a best-effort step (backup, metadata enrichment).
///
/// Returned so callers decide explicitly to log and carry on; it never
/// fails the primary operation.
#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct SideEffectError {
    pub step: &'static str,
    #[source]
    pub source: StorageError,
}

impl SideEffectError {
    pub fn new(step: &'static str, source: StorageError) -> Self {
        Self { step, source }
    }
}

pub type SideEffectResult<T> = Result<T, SideEffectError>;
