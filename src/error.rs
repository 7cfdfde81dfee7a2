// Engine Errors - one taxonomy for store, integrity and producer failures
//
// Every variant aborts a recompute. Cancellation of a read-only stream is
// not an error and never shows up here.

use thiserror::Error;

use crate::model::UserId;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Query or transaction failure in the game store
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Game history contradicts the ledger (missing entry, repeated player)
    #[error("data integrity failure: {0}")]
    DataIntegrity(String),

    /// The background producer died or could not be started
    #[error("game stream producer failed: {0}")]
    Producer(String),

    /// Input rejected before it reached the store
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("writer connection lock poisoned")]
    LockPoisoned,

    /// A blocking recompute task was cancelled or panicked
    #[error("background task failed: {0}")]
    Task(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("import failed: {0}")]
    Import(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn missing_entry(user: UserId) -> Self {
        EngineError::DataIntegrity(format!("user {} has no ledger entry", user))
    }

    /// True when the recorded history itself is bad, as opposed to the store
    pub fn is_integrity(&self) -> bool {
        matches!(self, EngineError::DataIntegrity(_))
    }
}
