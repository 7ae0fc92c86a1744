use thiserror::Error;

/// Errors from the transaction layer
#[derive(Debug, Error)]
pub enum TxError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid entity name: {0}")]
    InvalidEntityName(String),

    #[error("Transaction handle already finalized")]
    HandleClosed,

    #[error("Transaction handle does not belong to this resource")]
    ForeignHandle,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Rollback itself failed while handling a nested failure; both errors
    /// are reported rather than either being swallowed.
    #[error("Rollback failed: {rollback} (while handling: {operation})")]
    RollbackFailed { operation: String, rollback: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
