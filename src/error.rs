use sea_orm::{DbErr, TransactionError};
use thiserror::Error;

/// Errors the voting engine can return to the transport layer.
///
/// Every variant except `Database` is detected before any state mutation,
/// so a failed write never leaves partial weights or a stray notification.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed on {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{0}")]
    Conflict(String),

    #[error("delegation would create a cycle back to the delegator")]
    Cycle,

    #[error("participants cannot delegate to themselves")]
    SelfDelegation,

    #[error("{0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

impl From<TransactionError<EngineError>> for EngineError {
    fn from(err: TransactionError<EngineError>) -> Self {
        match err {
            TransactionError::Connection(db) => Self::Database(db),
            TransactionError::Transaction(inner) => inner,
        }
    }
}
