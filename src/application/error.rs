use thiserror::Error;

use crate::domain::{FeeTotals, TermError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Class already exists: {0}")]
    ClassAlreadyExists(String),

    #[error("Class {class_name} still has {components} fee component(s)")]
    ClassInUse {
        class_name: String,
        components: i64,
    },

    #[error("Transaction failed, nothing was changed: {0:#}")]
    TransactionFailure(anyhow::Error),

    #[error("Aggregate for class {class_name} drifted: stored {stored}, components sum to {computed}")]
    ConsistencyViolation {
        class_name: String,
        stored: FeeTotals,
        computed: FeeTotals,
    },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    /// Only a failed unit of work may be retried as-is; the caller must
    /// re-read state before doing so.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransactionFailure(_))
    }
}

impl From<TermError> for AppError {
    fn from(err: TermError) -> Self {
        AppError::Validation(err.to_string())
    }
}
