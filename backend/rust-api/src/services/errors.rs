use thiserror::Error;

use super::question_generator::GenerationError;

/// Failures surfaced by the learning-loop operations.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    AlreadyCompleted(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl LoopError {
    pub fn not_found(message: impl Into<String>) -> Self {
        LoopError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        LoopError::Forbidden(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        LoopError::Validation(message.into())
    }

    pub fn already_completed(message: impl Into<String>) -> Self {
        LoopError::AlreadyCompleted(message.into())
    }
}
