// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for duplicate-id rejections, whichever layer raised them
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            AppError::Conflict(_) | AppError::Domain(crate::domain::DomainError::DuplicateId(_))
        )
    }

    /// True for malformed input rejected before touching the store
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Validation(_) | AppError::Serialization(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in the infra-sqlite crate
// by mapping into AppError::Database / AppError::Domain(DuplicateId)
