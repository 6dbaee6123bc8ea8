// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("A job with ID '{0}' already exists")]
    DuplicateId(String),

    #[error("Unknown job state: {0}")]
    UnknownState(String),
}
