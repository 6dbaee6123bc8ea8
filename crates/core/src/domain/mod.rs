// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, JobState};
