// Port Layer - Interfaces for external dependencies

pub mod command_executor;
pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod time_provider;

// Re-exports
pub use command_executor::{CommandExecutor, ExecutionOutcome};
pub use id_provider::IdProvider;
pub use job_store::{JobStore, StateCounts};
pub use time_provider::TimeProvider;
