// Application Layer - Use Cases and Business Logic

pub mod dispatcher;
pub mod dlq;
pub mod job_service;
pub mod retry;

// Re-exports
pub use dispatcher::{shutdown_channel, Dispatcher, ShutdownSender, ShutdownToken};
pub use dlq::DlqManager;
pub use job_service::{EnqueueRequest, JobService};
pub use retry::{RetryDecision, RetryPolicy};
