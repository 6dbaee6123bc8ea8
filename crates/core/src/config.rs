// Engine configuration (built once at process start, passed by value)

use crate::application::dispatcher::constants::{
    DEFAULT_BACKOFF_BASE, DEFAULT_IDLE_INTERVAL, DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_RETRIES,
};
use crate::error::{AppError, Result};
use std::time::Duration;

/// Retry and dispatch settings shared by the enqueue path and the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Retry ceiling for jobs enqueued without an explicit `max_retries`
    pub max_retries: u32,
    /// Backoff delay is `backoff_base ^ attempts` seconds
    pub backoff_base: u32,
    /// Wall-clock limit for a single command execution
    pub job_timeout: Duration,
    /// Wait between polls when no job is due
    pub idle_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Reject settings the dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.job_timeout.is_zero() {
            return Err(AppError::Config("job_timeout must be greater than zero".into()));
        }
        if self.idle_interval.is_zero() {
            return Err(AppError::Config("idle_interval must be greater than zero".into()));
        }
        Ok(())
    }

    /// How long a `processing` claim may go untouched before it is treated as orphaned
    pub fn stale_claim_after(&self) -> Duration {
        self.job_timeout.saturating_mul(2)
    }
}
