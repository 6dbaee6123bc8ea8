// Retry logic: exponential backoff with dead-letter routing
use tracing::{info, warn};

const MILLIS_PER_SEC: i64 = 1000;

/// Retry decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the job once `scheduled_at` (epoch ms) has passed
    Retry { delay_secs: i64, scheduled_at: i64 },
    /// Retries exhausted, route to the dead-letter queue
    DeadLetter,
}

/// Retry policy
///
/// Determines whether a failed job is retried based on:
/// - Attempt count (already including the failure being handled)
/// - Maximum retries allowed for the job
/// - Backoff base for the exponential delay
///
/// No jitter and no ceiling: the delay for attempt `n`
/// is exactly `backoff_base ^ n` seconds. Arithmetic saturates at `i64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff_base: u32,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Example
    /// ```text
    /// let policy = RetryPolicy::new(config.backoff_base);
    /// ```
    pub fn new(backoff_base: u32) -> Self {
        Self { backoff_base }
    }

    pub fn backoff_base(&self) -> u32 {
        self.backoff_base
    }

    /// Backoff delay in seconds for the given attempt number
    pub fn delay_secs(&self, attempts: u32) -> i64 {
        i64::from(self.backoff_base).saturating_pow(attempts)
    }

    /// Decide what happens to a job whose attempt number `attempts` just failed
    ///
    /// Returns:
    /// - `RetryDecision::Retry` when `attempts <= max_retries`
    /// - `RetryDecision::DeadLetter` when `attempts > max_retries`
    ///
    /// # Example
    /// ```text
    /// match policy.decide(job.attempts + 1, job.max_retries, now) {
    ///     RetryDecision::Retry { scheduled_at, .. } => store.schedule_retry(..).await?,
    ///     RetryDecision::DeadLetter => store.apply_outcome(.., JobState::Dead, ..).await?,
    /// }
    /// ```
    pub fn decide(&self, attempts: u32, max_retries: u32, now_millis: i64) -> RetryDecision {
        if attempts > max_retries {
            warn!(
                attempts = %attempts,
                max_retries = %max_retries,
                "Max retries exceeded, dead-lettering"
            );
            return RetryDecision::DeadLetter;
        }

        let delay_secs = self.delay_secs(attempts);
        let scheduled_at = now_millis.saturating_add(delay_secs.saturating_mul(MILLIS_PER_SEC));

        info!(
            attempt = %attempts,
            max_retries = %max_retries,
            delay_secs = %delay_secs,
            "Scheduling retry"
        );

        RetryDecision::Retry {
            delay_secs,
            scheduled_at,
        }
    }
}
