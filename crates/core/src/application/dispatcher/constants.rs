// Dispatcher constants (no magic values)
use std::time::Duration;

/// Sleep duration when no job is due (5s)
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(5);

/// Sleep duration after a store error before the next iteration (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Tries per outcome write before the job is left to stale-claim recovery
pub const STORE_WRITE_ATTEMPTS: u32 = 3;

/// Pause between outcome write tries
pub const STORE_WRITE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Wall-clock limit for one command execution (5 minutes)
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Retry ceiling for jobs enqueued without `max_retries`
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base of the exponential backoff, in seconds
pub const DEFAULT_BACKOFF_BASE: u32 = 3;

/// Diagnostic recorded when a stale `processing` claim is recovered
pub const ABANDONED_CLAIM_REASON: &str = "claim abandoned by a previous worker";
