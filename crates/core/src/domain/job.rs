// Job Domain Model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::error::DomainError;

/// Job ID (caller-supplied or UUID v4)
pub type JobId = String;

/// Job State
///
/// `Failed` never reaches the store: a failed attempt is resolved to
/// `Pending` (retry) or `Dead` within the same outcome application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    /// Every logical state, in lifecycle order
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Completed and dead jobs only change through an explicit DLQ requeue
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,

    pub max_retries: u32,
    pub attempts: u32,

    pub created_at: i64, // epoch ms
    pub updated_at: i64, // epoch ms
    pub run_at: i64,     // epoch ms, earliest claim time
}

impl Job {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `command` - Command line to execute
    /// * `max_retries` - Retry ceiling, fixed for the life of the job
    /// * `now_millis` - Creation timestamp in epoch ms (injected, not system time)
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        max_retries: u32,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            state: JobState::Pending,
            max_retries,
            attempts: 0,
            created_at: now_millis,
            updated_at: now_millis,
            run_at: now_millis,
        }
    }

    /// Pending and past its scheduled time
    pub fn is_due(&self, now_millis: i64) -> bool {
        self.state == JobState::Pending && self.run_at <= now_millis
    }
}
