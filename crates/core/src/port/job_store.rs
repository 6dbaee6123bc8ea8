// Job Store Port (Interface)

use crate::domain::{Job, JobId, JobState};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Job count per state; every state is present, missing ones count as zero
pub type StateCounts = BTreeMap<JobState, i64>;

/// Persistence interface for the job table
///
/// All mutations are single atomic units: a failed call leaves the row as it was.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job as `pending`
    ///
    /// # Errors
    /// - `DomainError::DuplicateId` if a job with the same id exists (existing row untouched)
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Claim the oldest due job
    ///
    /// Selects `state = pending AND run_at <= now` ordered by `created_at`
    /// and flips it to `processing` in the same atomic unit. Under concurrent
    /// callers a given job is returned to at most one of them.
    async fn claim_next(&self, now_millis: i64) -> Result<Option<Job>>;

    /// Set the state (and attempts, when supplied) of a non-terminal job
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job does not exist
    /// - `AppError::InvalidState` if the job is already completed or dead
    async fn apply_outcome(&self, id: &JobId, state: JobState, attempts: Option<u32>)
        -> Result<()>;

    /// Put a failed job back to `pending`, eligible again at `run_at`
    async fn schedule_retry(&self, id: &JobId, attempts: u32, run_at: i64) -> Result<()>;

    /// Reset a dead job to `pending` with zero attempts, due now
    ///
    /// Returns false (and changes nothing) if the job is absent or not dead.
    async fn requeue_from_dead(&self, id: &JobId) -> Result<bool>;

    /// All jobs in a state, oldest first
    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>>;

    /// Count jobs by state
    async fn counts_by_state(&self) -> Result<StateCounts>;

    /// Processing jobs not touched since `updated_before` (orphaned claims)
    async fn find_stale_processing(&self, updated_before: i64) -> Result<Vec<Job>>;
}

/// Counts map with every state present at zero
pub fn empty_counts() -> StateCounts {
    JobState::ALL.iter().map(|s| (*s, 0)).collect()
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::DomainError;
    use crate::error::AppError;
    use crate::port::TimeProvider;
    use std::sync::{Arc, Mutex, MutexGuard};

    /// In-memory job store; one mutex makes every operation atomic
    pub struct InMemoryJobStore {
        jobs: Mutex<Vec<Job>>,
        time_provider: Arc<dyn TimeProvider>,
    }

    impl InMemoryJobStore {
        pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                jobs: Mutex::new(Vec::new()),
                time_provider,
            }
        }

        fn lock(&self) -> Result<MutexGuard<'_, Vec<Job>>> {
            self.jobs
                .lock()
                .map_err(|_| AppError::Internal("job store mutex poisoned".to_string()))
        }

        fn update_live<F>(&self, id: &JobId, target: JobState, mutate: F) -> Result<()>
        where
            F: FnOnce(&mut Job),
        {
            let now = self.time_provider.now_millis();
            let mut jobs = self.lock()?;
            let job = jobs
                .iter_mut()
                .find(|j| &j.id == id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;

            if job.state.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "Cannot update job {} from {} to {}",
                    id, job.state, target
                )));
            }

            mutate(job);
            job.updated_at = job.updated_at.max(now);
            Ok(())
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.lock()?;
            if jobs.iter().any(|j| j.id == job.id) {
                return Err(DomainError::DuplicateId(job.id.clone()).into());
            }
            let mut stored = job.clone();
            stored.state = JobState::Pending;
            jobs.push(stored);
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.lock()?.iter().find(|j| &j.id == id).cloned())
        }

        async fn claim_next(&self, now_millis: i64) -> Result<Option<Job>> {
            let mut jobs = self.lock()?;
            // Vec order is insertion order, so min_by_key keeps FIFO on ties
            let next = jobs
                .iter_mut()
                .filter(|j| j.is_due(now_millis))
                .min_by_key(|j| j.created_at);

            Ok(next.map(|job| {
                job.state = JobState::Processing;
                job.updated_at = job.updated_at.max(now_millis);
                job.clone()
            }))
        }

        async fn apply_outcome(
            &self,
            id: &JobId,
            state: JobState,
            attempts: Option<u32>,
        ) -> Result<()> {
            if state == JobState::Failed {
                return Err(AppError::InvalidState(
                    "'failed' is resolved to pending or dead and never stored".to_string(),
                ));
            }
            self.update_live(id, state, |job| {
                job.state = state;
                if let Some(attempts) = attempts {
                    job.attempts = attempts;
                }
            })
        }

        async fn schedule_retry(&self, id: &JobId, attempts: u32, run_at: i64) -> Result<()> {
            self.update_live(id, JobState::Pending, |job| {
                job.state = JobState::Pending;
                job.attempts = attempts;
                job.run_at = run_at;
            })
        }

        async fn requeue_from_dead(&self, id: &JobId) -> Result<bool> {
            let now = self.time_provider.now_millis();
            let mut jobs = self.lock()?;
            match jobs
                .iter_mut()
                .find(|j| &j.id == id && j.state == JobState::Dead)
            {
                Some(job) => {
                    job.state = JobState::Pending;
                    job.attempts = 0;
                    job.run_at = now;
                    job.updated_at = job.updated_at.max(now);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>> {
            let mut matching: Vec<Job> = self
                .lock()?
                .iter()
                .filter(|j| j.state == state)
                .cloned()
                .collect();
            matching.sort_by_key(|j| j.created_at);
            Ok(matching)
        }

        async fn counts_by_state(&self) -> Result<StateCounts> {
            let mut counts = empty_counts();
            for job in self.lock()?.iter() {
                *counts.entry(job.state).or_insert(0) += 1;
            }
            Ok(counts)
        }

        async fn find_stale_processing(&self, updated_before: i64) -> Result<Vec<Job>> {
            Ok(self
                .lock()?
                .iter()
                .filter(|j| j.state == JobState::Processing && j.updated_at < updated_before)
                .cloned()
                .collect())
        }
    }
}
