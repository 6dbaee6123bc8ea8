// Job Service - enqueue, list and stats use cases

pub mod enqueue;

pub use enqueue::{parse_job_spec, validate_request, EnqueueRequest};

use crate::domain::{Job, JobState};
use crate::error::Result;
use crate::port::{IdProvider, JobStore, StateCounts, TimeProvider};
use std::sync::Arc;

/// Administrative job operations (everything except dispatch and DLQ)
pub struct JobService {
    store: Arc<dyn JobStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    default_max_retries: u32,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        default_max_retries: u32,
    ) -> Self {
        Self {
            store,
            id_provider,
            time_provider,
            default_max_retries,
        }
    }

    /// Enqueue a new job, returning its id
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<String> {
        enqueue::execute(
            self.store.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            self.default_max_retries,
            req,
        )
        .await
    }

    /// Parse a raw JSON job spec and enqueue it
    pub async fn enqueue_spec(&self, spec: &str) -> Result<String> {
        let req = parse_job_spec(spec)?;
        self.enqueue(req).await
    }

    /// Jobs in a state, oldest first
    pub async fn list(&self, state: JobState) -> Result<Vec<Job>> {
        self.store.list_by_state(state).await
    }

    /// Job counts for all five states
    pub async fn stats(&self) -> Result<StateCounts> {
        self.store.counts_by_state().await
    }
}
