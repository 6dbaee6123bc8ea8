// Dead-letter queue administration

use crate::domain::{Job, JobId, JobState};
use crate::error::Result;
use crate::port::JobStore;
use std::sync::Arc;
use tracing::info;

/// Lists dead jobs and puts them back in the queue on request
pub struct DlqManager {
    store: Arc<dyn JobStore>,
}

impl DlqManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Jobs currently in the dead-letter queue, oldest first
    pub async fn list(&self) -> Result<Vec<Job>> {
        self.store.list_by_state(JobState::Dead).await
    }

    /// Requeue a dead job with a fresh retry budget
    ///
    /// Returns false when the job does not exist or is not dead; the two
    /// causes are not distinguished.
    pub async fn retry(&self, id: &JobId) -> Result<bool> {
        let requeued = self.store.requeue_from_dead(id).await?;
        if requeued {
            info!(job_id = %id, "Dead job requeued");
        } else {
            info!(job_id = %id, "DLQ retry ignored: job absent or not dead");
        }
        Ok(requeued)
    }
}
