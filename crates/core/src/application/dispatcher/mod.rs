// Dispatcher - the worker loop that drives the job state machine

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::config::EngineConfig;
use crate::domain::{Job, JobState};
use crate::error::{AppError, Result};
use crate::port::{CommandExecutor, ExecutionOutcome, JobStore, TimeProvider};
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Dispatcher claims due jobs one at a time and applies their outcome
///
/// It is the only writer of the `processing -> {completed, pending, dead}`
/// edges. Jobs run strictly sequentially: the loop awaits each command
/// before polling again.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn CommandExecutor>,
    time_provider: Arc<dyn TimeProvider>,
    retry_policy: RetryPolicy,
    config: EngineConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn CommandExecutor>,
        time_provider: Arc<dyn TimeProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            executor,
            time_provider,
            retry_policy: RetryPolicy::new(config.backoff_base),
            config,
        }
    }

    /// Run the dispatch loop until shutdown is requested
    ///
    /// Shutdown is observed between iterations and during idle waits; a
    /// command that is already running is always awaited to completion.
    /// Stale claims are recovered at start and again on every idle iteration.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(
            backoff_base = self.retry_policy.backoff_base(),
            job_timeout_ms = self.config.job_timeout.as_millis() as u64,
            idle_interval_ms = self.config.idle_interval.as_millis() as u64,
            "Dispatcher started"
        );

        self.recover_logged("Stale claim recovery failed").await;

        loop {
            if shutdown.is_shutdown() {
                info!("Dispatcher shutting down");
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    // Picks up claims stranded by a lost outcome write
                    self.recover_logged("Idle stale claim recovery failed").await;

                    // Nothing due, sleep (or wait for shutdown)
                    tokio::select! {
                        _ = sleep(self.config.idle_interval) => {},
                        _ = shutdown.wait() => {
                            info!("Dispatcher interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    // Store errors must not kill the worker
                    error!(error = %e, "Dispatcher iteration failed");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!("Dispatcher interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!("Dispatcher stopped");
        Ok(())
    }

    /// Claim and execute the next due job (returns true if a job was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let now = self.time_provider.now_millis();

        // Claim is atomic: the job is already `processing` in the store
        let job = match self.store.claim_next(now).await? {
            Some(j) => j,
            None => return Ok(false),
        };

        info!(
            job_id = %job.id,
            attempt = job.attempts + 1,
            command = %job.command,
            "Processing job"
        );

        let outcome = self.execute(&job).await;

        if outcome.is_success() {
            let attempts = job.attempts + 1;
            self.write_with_retry(&job.id, || {
                self.store
                    .apply_outcome(&job.id, JobState::Completed, Some(attempts))
            })
            .await?;
            info!(job_id = %job.id, attempts = attempts, "Job completed");
        } else {
            self.resolve_failure(&job, &outcome.diagnostic()).await?;
        }

        Ok(true)
    }

    /// Route `processing` jobs orphaned by a crashed worker through the failure path
    ///
    /// A claim counts as orphaned once it has gone untouched for twice the job
    /// timeout, longer than any live execution can take. One job failing to
    /// resolve does not stop the others; the count is of recovered jobs.
    pub async fn recover_stale_claims(&self) -> Result<usize> {
        let stale_ms = self.config.stale_claim_after().as_millis() as i64;
        let cutoff = self.time_provider.now_millis().saturating_sub(stale_ms);

        let stale = self.store.find_stale_processing(cutoff).await?;
        let mut recovered = 0;
        for job in &stale {
            warn!(job_id = %job.id, updated_at = job.updated_at, "Recovering stale claim");
            match self.resolve_failure(job, ABANDONED_CLAIM_REASON).await {
                Ok(_) => recovered += 1,
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to recover stale claim"),
            }
        }
        Ok(recovered)
    }

    async fn recover_logged(&self, failure_message: &str) {
        match self.recover_stale_claims().await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered_jobs = recovered, "Recovered stale claims"),
            Err(e) => error!(error = %e, "{}", failure_message),
        }
    }

    /// Persist a job outcome, retrying transient store errors
    ///
    /// The command has already run at this point, so a lost write would leave
    /// the job in `processing` until stale-claim recovery picks it up.
    async fn write_with_retry<F, Fut>(&self, job_id: &str, mut write: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 1;
        loop {
            match write().await {
                Ok(()) => return Ok(()),
                Err(e @ AppError::Database(_)) if attempt < STORE_WRITE_ATTEMPTS => {
                    warn!(
                        job_id = %job_id,
                        attempt = attempt,
                        error = %e,
                        "Outcome write failed, retrying"
                    );
                    attempt += 1;
                    sleep(STORE_WRITE_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the command in its own task so an executor panic cannot take the loop down
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        let executor = Arc::clone(&self.executor);
        let command = job.command.clone();

        let handle = tokio::task::spawn(async move { executor.run(&command).await });

        match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    "executor panicked"
                } else {
                    "executor task cancelled"
                };
                error!(job_id = %job.id, error = ?join_err, "{}", message);
                ExecutionOutcome::LaunchError {
                    message: message.to_string(),
                }
            }
        }
    }

    /// Count the failed attempt and either reschedule or dead-letter the job
    ///
    /// The job passes through `failed` only in this function; what gets
    /// persisted is `pending` or `dead`.
    async fn resolve_failure(&self, job: &Job, reason: &str) -> Result<JobState> {
        let attempts = job.attempts + 1;
        let now = self.time_provider.now_millis();

        warn!(
            job_id = %job.id,
            attempt = attempts,
            state = %JobState::Failed,
            reason = %reason,
            "Job attempt failed"
        );

        match self.retry_policy.decide(attempts, job.max_retries, now) {
            RetryDecision::Retry {
                delay_secs,
                scheduled_at,
            } => {
                self.write_with_retry(&job.id, || {
                    self.store.schedule_retry(&job.id, attempts, scheduled_at)
                })
                .await?;
                info!(
                    job_id = %job.id,
                    attempt = attempts,
                    delay_secs = delay_secs,
                    run_at = scheduled_at,
                    "Job scheduled for retry"
                );
                Ok(JobState::Pending)
            }
            RetryDecision::DeadLetter => {
                self.write_with_retry(&job.id, || {
                    self.store
                        .apply_outcome(&job.id, JobState::Dead, Some(attempts))
                })
                .await?;
                error!(
                    job_id = %job.id,
                    attempts = attempts,
                    reason = %reason,
                    "Job moved to dead-letter queue"
                );
                Ok(JobState::Dead)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;
    use crate::port::command_executor::mocks::MockCommandExecutor;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::job_store::StateCounts;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const START: i64 = 1_000_000;

    /// Wraps the in-memory store; fails the next N claims / outcome writes
    struct FlakyStore {
        inner: InMemoryJobStore,
        failing_claims: AtomicUsize,
        failing_writes: AtomicUsize,
    }

    impl FlakyStore {
        fn new(
            clock: Arc<ManualTimeProvider>,
            failing_claims: usize,
            failing_writes: usize,
        ) -> Self {
            Self {
                inner: InMemoryJobStore::new(clock),
                failing_claims: AtomicUsize::new(failing_claims),
                failing_writes: AtomicUsize::new(failing_writes),
            }
        }

        fn take_failure(counter: &AtomicUsize) -> Result<()> {
            let tripped = counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if tripped {
                return Err(AppError::Database("database is locked".to_string()));
            }
            Ok(())
        }

        fn writes_pending_failure(&self) -> usize {
            self.failing_writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobStore for FlakyStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            self.inner.insert(job).await
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            self.inner.find_by_id(id).await
        }

        async fn claim_next(&self, now_millis: i64) -> Result<Option<Job>> {
            Self::take_failure(&self.failing_claims)?;
            self.inner.claim_next(now_millis).await
        }

        async fn apply_outcome(
            &self,
            id: &JobId,
            state: JobState,
            attempts: Option<u32>,
        ) -> Result<()> {
            Self::take_failure(&self.failing_writes)?;
            self.inner.apply_outcome(id, state, attempts).await
        }

        async fn schedule_retry(&self, id: &JobId, attempts: u32, run_at: i64) -> Result<()> {
            Self::take_failure(&self.failing_writes)?;
            self.inner.schedule_retry(id, attempts, run_at).await
        }

        async fn requeue_from_dead(&self, id: &JobId) -> Result<bool> {
            self.inner.requeue_from_dead(id).await
        }

        async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>> {
            self.inner.list_by_state(state).await
        }

        async fn counts_by_state(&self) -> Result<StateCounts> {
            self.inner.counts_by_state().await
        }

        async fn find_stale_processing(&self, updated_before: i64) -> Result<Vec<Job>> {
            self.inner.find_stale_processing(updated_before).await
        }
    }

    fn flaky_dispatcher(
        store: Arc<FlakyStore>,
        clock: Arc<ManualTimeProvider>,
        executor: Arc<MockCommandExecutor>,
    ) -> Dispatcher {
        Dispatcher::new(
            store,
            executor,
            clock,
            EngineConfig {
                backoff_base: 3,
                idle_interval: Duration::from_millis(10),
                ..Default::default()
            },
        )
    }

    struct Harness {
        clock: Arc<ManualTimeProvider>,
        store: Arc<InMemoryJobStore>,
        executor: Arc<MockCommandExecutor>,
        dispatcher: Dispatcher,
    }

    fn harness(executor: MockCommandExecutor) -> Harness {
        let clock = Arc::new(ManualTimeProvider::new(START));
        let store = Arc::new(InMemoryJobStore::new(clock.clone()));
        let executor = Arc::new(executor);
        let dispatcher = Dispatcher::new(
            store.clone(),
            executor.clone(),
            clock.clone(),
            EngineConfig {
                backoff_base: 3,
                idle_interval: Duration::from_millis(10),
                ..Default::default()
            },
        );
        Harness {
            clock,
            store,
            executor,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_success_marks_completed() {
        let h = harness(MockCommandExecutor::new_success());
        h.store
            .insert(&Job::new("ok", "echo ok", 3, START))
            .await
            .unwrap();

        assert!(h.dispatcher.process_next_job().await.unwrap());

        let job = h.store.find_by_id(&"ok".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(h.executor.commands(), vec!["echo ok".to_string()]);
    }

    #[tokio::test]
    async fn test_no_due_job_returns_false() {
        let h = harness(MockCommandExecutor::new_success());
        assert!(!h.dispatcher.process_next_job().await.unwrap());
        assert_eq!(h.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_schedules_backoff() {
        let h = harness(MockCommandExecutor::new_fail(1));
        h.store
            .insert(&Job::new("f", "false", 3, START))
            .await
            .unwrap();

        h.dispatcher.process_next_job().await.unwrap();
        let job = h.store.find_by_id(&"f".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.run_at, START + 3_000);

        // Not due yet
        assert!(!h.dispatcher.process_next_job().await.unwrap());

        h.clock.advance_secs(3);
        h.dispatcher.process_next_job().await.unwrap();
        let job = h.store.find_by_id(&"f".to_string()).await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.run_at, START + 3_000 + 9_000);
    }

    #[tokio::test]
    async fn test_max_retries_two_dead_after_three_attempts() {
        let h = harness(MockCommandExecutor::new_fail(7));
        h.store
            .insert(&Job::new("d", "exit 7", 2, START))
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(h.dispatcher.process_next_job().await.unwrap());
            h.clock.advance_secs(3600);
        }

        let job = h.store.find_by_id(&"d".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 3);

        // Never a fourth execution
        assert!(!h.dispatcher.process_next_job().await.unwrap());
        assert_eq!(h.executor.call_count(), 3);
    }

    #[tokio::test]
    async fn test_executor_panic_counts_as_failure() {
        let h = harness(MockCommandExecutor::new_panic_inducing("boom"));
        h.store
            .insert(&Job::new("p", "explode", 0, START))
            .await
            .unwrap();

        assert!(h.dispatcher.process_next_job().await.unwrap());

        let job = h.store.find_by_id(&"p".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let h = harness(MockCommandExecutor::new_timeout());
        h.store
            .insert(&Job::new("t", "sleep 999", 1, START))
            .await
            .unwrap();

        assert!(h.dispatcher.process_next_job().await.unwrap());
        let job = h.store.find_by_id(&"t".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.run_at, START + 3_000);

        h.clock.advance_secs(3);
        assert!(h.dispatcher.process_next_job().await.unwrap());
        let job = h.store.find_by_id(&"t".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_launch_error_then_success() {
        let h = harness(MockCommandExecutor::new_script(vec![
            ExecutionOutcome::LaunchError {
                message: "no shell".to_string(),
            },
            ExecutionOutcome::Success,
        ]));
        h.store
            .insert(&Job::new("l", "echo l", 3, START))
            .await
            .unwrap();

        h.dispatcher.process_next_job().await.unwrap();
        h.clock.advance_secs(3);
        h.dispatcher.process_next_job().await.unwrap();

        let job = h.store.find_by_id(&"l".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_outcome_write_retried_after_store_error() {
        let clock = Arc::new(ManualTimeProvider::new(START));
        let store = Arc::new(FlakyStore::new(clock.clone(), 0, 1));
        let executor = Arc::new(MockCommandExecutor::new_success());
        let dispatcher = flaky_dispatcher(store.clone(), clock, executor.clone());
        store
            .insert(&Job::new("w", "echo w", 3, START))
            .await
            .unwrap();

        assert!(dispatcher.process_next_job().await.unwrap());

        let job = store.find_by_id(&"w".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_persistent_write_failure_surfaces_error() {
        let clock = Arc::new(ManualTimeProvider::new(START));
        let store = Arc::new(FlakyStore::new(
            clock.clone(),
            0,
            STORE_WRITE_ATTEMPTS as usize,
        ));
        let dispatcher = flaky_dispatcher(
            store.clone(),
            clock,
            Arc::new(MockCommandExecutor::new_success()),
        );
        store
            .insert(&Job::new("x", "echo x", 3, START))
            .await
            .unwrap();

        assert!(dispatcher.process_next_job().await.is_err());
        let job = store.find_by_id(&"x".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Processing);
    }

    #[tokio::test]
    async fn test_run_survives_failed_claim() {
        let clock = Arc::new(ManualTimeProvider::new(START));
        let store = Arc::new(FlakyStore::new(clock.clone(), 1, 0));
        let dispatcher = flaky_dispatcher(
            store.clone(),
            clock,
            Arc::new(MockCommandExecutor::new_success()),
        );
        store
            .insert(&Job::new("c", "echo c", 3, START))
            .await
            .unwrap();

        let (tx, token) = shutdown_channel();
        let handle = tokio::spawn(async move { dispatcher.run(token).await });

        let mut completed = false;
        for _ in 0..300 {
            let job = store.find_by_id(&"c".to_string()).await.unwrap().unwrap();
            if job.state == JobState::Completed {
                completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tx.shutdown();

        handle.await.unwrap().unwrap();
        assert!(completed, "job not processed after the failed claim");
    }

    #[tokio::test]
    async fn test_run_resolves_job_stranded_by_lost_write() {
        let clock = Arc::new(ManualTimeProvider::new(START));
        let store = Arc::new(FlakyStore::new(
            clock.clone(),
            0,
            STORE_WRITE_ATTEMPTS as usize,
        ));
        let executor = Arc::new(MockCommandExecutor::new_success());
        let dispatcher = flaky_dispatcher(store.clone(), clock.clone(), executor.clone());
        store
            .insert(&Job::new("s", "echo s", 3, START))
            .await
            .unwrap();

        let (tx, token) = shutdown_channel();
        let handle = tokio::spawn(async move { dispatcher.run(token).await });

        // Once the writes stop failing, push the clock past the stale window
        // (and later past the retry delay) until the loop resolves the job
        let mut job = store.find_by_id(&"s".to_string()).await.unwrap().unwrap();
        for _ in 0..500 {
            if job.state == JobState::Completed {
                break;
            }
            if store.writes_pending_failure() == 0 {
                clock.advance_secs(601);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            job = store.find_by_id(&"s".to_string()).await.unwrap().unwrap();
        }
        tx.shutdown();
        handle.await.unwrap().unwrap();

        assert_eq!(job.state, JobState::Completed);
        // The lost success is recorded as a failed attempt, then the retry succeeds
        assert_eq!(job.attempts, 2);
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_recovery_continues_past_a_failing_job() {
        let clock = Arc::new(ManualTimeProvider::new(START));
        let store = Arc::new(FlakyStore::new(
            clock.clone(),
            0,
            STORE_WRITE_ATTEMPTS as usize,
        ));
        let dispatcher = flaky_dispatcher(
            store.clone(),
            clock.clone(),
            Arc::new(MockCommandExecutor::new_success()),
        );
        for id in ["first", "second"] {
            store.insert(&Job::new(id, "sleep 1", 3, START)).await.unwrap();
            store.claim_next(START).await.unwrap().unwrap();
        }

        clock.advance_secs(601);
        assert_eq!(dispatcher.recover_stale_claims().await.unwrap(), 1);

        let counts = store.counts_by_state().await.unwrap();
        assert_eq!(counts[&JobState::Processing], 1);
        assert_eq!(counts[&JobState::Pending], 1);
    }

    #[tokio::test]
    async fn test_recover_stale_claims() {
        let h = harness(MockCommandExecutor::new_success());
        h.store
            .insert(&Job::new("stale", "sleep 1000", 3, START))
            .await
            .unwrap();
        h.store.claim_next(START).await.unwrap().unwrap();

        // Within the window nothing is touched
        h.clock.advance_secs(60);
        assert_eq!(h.dispatcher.recover_stale_claims().await.unwrap(), 0);

        // Default timeout is 300s, so claims older than 600s are orphaned
        h.clock.advance_secs(600);
        assert_eq!(h.dispatcher.recover_stale_claims().await.unwrap(), 1);

        let job = h.store.find_by_id(&"stale".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(MockCommandExecutor::new_success());
        h.store
            .insert(&Job::new("r", "echo r", 3, START))
            .await
            .unwrap();

        let (tx, token) = shutdown_channel();
        let dispatcher = h.dispatcher;
        let store = h.store.clone();
        let handle = tokio::spawn(async move { dispatcher.run(token).await });

        for _ in 0..100 {
            let job = store.find_by_id(&"r".to_string()).await.unwrap().unwrap();
            if job.state == JobState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.shutdown();

        handle.await.unwrap().unwrap();
        let job = h.store.find_by_id(&"r".to_string()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
    }
}
