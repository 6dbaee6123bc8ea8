//! Shared fixtures: an on-disk database in a temp dir, so several pool
//! connections (and several workers) see the same data.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use queuectl_core::domain::Job;
use queuectl_core::port::command_executor::mocks::MockCommandExecutor;
use queuectl_core::port::time_provider::mocks::ManualTimeProvider;
use queuectl_core::port::{CommandExecutor, JobStore, TimeProvider};
use queuectl_core::{application::Dispatcher, EngineConfig};
use queuectl_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use tempfile::TempDir;

pub const START_MILLIS: i64 = 1_700_000_000_000;

pub struct TestDb {
    // Held so the directory outlives the pool
    pub dir: TempDir,
    pub store: Arc<SqliteJobStore>,
    pub clock: Arc<ManualTimeProvider>,
}

pub async fn setup_db() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let pool = create_pool(path.to_str().unwrap()).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let clock = Arc::new(ManualTimeProvider::new(START_MILLIS));
    let store = Arc::new(SqliteJobStore::new(pool, clock.clone()));
    TestDb { dir, store, clock }
}

pub fn engine_config(max_retries: u32, backoff_base: u32) -> EngineConfig {
    EngineConfig {
        max_retries,
        backoff_base,
        job_timeout: Duration::from_secs(5),
        idle_interval: Duration::from_millis(20),
    }
}

pub fn dispatcher(
    db: &TestDb,
    executor: Arc<dyn CommandExecutor>,
    config: EngineConfig,
) -> Dispatcher {
    let clock: Arc<dyn TimeProvider> = db.clock.clone();
    Dispatcher::new(db.store.clone(), executor, clock, config)
}

pub fn failing_executor() -> Arc<MockCommandExecutor> {
    Arc::new(MockCommandExecutor::new_fail(1))
}

pub async fn insert(db: &TestDb, id: &str, command: &str, max_retries: u32) -> Job {
    let job = Job::new(id, command, max_retries, db.clock.now_millis());
    db.store.insert(&job).await.unwrap();
    job
}
