//! Claim exclusivity across concurrent workers sharing one database file

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::*;
use futures::future::join_all;
use queuectl_core::domain::JobState;
use queuectl_core::port::command_executor::mocks::MockCommandExecutor;
use queuectl_core::port::{JobStore, TimeProvider};

#[tokio::test]
async fn test_single_job_claimed_exactly_once() {
    let db = setup_db().await;
    insert(&db, "only", "true", 3).await;
    let now = db.clock.now_millis();

    let claims = join_all((0..8).map(|_| {
        let store = db.store.clone();
        async move { store.claim_next(now).await.unwrap() }
    }))
    .await;

    let winners: Vec<_> = claims.into_iter().flatten().collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, "only");
    assert_eq!(winners[0].state, JobState::Processing);
}

#[tokio::test]
async fn test_parallel_claims_never_duplicate() {
    let db = setup_db().await;
    for i in 0..20 {
        insert(&db, &format!("job-{:02}", i), "true", 3).await;
    }
    let now = db.clock.now_millis();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = db.store.clone();
            tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(job) = store.claim_next(now).await.unwrap() {
                    mine.push(job.id);
                }
                mine
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in join_all(handles).await {
        for id in handle.unwrap() {
            total += 1;
            assert!(seen.insert(id.clone()), "job {} claimed twice", id);
        }
    }
    assert_eq!(total, 20);

    let counts = db.store.counts_by_state().await.unwrap();
    assert_eq!(counts[&JobState::Processing], 20);
    assert_eq!(counts[&JobState::Pending], 0);
}

#[tokio::test]
async fn test_claim_order_is_fifo() {
    let db = setup_db().await;
    for id in ["first", "second", "third"] {
        insert(&db, id, "true", 3).await;
        db.clock.advance_millis(1);
    }
    let now = db.clock.now_millis();

    let mut order = Vec::new();
    while let Some(job) = db.store.claim_next(now).await.unwrap() {
        order.push(job.id);
    }
    assert_eq!(order, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_concurrent_dispatchers_run_each_job_once() {
    let db = setup_db().await;
    for i in 0..12 {
        insert(&db, &format!("job-{}", i), &format!("echo {}", i), 3).await;
    }

    let executor = Arc::new(MockCommandExecutor::new_success());
    let workers: Vec<_> = (0..3)
        .map(|_| dispatcher(&db, executor.clone(), engine_config(3, 2)))
        .collect();

    join_all(workers.iter().map(|worker| async move {
        while worker.process_next_job().await.unwrap() {}
    }))
    .await;

    assert_eq!(executor.call_count(), 12);
    let distinct: HashSet<_> = executor.commands().into_iter().collect();
    assert_eq!(distinct.len(), 12);

    let counts = db.store.counts_by_state().await.unwrap();
    assert_eq!(counts[&JobState::Completed], 12);
}
