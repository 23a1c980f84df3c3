// Integration tests for the claim / execute / dead-letter lifecycle

use chrono::Duration as ChronoDuration;
use futures::future::join_all;
use jobq_core::{timestamp_now, Job, JobState};
use jobq_persistence::{JobStore, PersistenceError, StoreConfig};
use jobq_worker::{claim_next, ExecutionOutcome, Iteration, ShellRunner, Worker, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn store_config(temp_dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: temp_dir.path().join("queue.db"),
        busy_retries: 200,
        busy_retry_delay: Duration::from_millis(5),
    }
}

fn worker_config(temp_dir: &TempDir) -> WorkerConfig {
    WorkerConfig {
        worker_id: Some("it".to_string()),
        count: 1,
        poll_interval: Duration::from_millis(20),
        backoff_base: 2,
        store: store_config(temp_dir),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_exit_one_retries_then_dies() {
    let temp_dir = TempDir::new().unwrap();
    let mut worker = Worker::open(worker_config(&temp_dir), 1, Arc::new(ShellRunner)).unwrap();

    let job = Job::builder("exit 1").id("e2e").max_retries(2).build().unwrap();
    worker.store().insert(&job).await.unwrap();

    let first = worker.run_once().await.unwrap();
    assert!(matches!(
        first,
        Iteration::Executed {
            outcome: ExecutionOutcome::Retrying { attempts: 1, .. },
            ..
        }
    ));
    let stored = worker.store().get("e2e").unwrap().unwrap();
    assert_eq!((stored.state, stored.attempts), (JobState::Pending, 1));

    worker.run_once().await.unwrap();
    let stored = worker.store().get("e2e").unwrap().unwrap();
    assert_eq!((stored.state, stored.attempts), (JobState::Dead, 2));

    let dead = worker.store().list_dead().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(worker.run_once().await.unwrap(), Iteration::Idle);
}

#[cfg(unix)]
#[tokio::test]
async fn test_requeued_job_runs_again() {
    let temp_dir = TempDir::new().unwrap();
    let mut worker = Worker::open(worker_config(&temp_dir), 1, Arc::new(ShellRunner)).unwrap();

    let job = Job::builder("exit 1").id("again").max_retries(1).build().unwrap();
    worker.store().insert(&job).await.unwrap();
    worker.run_once().await.unwrap();
    assert_eq!(
        worker.store().get("again").unwrap().unwrap().state,
        JobState::Dead
    );

    let requeued = worker.store().requeue_dead("again").await.unwrap();
    assert_eq!((requeued.state, requeued.attempts), (JobState::Pending, 0));

    // Requeue is only valid from dead.
    assert!(matches!(
        worker.store().requeue_dead("again").await,
        Err(PersistenceError::NotDead { .. })
    ));

    worker.run_once().await.unwrap();
    let stored = worker.store().get("again").unwrap().unwrap();
    assert_eq!((stored.state, stored.attempts), (JobState::Dead, 1));
}

#[tokio::test]
async fn test_claim_order_priority_then_age() {
    let temp_dir = TempDir::new().unwrap();
    let store = JobStore::open(store_config(&temp_dir)).unwrap();

    let t0 = timestamp_now();
    let jobs = [
        Job::builder("a").id("A").priority(5).created_at(t0).build().unwrap(),
        Job::builder("b")
            .id("B")
            .priority(5)
            .created_at(t0 + ChronoDuration::milliseconds(10))
            .build()
            .unwrap(),
        Job::builder("c")
            .id("C")
            .priority(9)
            .created_at(t0 + ChronoDuration::milliseconds(20))
            .build()
            .unwrap(),
    ];
    for job in &jobs {
        store.insert(job).await.unwrap();
    }

    let mut order = Vec::new();
    while let Some(job) = claim_next(&store).await.unwrap() {
        order.push(job.id);
    }
    assert_eq!(order, vec!["C", "A", "B"]);
}

#[tokio::test]
async fn test_equal_timestamps_fall_back_to_insertion_order() {
    let temp_dir = TempDir::new().unwrap();
    let store = JobStore::open(store_config(&temp_dir)).unwrap();

    let t0 = timestamp_now();
    for id in ["first", "second", "third"] {
        let job = Job::builder("true").id(id).created_at(t0).build().unwrap();
        store.insert(&job).await.unwrap();
    }

    let mut order = Vec::new();
    while let Some(job) = claim_next(&store).await.unwrap() {
        order.push(job.id);
    }
    assert_eq!(order, vec!["first", "second", "third"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_single_job() {
    for round in 0..20 {
        let temp_dir = TempDir::new().unwrap();
        let stores: Vec<Arc<JobStore>> = (0..4)
            .map(|_| Arc::new(JobStore::open(store_config(&temp_dir)).unwrap()))
            .collect();

        let job = Job::builder("true").id(format!("only-{}", round)).build().unwrap();
        stores[0].insert(&job).await.unwrap();

        let claims = join_all(stores.iter().cloned().map(|store| {
            tokio::spawn(async move { claim_next(&store).await })
        }))
        .await;

        let winners = claims
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1, "round {} double-claimed or lost the job", round);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_drain_each_job_once() {
    let temp_dir = TempDir::new().unwrap();
    let seed = JobStore::open(store_config(&temp_dir)).unwrap();
    for i in 0..40 {
        let job = Job::builder("true").id(format!("job-{:02}", i)).build().unwrap();
        seed.insert(&job).await.unwrap();
    }

    let claimants = (0..4).map(|_| {
        let store = JobStore::open(store_config(&temp_dir)).unwrap();
        tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = claim_next(&store).await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        })
    });

    let mut all: Vec<String> = join_all(claimants)
        .await
        .into_iter()
        .flat_map(|joined| joined.unwrap())
        .collect();
    all.sort();

    let expected: Vec<String> = (0..40).map(|i| format!("job-{:02}", i)).collect();
    assert_eq!(all, expected);
    assert!(seed.list_by_state(Some(JobState::Pending)).unwrap().is_empty());
}
