// tests/distributed.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use trainflow::app::{App, LOCAL_WORKER_ID};
use trainflow::dag::{JobStatus, JobType};
use trainflow::engine::{DistributedOrchestrator, ExecuteOptions, ExecutionStatus, OrchestratorSettings};
use trainflow::exec::{AssignmentResult, InProcessTransport, MailboxTransport, RetryPolicy, WorkerTransport};
use trainflow::queue::JobQueue;
use trainflow::store::MemoryStateStore;
use trainflow::types::{FailurePolicy, TransportMode};
use trainflow::workers::{MemoryWorkerRegistry, RegisterWorker, WorkerManager, WorkerStatus};
use trainflow_test_utils::builders::{job, job_of, scripted_registry, ConfigFileBuilder};
use trainflow_test_utils::clock::ManualClock;
use trainflow_test_utils::handlers::ScriptedHandler;
use trainflow_test_utils::{eventually, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

struct Fleet {
    orchestrator: DistributedOrchestrator,
    queue: Arc<JobQueue>,
    workers: Arc<WorkerManager>,
    clock: Arc<ManualClock>,
}

fn fleet_with(transport: Arc<dyn WorkerTransport>, retry: RetryPolicy) -> Fleet {
    let store = Arc::new(MemoryStateStore::new());
    let queue = Arc::new(JobQueue::open(store.clone()).unwrap());
    // The clock only moves when a test advances it; staleness is 60s.
    let clock = Arc::new(ManualClock::fixed());
    let workers = Arc::new(WorkerManager::with_heartbeat(
        Arc::new(MemoryWorkerRegistry::new()),
        clock.clone(),
        Duration::from_secs(30),
        2,
    ));
    let orchestrator = DistributedOrchestrator::new(
        store,
        queue.clone(),
        workers.clone(),
        transport,
        OrchestratorSettings {
            default_parallelism: 4,
            failure_policy: FailurePolicy::Halt,
        },
        retry,
    );
    Fleet {
        orchestrator,
        queue,
        workers,
        clock,
    }
}

fn in_process_fleet(handler: &ScriptedHandler) -> Fleet {
    fleet_with(
        Arc::new(InProcessTransport::new(scripted_registry(handler))),
        RetryPolicy {
            attempts: 2,
            initial_backoff: Duration::from_millis(10),
        },
    )
}

#[tokio::test]
async fn level_jobs_spread_across_workers() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    handler.gate("B");
    handler.gate("C");
    let fleet = in_process_fleet(&handler);
    fleet.orchestrator.register_worker(RegisterWorker::new("w1", "node-1", 1))?;
    fleet.orchestrator.register_worker(RegisterWorker::new("w2", "node-2", 1))?;

    let jobs = vec![job("A", &[]), job("B", &["A"]), job("C", &["A"])];
    let execution = fleet.orchestrator.execute("fan-out", jobs, ExecuteOptions::default())?;
    assert!(fleet.orchestrator.is_initialized());

    with_timeout(async {
        handler.wait_entered("B").await;
        handler.wait_entered("C").await;
    })
    .await;
    let stats = fleet.workers.get_worker_stats()?;
    assert_eq!(stats.busy, 2);
    assert_eq!(fleet.queue.in_flight_len(), 2);

    handler.release("B");
    handler.release("C");
    let done = with_timeout(fleet.orchestrator.orchestrator().wait(execution.id)).await?;

    assert_eq!(done.status, ExecutionStatus::Completed);
    let b = done.jobs["B"].worker_id.clone().unwrap();
    let c = done.jobs["C"].worker_id.clone().unwrap();
    assert_ne!(b, c);
    assert_eq!(handler.max_concurrent(), 2);

    // Slots are given back and the queue is drained.
    assert_eq!(fleet.workers.get_worker_stats()?.idle, 2);
    assert!(fleet.queue.is_empty());
    assert_eq!(fleet.queue.in_flight_len(), 0);
    Ok(())
}

#[tokio::test]
async fn jobs_are_routed_by_capability() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    let fleet = in_process_fleet(&handler);
    fleet.orchestrator.register_worker(RegisterWorker::new("cpu-1", "h", 4))?;
    fleet
        .orchestrator
        .register_worker(RegisterWorker::new("gpu-1", "h", 4).with_capability("cuda"))?;

    let mut train = job("train", &[]);
    train.capability = Some("cuda".into());
    let execution = fleet.orchestrator.execute("wf", vec![train], ExecuteOptions::default())?;
    let done = with_timeout(fleet.orchestrator.orchestrator().wait(execution.id)).await?;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.jobs["train"].worker_id.as_deref(), Some("gpu-1"));
    Ok(())
}

#[tokio::test]
async fn empty_fleet_fails_job_after_retries() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    let fleet = in_process_fleet(&handler);

    let execution = fleet.orchestrator.execute("wf", vec![job("A", &[]), job("B", &["A"])], ExecuteOptions::default())?;
    let done = with_timeout(fleet.orchestrator.orchestrator().wait(execution.id)).await?;

    assert_eq!(done.status, ExecutionStatus::Failed);
    let a = &done.jobs["A"];
    assert_eq!(a.status, JobStatus::Failed);
    assert!(a.error.as_deref().unwrap_or_default().contains("no eligible worker"));
    assert_eq!(a.attempts, 0);
    assert_eq!(done.jobs["B"].status, JobStatus::Skipped);
    assert!(handler.runs().is_empty());
    assert!(fleet.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn paused_queue_holds_delivery() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    let fleet = in_process_fleet(&handler);
    fleet.orchestrator.register_worker(RegisterWorker::new("w1", "h", 2))?;

    fleet.queue.pause()?;
    let execution = fleet.orchestrator.execute("wf", vec![job("A", &[])], ExecuteOptions::default())?;

    eventually("A enqueued", || fleet.queue.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(handler.runs().is_empty());
    let held = fleet.orchestrator.orchestrator().get_execution(execution.id)?;
    assert_eq!(held.jobs["A"].status, JobStatus::Ready);

    fleet.queue.resume()?;
    let done = with_timeout(fleet.orchestrator.orchestrator().wait(execution.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(handler.runs(), vec!["A"]);
    Ok(())
}

#[tokio::test]
async fn initialize_purges_orphaned_queue_entries() -> TestResult {
    let handler = ScriptedHandler::new();
    let fleet = in_process_fleet(&handler);
    fleet
        .queue
        .enqueue(uuid::Uuid::new_v4(), "old", job("stale", &[]), 1)?;
    assert_eq!(fleet.queue.len(), 1);

    fleet.orchestrator.initialize()?;
    fleet.orchestrator.initialize()?;
    assert!(fleet.queue.is_empty());
    assert!(fleet.orchestrator.health().healthy);
    Ok(())
}

fn mailbox_fleet() -> (Fleet, Arc<MailboxTransport>) {
    let mailbox = Arc::new(MailboxTransport::new());
    let fleet = fleet_with(mailbox.clone(), RetryPolicy::default());
    (fleet, mailbox)
}

#[tokio::test]
async fn mailbox_workers_pull_and_report() -> TestResult {
    init_tracing();
    let (fleet, mailbox) = mailbox_fleet();
    fleet.orchestrator.register_worker(RegisterWorker::new("remote-1", "gpu-box", 1))?;

    let jobs = vec![
        job_of("prep", JobType::DataPreparation, &[]),
        job("train", &["prep"]),
    ];
    let execution = fleet.orchestrator.execute("remote", jobs, ExecuteOptions::default())?;

    let mut claimed = None;
    eventually("prep assigned", || {
        claimed = mailbox.claim_next("remote-1");
        claimed.is_some()
    })
    .await;
    let prep = claimed.take().unwrap();
    assert_eq!(prep.job.id, "prep");
    assert_eq!(prep.attempt, 1);
    mailbox.complete(
        "remote-1",
        &prep.assignment_id,
        AssignmentResult {
            success: true,
            result: Some(json!({ "rows": 1000 })),
            error: None,
        },
    )?;

    eventually("train assigned", || {
        claimed = mailbox.claim_next("remote-1");
        claimed.is_some()
    })
    .await;
    let train = claimed.take().unwrap();
    assert_eq!(train.job.id, "train");
    mailbox.complete(
        "remote-1",
        &train.assignment_id,
        AssignmentResult {
            success: false,
            result: None,
            error: Some("OOM".into()),
        },
    )?;

    let done = with_timeout(fleet.orchestrator.orchestrator().wait(execution.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(done.jobs["prep"].result, Some(json!({ "rows": 1000 })));
    assert_eq!(done.jobs["prep"].worker_id.as_deref(), Some("remote-1"));
    assert_eq!(done.jobs["train"].error.as_deref(), Some("OOM"));
    assert_eq!(mailbox.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn deregistering_worker_fails_its_assignments() -> TestResult {
    init_tracing();
    let (fleet, mailbox) = mailbox_fleet();
    fleet.orchestrator.register_worker(RegisterWorker::new("remote-1", "h", 1))?;

    let execution = fleet.orchestrator.execute("wf", vec![job("A", &[])], ExecuteOptions::default())?;
    eventually("assignment outstanding", || mailbox.outstanding() == 1).await;

    assert!(fleet.orchestrator.deregister_worker("remote-1")?);
    let done = with_timeout(fleet.orchestrator.orchestrator().wait(execution.id)).await?;

    assert_eq!(done.status, ExecutionStatus::Failed);
    assert!(done.jobs["A"].error.as_deref().unwrap_or_default().contains("deregistered"));
    assert!(fleet.workers.get_worker("remote-1")?.is_none());
    // Idempotent.
    assert!(!fleet.orchestrator.deregister_worker("remote-1")?);
    Ok(())
}

#[tokio::test]
async fn silent_worker_assignments_fail_once_stale() -> TestResult {
    init_tracing();
    let (fleet, mailbox) = mailbox_fleet();
    fleet.orchestrator.register_worker(RegisterWorker::new("remote-1", "h", 1))?;

    let jobs = vec![job("A", &[]), job("B", &["A"])];
    let execution = fleet.orchestrator.execute("wf", jobs, ExecuteOptions::default())?;
    eventually("assignment outstanding", || mailbox.outstanding() == 1).await;

    // The worker never claims it and never heartbeats again.
    fleet.clock.advance(Duration::from_secs(61));
    let done = with_timeout(fleet.orchestrator.orchestrator().wait(execution.id)).await?;

    assert_eq!(done.status, ExecutionStatus::Failed);
    assert!(done.jobs["A"].error.as_deref().unwrap_or_default().contains("stopped heartbeating"));
    assert_eq!(done.jobs["B"].status, JobStatus::Skipped);
    assert_eq!(mailbox.outstanding(), 0);
    assert!(mailbox.claim_next("remote-1").is_none());
    // Stale workers stay registered until they are removed.
    assert_eq!(fleet.workers.get_worker("remote-1")?.map(|w| w.status), Some(WorkerStatus::Offline));
    Ok(())
}

#[tokio::test]
async fn hosted_local_worker_outlives_staleness_threshold() -> TestResult {
    init_tracing();
    let clock = Arc::new(ManualClock::fixed());
    let cfg = ConfigFileBuilder::new()
        .distributed(TransportMode::InProcess)
        .build();
    let app = App::with_clock(&cfg, clock.clone())?;

    let keep_alive = app
        .host_local_worker(2, Duration::from_millis(20))?
        .expect("fleet was empty");
    assert!(app.host_local_worker(2, Duration::from_millis(20))?.is_none());

    let first = vec![job_of("prep", JobType::Noop, &[])];
    let execution = app.execute("long-run", first, ExecuteOptions::default())?;
    assert_eq!(with_timeout(app.wait(execution.id)).await?.status, ExecutionStatus::Completed);

    // Two default staleness windows pass between levels of a long run.
    clock.advance(Duration::from_secs(120));
    eventually("keep-alive refreshed the heartbeat", || {
        app.workers
            .get_worker(LOCAL_WORKER_ID)
            .ok()
            .flatten()
            .is_some_and(|w| w.status != WorkerStatus::Offline)
    })
    .await;

    let jobs = vec![job_of("A", JobType::Noop, &[]), job_of("B", JobType::Noop, &["A"])];
    let execution = app.execute("long-run", jobs, ExecuteOptions::default())?;
    let done = with_timeout(app.wait(execution.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.jobs["B"].worker_id.as_deref(), Some(LOCAL_WORKER_ID));

    keep_alive.abort();
    Ok(())
}
