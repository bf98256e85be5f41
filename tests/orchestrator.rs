// tests/orchestrator.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use trainflow::dag::{JobStatus, JobType, ValidationIssue};
use trainflow::engine::{DagOrchestrator, ExecuteOptions, Execution, ExecutionStatus, HandlerRegistry};
use trainflow::errors::OrchestratorError;
use trainflow::exec::LocalDispatcher;
use trainflow::store::{MemoryStateStore, StateStore};
use trainflow::types::FailurePolicy;
use trainflow_test_utils::builders::{job, job_of, local_orchestrator};
use trainflow_test_utils::handlers::ScriptedHandler;
use trainflow_test_utils::{eventually, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn status_of(execution: &Execution, job_id: &str) -> JobStatus {
    execution.jobs[job_id].status
}

async fn wait_until_running(orchestrator: &DagOrchestrator, execution: &Execution, job_id: &str) {
    eventually(&format!("{job_id} running"), || {
        orchestrator
            .get_execution(execution.id)
            .map(|e| status_of(&e, job_id) == JobStatus::Running)
            .unwrap_or(false)
    })
    .await;
}

/// A fans out to B and C; B and C must be in their handlers together.
#[tokio::test]
async fn second_level_runs_concurrently() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    handler.gate("B");
    handler.gate("C");
    let (orchestrator, _store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let jobs = vec![job("A", &[]), job("B", &["A"]), job("C", &["A"])];
    // The bound is wider than the level; it must not serialize B and C.
    let execution = orchestrator.execute("fan-out", jobs, ExecuteOptions::parallelism(10))?;
    assert_eq!(execution.status, ExecutionStatus::Running);

    with_timeout(async {
        handler.wait_entered("B").await;
        handler.wait_entered("C").await;
    })
    .await;
    assert_eq!(handler.runs()[0], "A");

    handler.release("B");
    handler.release("C");
    let done = with_timeout(orchestrator.wait(execution.id)).await?;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(handler.max_concurrent(), 2);
    for id in ["A", "B", "C"] {
        assert_eq!(status_of(&done, id), JobStatus::Succeeded);
    }
    Ok(())
}

#[tokio::test]
async fn parallelism_bounds_jobs_in_flight() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    let ids = ["a", "b", "c", "d", "e"];
    for id in ids {
        handler.gate(id);
    }
    let (orchestrator, _store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let jobs = ids.iter().map(|id| job(id, &[])).collect();
    let execution = orchestrator.execute("wide", jobs, ExecuteOptions::parallelism(2))?;

    eventually("two jobs entered", || handler.runs().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.runs().len(), 2);

    for id in ids {
        handler.release(id);
    }
    let done = with_timeout(orchestrator.wait(execution.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(handler.runs().len(), 5);
    assert_eq!(handler.max_concurrent(), 2);
    Ok(())
}

/// A -> B -> C. Pause while B runs; live resume runs only C. Resuming from
/// the checkpoint taken at pause time reruns B and C.
#[tokio::test]
async fn pause_checkpoint_and_resume() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    handler.gate("B");
    let (orchestrator, store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let jobs = vec![job("A", &[]), job("B", &["A"]), job("C", &["B"])];
    let execution = orchestrator.execute("chain", jobs, ExecuteOptions::default())?;

    with_timeout(handler.wait_entered("B")).await;
    wait_until_running(&orchestrator, &execution, "B").await;

    let outcome = orchestrator.pause(execution.id, true)?;
    assert!(outcome.paused);
    let first = outcome.checkpoint.expect("checkpoint requested");
    assert_eq!(first.jobs["A"].status, JobStatus::Succeeded);
    assert_eq!(first.jobs["B"].status, JobStatus::Running);
    assert!(orchestrator.is_paused(execution.id)?);

    // B was already dispatched: it finishes, C does not start.
    handler.release("B");
    let parked = with_timeout(orchestrator.wait(execution.id)).await?;
    assert_eq!(parked.status, ExecutionStatus::Paused);
    assert_eq!(status_of(&parked, "B"), JobStatus::Succeeded);
    assert_eq!(status_of(&parked, "C"), JobStatus::Pending);
    assert_eq!(handler.runs(), vec!["A", "B"]);

    // The settled checkpoint supersedes the first one.
    let latest = store.latest_checkpoint(execution.id)?.expect("settled checkpoint");
    assert_ne!(latest.checkpoint_id, first.checkpoint_id);
    assert_eq!(latest.jobs["B"].status, JobStatus::Succeeded);

    let resumed = orchestrator.resume(execution.id)?;
    assert_eq!(resumed.status, ExecutionStatus::Running);
    let done = with_timeout(orchestrator.wait(execution.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(handler.runs(), vec!["A", "B", "C"]);

    // Replay from the pause-time checkpoint: B was in flight, so it reruns.
    let replay = orchestrator.resume_from_checkpoint(&first.checkpoint_id)?;
    assert_ne!(replay.id, execution.id);
    assert_eq!(replay.resumed_from.as_deref(), Some(first.checkpoint_id.as_str()));
    let replayed = with_timeout(orchestrator.wait(replay.id)).await?;

    assert_eq!(replayed.status, ExecutionStatus::Completed);
    assert_eq!(handler.run_count("A"), 1);
    assert_eq!(handler.attempts("B"), vec![1, 2]);
    assert_eq!(handler.run_count("C"), 2);

    let succeeded = |e: &Execution| -> Vec<String> {
        e.jobs
            .iter()
            .filter(|(_, s)| s.status == JobStatus::Succeeded)
            .map(|(id, _)| id.clone())
            .collect()
    };
    assert_eq!(succeeded(&done), succeeded(&replayed));
    Ok(())
}

#[tokio::test]
async fn resume_latest_uses_settled_checkpoint() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    handler.gate("B");
    let (orchestrator, _store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let jobs = vec![job("A", &[]), job("B", &["A"]), job("C", &["B"])];
    let execution = orchestrator.execute("chain", jobs, ExecuteOptions::default())?;
    with_timeout(handler.wait_entered("B")).await;
    wait_until_running(&orchestrator, &execution, "B").await;

    orchestrator.pause(execution.id, true)?;
    handler.release("B");
    with_timeout(orchestrator.wait(execution.id)).await?;

    let next = orchestrator.resume_latest(execution.id)?;
    let done = with_timeout(orchestrator.wait(next.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(handler.run_count("B"), 1);
    assert_eq!(handler.run_count("C"), 1);
    Ok(())
}

#[tokio::test]
async fn pause_without_checkpoint_writes_none() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    handler.gate("A");
    let (orchestrator, store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let execution = orchestrator.execute("one", vec![job("A", &[]), job("B", &["A"])], ExecuteOptions::default())?;
    with_timeout(handler.wait_entered("A")).await;

    let outcome = orchestrator.pause(execution.id, false)?;
    assert!(outcome.checkpoint.is_none());
    handler.release("A");
    with_timeout(orchestrator.wait(execution.id)).await?;
    assert!(store.latest_checkpoint(execution.id)?.is_none());
    Ok(())
}

/// Roots A and B, with C after A and D after B. A fails while B runs.
fn forked_jobs() -> Vec<trainflow::dag::JobConfig> {
    vec![job("A", &[]), job("B", &[]), job("C", &["A"]), job("D", &["B"])]
}

#[tokio::test]
async fn halt_policy_lets_siblings_finish_and_skips_the_rest() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    handler.fail("A", "loss diverged");
    handler.gate("A");
    handler.gate("B");
    let (orchestrator, _store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let execution = orchestrator.execute("fork", forked_jobs(), ExecuteOptions::default())?;
    with_timeout(async {
        handler.wait_entered("A").await;
        handler.wait_entered("B").await;
    })
    .await;
    handler.release("A");
    handler.release("B");

    let done = with_timeout(orchestrator.wait(execution.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(status_of(&done, "A"), JobStatus::Failed);
    assert_eq!(status_of(&done, "B"), JobStatus::Succeeded);
    assert_eq!(status_of(&done, "C"), JobStatus::Skipped);
    assert_eq!(status_of(&done, "D"), JobStatus::Skipped);
    assert_eq!(done.jobs["A"].error.as_deref(), Some("loss diverged"));
    assert!(done.error.as_deref().unwrap_or_default().contains("A"));
    assert!(done.completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn continue_policy_keeps_independent_branches() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    handler.fail("A", "bad shard");
    let (orchestrator, _store) = local_orchestrator(&handler, FailurePolicy::Continue);

    let execution = orchestrator.execute("fork", forked_jobs(), ExecuteOptions::default())?;
    let done = with_timeout(orchestrator.wait(execution.id)).await?;

    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(status_of(&done, "A"), JobStatus::Failed);
    assert_eq!(status_of(&done, "B"), JobStatus::Succeeded);
    assert_eq!(status_of(&done, "C"), JobStatus::Skipped);
    assert_eq!(status_of(&done, "D"), JobStatus::Succeeded);
    assert_eq!(handler.run_count("C"), 0);
    Ok(())
}

#[tokio::test]
async fn handler_panic_fails_job_not_orchestrator() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    handler.panic_on("A", "CUDA out of memory");
    let (orchestrator, _store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let first = orchestrator.execute("boom", vec![job("A", &[]), job("B", &["A"])], ExecuteOptions::default())?;
    let done = with_timeout(orchestrator.wait(first.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Failed);
    let error = done.jobs["A"].error.clone().unwrap_or_default();
    assert!(error.contains("CUDA out of memory"), "{error}");
    assert_eq!(status_of(&done, "B"), JobStatus::Skipped);

    // Still usable afterwards.
    let second = orchestrator.execute("ok", vec![job("X", &[])], ExecuteOptions::default())?;
    let done = with_timeout(orchestrator.wait(second.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn handler_results_are_recorded() -> TestResult {
    let handler = ScriptedHandler::new();
    handler.succeed_with("eval", serde_json::json!({ "accuracy": 0.93 }));
    let (orchestrator, _store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let execution = orchestrator.execute(
        "eval",
        vec![job_of("eval", JobType::Evaluation, &[])],
        ExecuteOptions::default(),
    )?;
    let done = with_timeout(orchestrator.wait(execution.id)).await?;
    let state = &done.jobs["eval"];
    assert_eq!(state.result, Some(serde_json::json!({ "accuracy": 0.93 })));
    assert_eq!(state.attempts, 1);
    assert!(state.started_at.is_some() && state.finished_at.is_some());
    Ok(())
}

#[tokio::test]
async fn invalid_graphs_are_rejected_before_anything_runs() -> TestResult {
    let handler = ScriptedHandler::new();
    let (orchestrator, store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let cyclic = vec![job("A", &["B"]), job("B", &["A"])];
    match orchestrator.execute("cyclic", cyclic, ExecuteOptions::default()) {
        Err(OrchestratorError::Validation(issues)) => {
            assert!(issues.iter().any(|i| matches!(i, ValidationIssue::Cycle { .. })));
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let selfish = vec![job("A", &["A"])];
    assert!(matches!(
        orchestrator.execute("self", selfish, ExecuteOptions::default()),
        Err(OrchestratorError::Validation(_))
    ));

    assert!(matches!(
        orchestrator.execute(" ", vec![job("A", &[])], ExecuteOptions::default()),
        Err(OrchestratorError::InvalidRequest(_))
    ));
    assert!(matches!(
        orchestrator.execute("zero", vec![job("A", &[])], ExecuteOptions::parallelism(0)),
        Err(OrchestratorError::InvalidRequest(_))
    ));

    assert!(store.list_executions()?.is_empty());
    assert!(handler.runs().is_empty());
    Ok(())
}

#[tokio::test]
async fn unregistered_job_type_is_rejected() -> TestResult {
    let handler = ScriptedHandler::new();
    let registry = HandlerRegistry::new().with(JobType::Training, handler.clone());
    let orchestrator = DagOrchestrator::new(
        Arc::new(MemoryStateStore::new()),
        Arc::new(LocalDispatcher::new(registry)),
        Default::default(),
    );

    let jobs = vec![job("train", &[]), job_of("export", JobType::Export, &["train"])];
    match orchestrator.execute("wf", jobs, ExecuteOptions::default()) {
        Err(OrchestratorError::Validation(issues)) => assert_eq!(
            issues,
            vec![ValidationIssue::UnregisteredJobType {
                job_id: "export".into(),
                job_type: JobType::Export,
            }]
        ),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(handler.runs().is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_graph_completes_immediately() -> TestResult {
    let handler = ScriptedHandler::new();
    let (orchestrator, _store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let execution = orchestrator.execute("nothing", vec![], ExecuteOptions::default())?;
    let done = with_timeout(orchestrator.wait(execution.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert!(done.jobs.is_empty());
    Ok(())
}

#[tokio::test]
async fn control_operations_check_state() -> TestResult {
    init_tracing();
    let handler = ScriptedHandler::new();
    let (orchestrator, _store) = local_orchestrator(&handler, FailurePolicy::Halt);

    let unknown = uuid::Uuid::new_v4();
    assert!(matches!(
        orchestrator.get_execution(unknown),
        Err(OrchestratorError::ExecutionNotFound(_))
    ));
    assert!(matches!(
        orchestrator.pause(unknown, true),
        Err(OrchestratorError::ExecutionNotFound(_))
    ));
    assert!(matches!(
        orchestrator.resume_from_checkpoint("missing"),
        Err(OrchestratorError::CheckpointNotFound(_))
    ));

    let execution = orchestrator.execute("wf", vec![job("A", &[])], ExecuteOptions::default())?;
    let done = with_timeout(orchestrator.wait(execution.id)).await?;
    assert_eq!(done.status, ExecutionStatus::Completed);

    assert!(matches!(
        orchestrator.pause(execution.id, true),
        Err(OrchestratorError::InvalidState(_))
    ));
    assert!(matches!(
        orchestrator.resume(execution.id),
        Err(OrchestratorError::InvalidState(_))
    ));
    assert!(!orchestrator.is_paused(execution.id)?);
    assert_eq!(orchestrator.list_executions()?.len(), 1);
    Ok(())
}
