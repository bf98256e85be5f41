// src/engine/core.rs

//! Pure execution state machine.
//!
//! These functions take an [`Execution`] plus its [`JobGraph`] and apply one
//! step: starting a level, recording a dispatcher event, settling a level.
//! They perform no IO and hold no locks, so the rules can be unit tested
//! without Tokio. The async shell in [`super::runtime`] calls them while
//! holding the execution lock and persists the result.

use tracing::{info, warn};

use crate::dag::state_manager::{any_failed, next_unresolved_level};
use crate::dag::{JobGraph, JobId, JobStatus, StateManager};
use crate::exec::{JobEvent, JobOutcome, ScheduledJob};
use crate::types::FailurePolicy;

use super::execution::{Execution, ExecutionStatus};

/// What an applied event changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventEffect {
    /// A job failed with this event.
    pub job_failed: bool,
}

/// What the runner should do once a level has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelVerdict {
    /// Move on to the next unresolved level.
    Advance,
    /// Stop here and wait for resume.
    Park,
    /// A failure under the `halt` policy ended the execution.
    Halted,
}

/// Index of the next level to run, or `None` when every job is terminal.
pub fn next_level(execution: &Execution, levels: &[Vec<JobId>]) -> Option<usize> {
    next_unresolved_level(levels, &execution.jobs)
}

/// Promote the level's runnable jobs to `ready` and describe them for the
/// dispatcher. Jobs that can no longer run are skipped.
pub fn begin_level(execution: &mut Execution, graph: &JobGraph, level: &[JobId]) -> Vec<ScheduledJob> {
    let ready = StateManager::new(graph, &mut execution.jobs).promote_ready(level);
    execution.touch();

    ready
        .into_iter()
        .filter_map(|id| {
            let job = graph.job(&id)?.clone();
            let attempt = execution.jobs.get(&id).map(|s| s.attempts).unwrap_or(0) + 1;
            Some(ScheduledJob { job, attempt })
        })
        .collect()
}

/// Record a dispatcher event on the job it concerns.
pub fn apply_event(execution: &mut Execution, graph: &JobGraph, event: JobEvent) -> EventEffect {
    let mut effect = EventEffect::default();
    let execution_id = execution.id;

    match event {
        JobEvent::Started {
            job_id,
            worker_id,
            attempt,
        } => match execution.jobs.get_mut(&job_id) {
            Some(state) if state.status == JobStatus::Ready => {
                state.mark_running(worker_id, attempt);
            }
            Some(state) => warn!(
                execution_id = %execution_id,
                job_id = %job_id,
                status = ?state.status,
                "ignoring start of job that is not ready"
            ),
            None => warn!(execution_id = %execution_id, job_id = %job_id, "start for unknown job"),
        },

        JobEvent::Finished { job_id, outcome } => {
            let Some(state) = execution.jobs.get_mut(&job_id) else {
                warn!(execution_id = %execution_id, job_id = %job_id, "outcome for unknown job");
                return effect;
            };
            if !matches!(state.status, JobStatus::Ready | JobStatus::Running) {
                warn!(
                    execution_id = %execution_id,
                    job_id = %job_id,
                    status = ?state.status,
                    "ignoring outcome of job that is not in flight"
                );
                return effect;
            }

            match outcome {
                JobOutcome::Succeeded(value) => {
                    info!(execution_id = %execution_id, job_id = %job_id, "job succeeded");
                    state.mark_succeeded(value);
                }
                JobOutcome::Failed(error) => {
                    warn!(execution_id = %execution_id, job_id = %job_id, error = %error, "job failed");
                    state.mark_failed(error);
                    effect.job_failed = true;

                    if execution.options.failure_policy == FailurePolicy::Continue {
                        let skipped =
                            StateManager::new(graph, &mut execution.jobs).mark_dependents_skipped(&job_id);
                        if !skipped.is_empty() {
                            info!(execution_id = %execution_id, job_id = %job_id, ?skipped, "skipped dependents of failed job");
                        }
                    }
                }
            }
        }
    }

    execution.touch();
    effect
}

/// Decide how to continue after a level drained.
///
/// Jobs promoted to `ready` but never started go back to `pending` so a later
/// resume dispatches them again.
pub fn settle_level(execution: &mut Execution, graph: &JobGraph, pause_requested: bool) -> LevelVerdict {
    let mut sm = StateManager::new(graph, &mut execution.jobs);
    sm.revert_undispatched();

    if execution.options.failure_policy == FailurePolicy::Halt && any_failed(&execution.jobs) {
        let skipped = StateManager::new(graph, &mut execution.jobs).skip_unstarted();
        info!(execution_id = %execution.id, skipped = skipped.len(), "halting after job failure");
        finish(execution);
        return LevelVerdict::Halted;
    }

    execution.touch();
    if pause_requested {
        LevelVerdict::Park
    } else {
        LevelVerdict::Advance
    }
}

/// Final status once no level is left: `failed` if any job failed.
pub fn finish(execution: &mut Execution) {
    let status = if any_failed(&execution.jobs) {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Completed
    };
    if status == ExecutionStatus::Failed && execution.error.is_none() {
        let failed: Vec<&str> = execution
            .jobs
            .iter()
            .filter(|(_, s)| s.status == JobStatus::Failed)
            .map(|(id, _)| id.as_str())
            .collect();
        execution.error = Some(format!("failed jobs: {}", failed.join(", ")));
    }
    execution.set_status(status);
}
