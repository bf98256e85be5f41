// src/engine/runtime.rs

//! Async shell around [`super::core`]: one control loop per execution.
//!
//! The loop runs the execution level by level. For each level it hands the
//! ready jobs to the [`JobDispatcher`] and concurrently consumes the
//! [`JobEvent`]s it reports. Every state change is made under the
//! execution's lock and persisted before the lock is released.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::dag::{JobGraph, JobId};
use crate::exec::{DispatchGate, JobDispatcher, JobEvent, LevelDispatch};
use crate::store::StateStore;
use crate::types::FailurePolicy;

use super::core::{self, LevelVerdict};
use super::execution::{content_digest, Checkpoint, Execution, ExecutionStatus};

/// Published on every status or runner change, for [`wait`](super::DagOrchestrator::wait).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub status: ExecutionStatus,
    pub runner_active: bool,
}

impl Progress {
    /// No runner is alive and the execution is terminal or paused.
    pub fn is_settled(&self) -> bool {
        !self.runner_active && self.status.is_settled()
    }
}

#[derive(Debug)]
pub(crate) struct ExecutionCell {
    pub execution: Execution,
    pub pause_requested: bool,
    pub runner_active: bool,
    /// Write a checkpoint once the paused execution has drained.
    pub checkpoint_on_settle: bool,
    pub last_checkpoint_digest: Option<String>,
}

/// In-memory state of an execution owned by this process.
pub(crate) struct ExecutionHandle {
    cell: Mutex<ExecutionCell>,
    pub graph: JobGraph,
    pub levels: Vec<Vec<JobId>>,
    pub gate: DispatchGate,
    progress: watch::Sender<Progress>,
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("levels", &self.levels)
            .field("gate_open", &self.gate.is_open())
            .finish_non_exhaustive()
    }
}

impl ExecutionHandle {
    pub fn new(execution: Execution, graph: JobGraph, levels: Vec<Vec<JobId>>) -> Self {
        let (progress, _) = watch::channel(Progress {
            status: execution.status,
            runner_active: false,
        });
        Self {
            cell: Mutex::new(ExecutionCell {
                execution,
                pause_requested: false,
                runner_active: false,
                checkpoint_on_settle: false,
                last_checkpoint_digest: None,
            }),
            graph,
            levels,
            gate: DispatchGate::new(),
            progress,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ExecutionCell> {
        self.cell.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Execution {
        self.lock().execution.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Publish the cell's status. Call while holding the lock.
    pub fn publish(&self, cell: &ExecutionCell) {
        self.progress.send_replace(Progress {
            status: cell.execution.status,
            runner_active: cell.runner_active,
        });
    }
}

/// Shared services the control loop needs.
#[derive(Clone)]
pub(crate) struct RunnerContext {
    pub store: Arc<dyn StateStore>,
    pub dispatcher: Arc<dyn JobDispatcher>,
}

impl RunnerContext {
    /// Persist the execution. On failure the execution is failed in memory
    /// and the gate is closed; `false` tells the caller to stop.
    pub fn persist(&self, handle: &ExecutionHandle, cell: &mut ExecutionCell) -> bool {
        match self.store.save_execution(&cell.execution) {
            Ok(()) => true,
            Err(err) => {
                error!(
                    execution_id = %cell.execution.id,
                    error = %err,
                    "persisting execution failed; failing execution"
                );
                handle.gate.close();
                cell.execution.error = Some(format!("state store failure: {err}"));
                if !cell.execution.status.is_terminal() {
                    cell.execution.set_status(ExecutionStatus::Failed);
                }
                false
            }
        }
    }

    /// Write a checkpoint unless its content equals the previous one.
    pub fn checkpoint_if_changed(&self, cell: &mut ExecutionCell) -> Option<Checkpoint> {
        let digest = match content_digest(&cell.execution.graph, &cell.execution.jobs) {
            Ok(d) => d,
            Err(err) => {
                warn!(execution_id = %cell.execution.id, error = %err, "could not digest execution");
                return None;
            }
        };
        if cell.last_checkpoint_digest.as_deref() == Some(digest.as_str()) {
            debug!(execution_id = %cell.execution.id, "state unchanged since last checkpoint");
            return None;
        }
        let checkpoint = Checkpoint::capture(&cell.execution).ok()?;
        match self.store.save_checkpoint(&checkpoint) {
            Ok(()) => {
                info!(
                    execution_id = %cell.execution.id,
                    checkpoint_id = %checkpoint.checkpoint_id,
                    "wrote settled checkpoint"
                );
                cell.last_checkpoint_digest = Some(checkpoint.digest.clone());
                Some(checkpoint)
            }
            Err(err) => {
                warn!(execution_id = %cell.execution.id, error = %err, "writing settled checkpoint failed");
                None
            }
        }
    }
}

/// Drive the execution until it finishes or parks. The caller must have set
/// `runner_active` before spawning this.
pub(crate) async fn run_execution(ctx: RunnerContext, handle: Arc<ExecutionHandle>) {
    let execution_id = handle.lock().execution.id;
    info!(execution_id = %execution_id, levels = handle.levels.len(), "execution loop started");

    loop {
        // Choose the next level and promote its jobs, or stop.
        let dispatch = {
            let mut cell = handle.lock();

            if cell.execution.status.is_terminal() {
                stop(&handle, &mut cell);
                return;
            }
            if cell.pause_requested {
                park(&ctx, &handle, &mut cell);
                return;
            }

            let Some(level) = core::next_level(&cell.execution, &handle.levels) else {
                core::finish(&mut cell.execution);
                info!(execution_id = %execution_id, status = ?cell.execution.status, "execution finished");
                ctx.persist(&handle, &mut cell);
                stop(&handle, &mut cell);
                return;
            };

            let jobs = core::begin_level(&mut cell.execution, &handle.graph, &handle.levels[level]);
            if !ctx.persist(&handle, &mut cell) {
                stop(&handle, &mut cell);
                return;
            }
            if jobs.is_empty() {
                continue;
            }

            info!(execution_id = %execution_id, level, jobs = jobs.len(), "starting level");
            (level, jobs, cell.execution.workflow_id.clone(), cell.execution.options)
        };

        let (level, jobs, workflow_id, options) = dispatch;
        let (tx, rx) = mpsc::channel::<JobEvent>(64);
        let level_dispatch = LevelDispatch {
            execution_id,
            workflow_id,
            level,
            jobs,
            parallelism: options.parallelism,
            events: tx,
            gate: handle.gate.clone(),
        };

        tokio::join!(
            ctx.dispatcher.dispatch_level(level_dispatch),
            consume_events(&ctx, &handle, rx, options.failure_policy),
        );

        let mut cell = handle.lock();
        if cell.execution.status.is_terminal() {
            stop(&handle, &mut cell);
            return;
        }
        let pause_requested = cell.pause_requested;
        let verdict = core::settle_level(&mut cell.execution, &handle.graph, pause_requested);
        let persisted = ctx.persist(&handle, &mut cell);
        debug!(execution_id = %execution_id, level, ?verdict, "level settled");

        match verdict {
            LevelVerdict::Halted => {
                stop(&handle, &mut cell);
                return;
            }
            _ if !persisted => {
                stop(&handle, &mut cell);
                return;
            }
            LevelVerdict::Park => {
                park(&ctx, &handle, &mut cell);
                return;
            }
            LevelVerdict::Advance => {}
        }
    }
}

async fn consume_events(
    ctx: &RunnerContext,
    handle: &ExecutionHandle,
    mut rx: mpsc::Receiver<JobEvent>,
    policy: FailurePolicy,
) {
    while let Some(event) = rx.recv().await {
        let mut cell = handle.lock();
        let effect = core::apply_event(&mut cell.execution, &handle.graph, event);
        if effect.job_failed && policy == FailurePolicy::Halt {
            handle.gate.close();
        }
        ctx.persist(handle, &mut cell);
    }
}

/// Leave the execution paused with no runner, writing the settled checkpoint
/// if one was requested.
fn park(ctx: &RunnerContext, handle: &ExecutionHandle, cell: &mut ExecutionCell) {
    cell.execution.set_status(ExecutionStatus::Paused);
    if cell.checkpoint_on_settle {
        ctx.checkpoint_if_changed(cell);
    }
    ctx.persist(handle, cell);
    info!(execution_id = %cell.execution.id, "execution parked");
    stop(handle, cell);
}

fn stop(handle: &ExecutionHandle, cell: &mut ExecutionCell) {
    cell.runner_active = false;
    handle.publish(cell);
}
