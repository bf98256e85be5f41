// src/engine/orchestrator.rs

//! Public control surface for executions: execute, pause, resume,
//! checkpoint, query.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dag::validator::level_ids;
use crate::dag::{validate, JobConfig, JobGraph, ValidationIssue};
use crate::errors::{OrchestratorError, Result};
use crate::exec::JobDispatcher;
use crate::store::StateStore;
use crate::types::FailurePolicy;

use super::execution::{Checkpoint, Execution, ExecutionOptions, ExecutionStatus};
use super::runtime::{run_execution, ExecutionHandle, Progress, RunnerContext};

/// Defaults applied when a request leaves an option out.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub default_parallelism: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_parallelism: 4,
            failure_policy: FailurePolicy::Halt,
        }
    }
}

/// Per-request overrides for [`DagOrchestrator::execute`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub parallelism: Option<usize>,
    pub failure_policy: Option<FailurePolicy>,
}

impl ExecuteOptions {
    pub fn parallelism(n: usize) -> Self {
        Self {
            parallelism: Some(n),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseOutcome {
    pub paused: bool,
    pub checkpoint: Option<Checkpoint>,
}

struct Inner {
    ctx: RunnerContext,
    settings: OrchestratorSettings,
    executions: Mutex<HashMap<Uuid, Arc<ExecutionHandle>>>,
}

/// Drives executions of job graphs. Cheap to clone.
#[derive(Clone)]
pub struct DagOrchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for DagOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagOrchestrator")
            .field("settings", &self.inner.settings)
            .field("executions", &self.executions().len())
            .finish()
    }
}

impl DagOrchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx: RunnerContext { store, dispatcher },
                settings,
                executions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.inner.ctx.store
    }

    fn executions(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<ExecutionHandle>>> {
        self.inner
            .executions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, id: Uuid) -> Option<Arc<ExecutionHandle>> {
        self.executions().get(&id).cloned()
    }

    /// Ids of executions held by this process.
    pub fn live_execution_ids(&self) -> Vec<Uuid> {
        self.executions().keys().copied().collect()
    }

    /// Graph validation plus handler availability for every job type.
    pub fn check_graph(&self, jobs: &[JobConfig]) -> Result<()> {
        validate(jobs).into_result()?;
        let unsupported: Vec<ValidationIssue> = jobs
            .iter()
            .filter(|job| !self.inner.ctx.dispatcher.supports(job.job_type))
            .map(|job| ValidationIssue::UnregisteredJobType {
                job_id: job.id.clone(),
                job_type: job.job_type,
            })
            .collect();
        if unsupported.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Validation(unsupported))
        }
    }

    /// Validate, persist and start an execution. Returns as soon as the
    /// control loop is spawned.
    pub fn execute(
        &self,
        workflow_id: &str,
        jobs: Vec<JobConfig>,
        options: ExecuteOptions,
    ) -> Result<Execution> {
        if workflow_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "workflowId must not be empty".to_string(),
            ));
        }
        let parallelism = options
            .parallelism
            .unwrap_or(self.inner.settings.default_parallelism);
        if parallelism == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "parallelism must be >= 1".to_string(),
            ));
        }
        self.check_graph(&jobs)?;

        let options = ExecutionOptions {
            parallelism,
            failure_policy: options
                .failure_policy
                .unwrap_or(self.inner.settings.failure_policy),
        };
        let execution = Execution::new(workflow_id, jobs, options);
        info!(
            execution_id = %execution.id,
            workflow_id = %workflow_id,
            jobs = execution.graph.len(),
            parallelism,
            "starting execution"
        );
        self.start(execution)
    }

    /// Register the execution, persist it as running and spawn its loop.
    fn start(&self, mut execution: Execution) -> Result<Execution> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            OrchestratorError::Infrastructure(format!("no async runtime to run execution: {e}"))
        })?;

        let graph = JobGraph::from_jobs(&execution.graph);
        let levels = level_ids(&graph);

        execution.set_status(ExecutionStatus::Running);
        self.inner.ctx.store.save_execution(&execution)?;

        let handle = Arc::new(ExecutionHandle::new(execution, graph, levels));
        let snapshot = {
            let mut cell = handle.lock();
            cell.runner_active = true;
            handle.publish(&cell);
            cell.execution.clone()
        };
        self.executions().insert(snapshot.id, handle.clone());

        runtime.spawn(run_execution(self.inner.ctx.clone(), handle));
        Ok(snapshot)
    }

    /// Stop dispatching new jobs. In-flight jobs finish on their own.
    ///
    /// With `create_checkpoint`, a checkpoint is written before returning and
    /// another one once in-flight jobs have drained (if anything changed).
    pub fn pause(&self, execution_id: Uuid, create_checkpoint: bool) -> Result<PauseOutcome> {
        let handle = self.live_handle(execution_id)?;
        let mut cell = handle.lock();

        if cell.execution.status != ExecutionStatus::Running {
            return Err(OrchestratorError::InvalidState(format!(
                "execution {execution_id} is {:?}, not running",
                cell.execution.status
            )));
        }

        cell.pause_requested = true;
        handle.gate.close();
        cell.execution.set_status(ExecutionStatus::Paused);
        cell.checkpoint_on_settle = create_checkpoint;
        self.inner.ctx.store.save_execution(&cell.execution)?;
        handle.publish(&cell);
        info!(execution_id = %execution_id, create_checkpoint, "execution paused");

        let checkpoint = if create_checkpoint {
            let checkpoint = Checkpoint::capture(&cell.execution)?;
            self.inner.ctx.store.save_checkpoint(&checkpoint)?;
            cell.last_checkpoint_digest = Some(checkpoint.digest.clone());
            info!(execution_id = %execution_id, checkpoint_id = %checkpoint.checkpoint_id, "checkpoint created");
            Some(checkpoint)
        } else {
            None
        };

        Ok(PauseOutcome {
            paused: true,
            checkpoint,
        })
    }

    /// Continue a paused execution held by this process from its next
    /// unresolved level.
    pub fn resume(&self, execution_id: Uuid) -> Result<Execution> {
        let handle = match self.handle(execution_id) {
            Some(h) => h,
            None => {
                let stored = self.load_stored(execution_id)?;
                return Err(OrchestratorError::InvalidState(format!(
                    "execution {execution_id} ({:?}) is not held by this process; resume it from a checkpoint",
                    stored.status
                )));
            }
        };

        let mut cell = handle.lock();
        if cell.execution.status != ExecutionStatus::Paused {
            return Err(OrchestratorError::InvalidState(format!(
                "execution {execution_id} is {:?}, not paused",
                cell.execution.status
            )));
        }

        cell.pause_requested = false;
        cell.checkpoint_on_settle = false;
        handle.gate.open();
        cell.execution.set_status(ExecutionStatus::Running);
        self.inner.ctx.store.save_execution(&cell.execution)?;

        if !cell.runner_active {
            let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                OrchestratorError::Infrastructure(format!("no async runtime to run execution: {e}"))
            })?;
            cell.runner_active = true;
            runtime.spawn(run_execution(self.inner.ctx.clone(), handle.clone()));
        }
        handle.publish(&cell);
        info!(execution_id = %execution_id, "execution resumed");
        Ok(cell.execution.clone())
    }

    /// Start a new execution from a persisted checkpoint. Jobs that were in
    /// flight when it was taken run again.
    pub fn resume_from_checkpoint(&self, checkpoint_id: &str) -> Result<Execution> {
        let checkpoint = self
            .inner
            .ctx
            .store
            .load_checkpoint(checkpoint_id)?
            .ok_or_else(|| OrchestratorError::CheckpointNotFound(checkpoint_id.to_string()))?;
        checkpoint.verify()?;
        self.check_graph(&checkpoint.graph)?;

        let execution = Execution::from_checkpoint(&checkpoint);
        info!(
            execution_id = %execution.id,
            checkpoint_id = %checkpoint_id,
            source_execution_id = %checkpoint.execution_id,
            "resuming from checkpoint"
        );
        self.start(execution)
    }

    /// Resume from the newest checkpoint of an execution.
    pub fn resume_latest(&self, execution_id: Uuid) -> Result<Execution> {
        let checkpoint = self
            .inner
            .ctx
            .store
            .latest_checkpoint(execution_id)?
            .ok_or_else(|| {
                OrchestratorError::CheckpointNotFound(format!(
                    "no checkpoint for execution {execution_id}"
                ))
            })?;
        self.resume_from_checkpoint(&checkpoint.checkpoint_id)
    }

    /// Write an on-demand checkpoint of the current state.
    pub fn checkpoint(&self, execution_id: Uuid) -> Result<Checkpoint> {
        let checkpoint = match self.handle(execution_id) {
            Some(handle) => {
                let mut cell = handle.lock();
                let checkpoint = Checkpoint::capture(&cell.execution)?;
                self.inner.ctx.store.save_checkpoint(&checkpoint)?;
                cell.last_checkpoint_digest = Some(checkpoint.digest.clone());
                checkpoint
            }
            None => {
                let execution = self.load_stored(execution_id)?;
                let checkpoint = Checkpoint::capture(&execution)?;
                self.inner.ctx.store.save_checkpoint(&checkpoint)?;
                checkpoint
            }
        };
        info!(execution_id = %execution_id, checkpoint_id = %checkpoint.checkpoint_id, "checkpoint created");
        Ok(checkpoint)
    }

    pub fn get_execution(&self, execution_id: Uuid) -> Result<Execution> {
        match self.handle(execution_id) {
            Some(handle) => Ok(handle.snapshot()),
            None => self.load_stored(execution_id),
        }
    }

    pub fn is_paused(&self, execution_id: Uuid) -> Result<bool> {
        Ok(self.get_execution(execution_id)?.status == ExecutionStatus::Paused)
    }

    /// Every known execution: persisted ones, overridden by live state.
    pub fn list_executions(&self) -> Result<Vec<Execution>> {
        let mut by_id: HashMap<Uuid, Execution> = self
            .inner
            .ctx
            .store
            .list_executions()?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
        let live: Vec<Arc<ExecutionHandle>> = self.executions().values().cloned().collect();
        for handle in live {
            let snapshot = handle.snapshot();
            by_id.insert(snapshot.id, snapshot);
        }
        let mut all: Vec<Execution> = by_id.into_values().collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(all)
    }

    /// Wait until the execution has no running loop and is terminal or paused.
    pub async fn wait(&self, execution_id: Uuid) -> Result<Execution> {
        let Some(handle) = self.handle(execution_id) else {
            return self.load_stored(execution_id);
        };
        let mut rx = handle.subscribe();
        if rx.wait_for(Progress::is_settled).await.is_err() {
            warn!(execution_id = %execution_id, "progress channel closed while waiting");
        }
        Ok(handle.snapshot())
    }

    fn live_handle(&self, execution_id: Uuid) -> Result<Arc<ExecutionHandle>> {
        match self.handle(execution_id) {
            Some(h) => Ok(h),
            None => {
                let stored = self.load_stored(execution_id)?;
                Err(OrchestratorError::InvalidState(format!(
                    "execution {execution_id} ({:?}) is not held by this process",
                    stored.status
                )))
            }
        }
    }

    fn load_stored(&self, execution_id: Uuid) -> Result<Execution> {
        self.inner
            .ctx
            .store
            .load_execution(execution_id)?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))
    }
}
