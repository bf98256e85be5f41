// src/engine/distributed.rs

//! [`DagOrchestrator`] wired to the worker fleet.
//!
//! Each level's ready jobs are enqueued on the [`JobQueue`] and bound to
//! workers chosen by the [`WorkerManager`]; the [`WorkerTransport`] decides
//! how a bound job actually reaches its worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;
use uuid::Uuid;

use crate::dag::JobConfig;
use crate::errors::Result;
use crate::exec::{RetryPolicy, WorkerDispatcher, WorkerTransport};
use crate::health::{self, HealthReport};
use crate::queue::JobQueue;
use crate::store::StateStore;
use crate::workers::{RegisterWorker, WorkerManager, WorkerRegistration};

use super::execution::Execution;
use super::orchestrator::{DagOrchestrator, ExecuteOptions, OrchestratorSettings};

pub struct DistributedOrchestrator {
    orchestrator: DagOrchestrator,
    store: Arc<dyn StateStore>,
    queue: Arc<JobQueue>,
    workers: Arc<WorkerManager>,
    transport: Arc<dyn WorkerTransport>,
    initialized: AtomicBool,
}

impl std::fmt::Debug for DistributedOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedOrchestrator")
            .field("orchestrator", &self.orchestrator)
            .field("initialized", &self.initialized.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl DistributedOrchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<JobQueue>,
        workers: Arc<WorkerManager>,
        transport: Arc<dyn WorkerTransport>,
        settings: OrchestratorSettings,
        retry: RetryPolicy,
    ) -> Self {
        let dispatcher = WorkerDispatcher::new(queue.clone(), workers.clone(), transport.clone(), retry);
        let orchestrator = DagOrchestrator::new(store.clone(), Arc::new(dispatcher), settings);
        Self {
            orchestrator,
            store,
            queue,
            workers,
            transport,
            initialized: AtomicBool::new(false),
        }
    }

    /// Prepare the fleet side. Idempotent.
    ///
    /// Queue entries left behind by executions this process does not hold are
    /// dropped; those executions come back through checkpoints.
    pub fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        let live: Vec<Uuid> = self.orchestrator.live_execution_ids();
        let purged = self.queue.purge_orphans(&live)?;
        let stats = self.workers.get_worker_stats()?;
        info!(
            workers = stats.total,
            active = stats.active,
            queue_paused = self.queue.is_paused(),
            purged_entries = purged,
            "distributed orchestrator initialized"
        );

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Like [`DagOrchestrator::execute`], initializing first if needed.
    pub fn execute(&self, workflow_id: &str, jobs: Vec<JobConfig>, options: ExecuteOptions) -> Result<Execution> {
        self.initialize()?;
        self.orchestrator.execute(workflow_id, jobs, options)
    }

    pub fn orchestrator(&self) -> &DagOrchestrator {
        &self.orchestrator
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn workers(&self) -> &Arc<WorkerManager> {
        &self.workers
    }

    pub fn register_worker(&self, request: RegisterWorker) -> Result<WorkerRegistration> {
        self.workers.register_worker(request)
    }

    pub fn heartbeat(&self, worker_id: &str, current_load: u32) -> Result<WorkerRegistration> {
        self.workers.heartbeat(worker_id, current_load)
    }

    /// Remove a worker and fail whatever the transport still holds for it.
    pub fn deregister_worker(&self, worker_id: &str) -> Result<bool> {
        let removed = self.workers.deregister_worker(worker_id)?;
        let failed = self.transport.worker_departed(worker_id, "deregistered");
        if failed > 0 {
            info!(worker_id = %worker_id, failed, "failed assignments of departed worker");
        }
        Ok(removed)
    }

    pub fn health(&self) -> HealthReport {
        health::check(&self.queue, &self.workers, self.store.as_ref())
    }
}
