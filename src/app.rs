// src/app.rs

//! Service wiring: builds the store, queue, fleet and orchestrator described
//! by a [`ConfigFile`]. Shared by the HTTP server and the `run` subcommand.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::ConfigFile;
use crate::dag::{JobConfig, JobType};
use crate::engine::{
    DagOrchestrator, DistributedOrchestrator, Execution, ExecuteOptions, HandlerRegistry,
    NoopHandler, OrchestratorSettings,
};
use crate::errors::Result;
use crate::exec::{
    CommandHandler, InProcessTransport, LocalDispatcher, MailboxTransport, RetryPolicy,
    WorkerTransport,
};
use crate::health::{self, HealthReport};
use crate::queue::JobQueue;
use crate::store::{FileStateStore, MemoryStateStore, StateStore};
use crate::types::{HandlerKind, OrchestratorMode, StorageMode, TransportMode};
use crate::workers::{
    FileWorkerRegistry, MemoryWorkerRegistry, RegisterWorker, WorkerManager, WorkerRegistry,
};

/// Id of the worker [`App::host_local_worker`] registers.
pub const LOCAL_WORKER_ID: &str = "local";

/// Handles to every long-lived service. Cheap to clone.
#[derive(Clone, Debug)]
pub struct App {
    pub orchestrator: DagOrchestrator,
    /// Present when `[orchestrator].mode = "distributed"`.
    pub distributed: Option<Arc<DistributedOrchestrator>>,
    pub store: Arc<dyn StateStore>,
    pub queue: Arc<JobQueue>,
    pub workers: Arc<WorkerManager>,
    /// Present when jobs reach workers through the mailbox transport.
    pub mailbox: Option<Arc<MailboxTransport>>,
}

impl App {
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: &ConfigFile, clock: Arc<dyn Clock>) -> Result<Self> {
        let (store, registry): (Arc<dyn StateStore>, Arc<dyn WorkerRegistry>) =
            match cfg.storage.mode {
                StorageMode::Memory => (
                    Arc::new(MemoryStateStore::new()),
                    Arc::new(MemoryWorkerRegistry::new()),
                ),
                StorageMode::File => (
                    Arc::new(FileStateStore::new(&cfg.storage.dir)),
                    Arc::new(FileWorkerRegistry::new(&cfg.storage.dir)),
                ),
            };

        let queue = Arc::new(JobQueue::open(store.clone())?);
        let workers = Arc::new(WorkerManager::with_heartbeat(
            registry,
            clock,
            cfg.workers.heartbeat_interval(),
            cfg.workers.staleness_multiplier,
        ));
        let handlers = build_handlers(&cfg.handlers);
        let settings = OrchestratorSettings {
            default_parallelism: cfg.orchestrator.default_parallelism,
            failure_policy: cfg.orchestrator.failure_policy,
        };

        info!(
            storage = ?cfg.storage.mode,
            mode = ?cfg.orchestrator.mode,
            transport = ?cfg.orchestrator.transport,
            handlers = ?handlers.registered_types(),
            "building services"
        );

        match cfg.orchestrator.mode {
            OrchestratorMode::Local => {
                let dispatcher = Arc::new(LocalDispatcher::new(handlers));
                Ok(Self {
                    orchestrator: DagOrchestrator::new(store.clone(), dispatcher, settings),
                    distributed: None,
                    store,
                    queue,
                    workers,
                    mailbox: None,
                })
            }
            OrchestratorMode::Distributed => {
                let (transport, mailbox): (Arc<dyn WorkerTransport>, _) =
                    match cfg.orchestrator.transport {
                        TransportMode::InProcess => {
                            (Arc::new(InProcessTransport::new(handlers)), None)
                        }
                        TransportMode::Mailbox => {
                            let mailbox = Arc::new(MailboxTransport::new());
                            (mailbox.clone() as Arc<dyn WorkerTransport>, Some(mailbox))
                        }
                    };
                let retry = RetryPolicy {
                    attempts: cfg.orchestrator.dispatch_attempts,
                    initial_backoff: Duration::from_millis(cfg.orchestrator.dispatch_backoff_ms),
                };
                let distributed = Arc::new(DistributedOrchestrator::new(
                    store.clone(),
                    queue.clone(),
                    workers.clone(),
                    transport,
                    settings,
                    retry,
                ));
                distributed.initialize()?;
                Ok(Self {
                    orchestrator: distributed.orchestrator().clone(),
                    distributed: Some(distributed),
                    store,
                    queue,
                    workers,
                    mailbox,
                })
            }
        }
    }

    pub fn execute(
        &self,
        workflow_id: &str,
        jobs: Vec<JobConfig>,
        options: ExecuteOptions,
    ) -> Result<Execution> {
        match &self.distributed {
            Some(d) => d.execute(workflow_id, jobs, options),
            None => self.orchestrator.execute(workflow_id, jobs, options),
        }
    }

    /// Remove a worker; in distributed mode its outstanding assignments fail.
    pub fn deregister_worker(&self, worker_id: &str) -> Result<bool> {
        match &self.distributed {
            Some(d) => d.deregister_worker(worker_id),
            None => self.workers.deregister_worker(worker_id),
        }
    }

    /// Register a worker for this process when the fleet is empty, so an
    /// in-process distributed run has somewhere to dispatch. The returned task
    /// keeps its heartbeat fresh; abort it when the run ends.
    pub fn host_local_worker(
        &self,
        capacity: usize,
        keep_alive: Duration,
    ) -> Result<Option<JoinHandle<()>>> {
        if !self.workers.get_all_workers()?.is_empty() {
            return Ok(None);
        }
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let mut request = RegisterWorker::new(
            LOCAL_WORKER_ID,
            hostname,
            u32::try_from(capacity.max(1)).unwrap_or(u32::MAX),
        );
        request.pid = Some(std::process::id());
        self.workers.register_worker(request)?;
        info!(capacity, "registered in-process worker for local run");
        Ok(Some(self.workers.spawn_keep_alive(LOCAL_WORKER_ID, keep_alive)))
    }

    pub fn health(&self) -> HealthReport {
        health::check(&self.queue, &self.workers, self.store.as_ref())
    }

    pub async fn wait(&self, execution_id: Uuid) -> Result<Execution> {
        self.orchestrator.wait(execution_id).await
    }
}

/// Registry with one built-in handler per configured job type.
pub fn build_handlers(bindings: &BTreeMap<JobType, HandlerKind>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for (job_type, kind) in bindings {
        match kind {
            HandlerKind::Noop => registry.register(*job_type, Arc::new(NoopHandler)),
            HandlerKind::Command => registry.register(*job_type, Arc::new(CommandHandler)),
        };
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfigFile;

    fn config(toml_src: &str) -> ConfigFile {
        let raw: RawConfigFile = toml::from_str(toml_src).unwrap();
        ConfigFile::try_from(raw).unwrap()
    }

    #[test]
    fn handlers_follow_bindings() {
        let cfg = config("[handlers]\ntraining = \"command\"\nexport = \"noop\"\n");
        let registry = build_handlers(&cfg.handlers);
        assert_eq!(
            registry.registered_types(),
            vec![JobType::Noop, JobType::Command, JobType::Training, JobType::Export]
        );
    }

    #[test]
    fn local_mode_has_no_fleet_dispatch() {
        let app = App::from_config(&ConfigFile::default()).unwrap();
        assert!(app.distributed.is_none());
        assert!(app.mailbox.is_none());
        assert!(app.health().healthy);
    }

    #[test]
    fn distributed_mailbox_mode_is_initialized() {
        let cfg = config("[orchestrator]\nmode = \"distributed\"\ntransport = \"mailbox\"\n");
        let app = App::from_config(&cfg).unwrap();
        assert!(app.mailbox.is_some());
        assert!(app.distributed.as_ref().unwrap().is_initialized());
    }

    #[test]
    fn file_storage_uses_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&format!(
            "[storage]\nmode = \"file\"\ndir = {:?}\n",
            dir.path().display().to_string()
        ));
        let app = App::from_config(&cfg).unwrap();
        app.queue.pause().unwrap();
        assert!(dir.path().join("queue.json").exists());
    }
}
