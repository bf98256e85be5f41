use std::sync::Arc;

use trainflow::config::{ConfigFile, RawConfigFile};
use trainflow::dag::{JobConfig, JobType};
use trainflow::engine::{DagOrchestrator, HandlerRegistry, OrchestratorSettings};
use trainflow::exec::LocalDispatcher;
use trainflow::store::MemoryStateStore;
use trainflow::types::{FailurePolicy, OrchestratorMode, StorageMode, TransportMode};

use crate::handlers::ScriptedHandler;

/// A `training` job depending on `deps`.
pub fn job(id: &str, deps: &[&str]) -> JobConfig {
    job_of(id, JobType::Training, deps)
}

pub fn job_of(id: &str, job_type: JobType, deps: &[&str]) -> JobConfig {
    deps.iter()
        .fold(JobConfig::new(id, job_type), |job, dep| job.after(*dep))
}

/// Registry with `handler` bound to every job type.
pub fn scripted_registry(handler: &ScriptedHandler) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for job_type in JobType::ALL {
        registry.register(job_type, Arc::new(handler.clone()));
    }
    registry
}

/// In-memory, local-dispatch orchestrator running `handler` for every type.
pub fn local_orchestrator(
    handler: &ScriptedHandler,
    failure_policy: FailurePolicy,
) -> (DagOrchestrator, Arc<MemoryStateStore>) {
    let store = Arc::new(MemoryStateStore::new());
    let orchestrator = DagOrchestrator::new(
        store.clone(),
        Arc::new(LocalDispatcher::new(scripted_registry(handler))),
        OrchestratorSettings {
            default_parallelism: 4,
            failure_policy,
        },
    );
    (orchestrator, store)
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn distributed(mut self, transport: TransportMode) -> Self {
        self.config.orchestrator.mode = OrchestratorMode::Distributed;
        self.config.orchestrator.transport = transport;
        self
    }

    pub fn with_file_storage(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.storage.mode = StorageMode::File;
        self.config.storage.dir = dir.into();
        self
    }

    pub fn with_handler(mut self, job_type: &str, kind: &str) -> Self {
        self.config
            .handlers
            .insert(job_type.to_string(), kind.to_string());
        self
    }

    pub fn with_dispatch_retry(mut self, attempts: u32, backoff_ms: u64) -> Self {
        self.config.orchestrator.dispatch_attempts = attempts;
        self.config.orchestrator.dispatch_backoff_ms = backoff_ms;
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
