// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::JobType;
use crate::types::{FailurePolicy, HandlerKind, OrchestratorMode, StorageMode, TransportMode};

/// Configuration as read from `Trainflow.toml`, before validation.
///
/// ```toml
/// [server]
/// bind = "127.0.0.1:8080"
///
/// [storage]
/// mode = "file"
/// dir = ".trainflow"
///
/// [workers]
/// heartbeat_interval_secs = 30
/// staleness_multiplier = 2
///
/// [orchestrator]
/// mode = "distributed"
/// transport = "mailbox"
/// default_parallelism = 4
/// failure_policy = "halt"
///
/// [handlers]
/// training = "command"
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    /// Job type name → built-in handler kind name.
    #[serde(default)]
    pub handlers: BTreeMap<String, String>,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub workers: WorkersSection,
    pub orchestrator: OrchestratorSection,
    /// Effective handler bindings: built-in defaults merged with `[handlers]`.
    pub handlers: BTreeMap<JobType, HandlerKind>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        raw: RawConfigFile,
        handlers: BTreeMap<JobType, HandlerKind>,
    ) -> Self {
        Self {
            server: raw.server,
            storage: raw.storage,
            workers: raw.workers,
            orchestrator: raw.orchestrator,
            handlers,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default(), default_handlers())
    }
}

/// Handlers bound when `[handlers]` says nothing about a type.
pub fn default_handlers() -> BTreeMap<JobType, HandlerKind> {
    BTreeMap::from([
        (JobType::Noop, HandlerKind::Noop),
        (JobType::Command, HandlerKind::Command),
    ])
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub mode: StorageMode,
    /// Root directory for `mode = "file"`.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".trainflow")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            dir: default_storage_dir(),
        }
    }
}

/// `[workers]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersSection {
    /// Interval workers are expected to push heartbeats at.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// A worker is stale after `staleness_multiplier × heartbeat_interval`
    /// without a heartbeat.
    #[serde(default = "default_staleness_multiplier")]
    pub staleness_multiplier: u32,
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_staleness_multiplier() -> u32 {
    2
}

impl WorkersSection {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            staleness_multiplier: default_staleness_multiplier(),
        }
    }
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default)]
    pub mode: OrchestratorMode,
    #[serde(default)]
    pub transport: TransportMode,
    #[serde(default = "default_parallelism")]
    pub default_parallelism: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Attempts to find a worker for a job before failing it.
    #[serde(default = "default_dispatch_attempts")]
    pub dispatch_attempts: u32,
    /// Backoff before the second attempt; doubled after each attempt.
    #[serde(default = "default_dispatch_backoff_ms")]
    pub dispatch_backoff_ms: u64,
}

fn default_parallelism() -> usize {
    4
}

fn default_dispatch_attempts() -> u32 {
    3
}

fn default_dispatch_backoff_ms() -> u64 {
    200
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            mode: OrchestratorMode::default(),
            transport: TransportMode::default(),
            default_parallelism: default_parallelism(),
            failure_policy: FailurePolicy::default(),
            dispatch_attempts: default_dispatch_attempts(),
            dispatch_backoff_ms: default_dispatch_backoff_ms(),
        }
    }
}
