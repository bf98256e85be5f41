// src/config/validate.rs

use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::config::model::{default_handlers, ConfigFile, RawConfigFile};
use crate::dag::JobType;
use crate::errors::{OrchestratorError, Result};
use crate::types::{HandlerKind, StorageMode};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = OrchestratorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_sections(&raw)?;
        let handlers = resolve_handlers(&raw.handlers)?;
        Ok(ConfigFile::new_unchecked(raw, handlers))
    }
}

fn config_error(msg: impl Into<String>) -> OrchestratorError {
    OrchestratorError::ConfigError(msg.into())
}

fn validate_sections(cfg: &RawConfigFile) -> Result<()> {
    cfg.server.bind.parse::<SocketAddr>().map_err(|e| {
        config_error(format!(
            "[server].bind '{}' is not a socket address: {e}",
            cfg.server.bind
        ))
    })?;

    if cfg.storage.mode == StorageMode::File && cfg.storage.dir.as_os_str().is_empty() {
        return Err(config_error("[storage].dir must be set when mode = \"file\""));
    }

    if cfg.workers.heartbeat_interval_secs == 0 {
        return Err(config_error(
            "[workers].heartbeat_interval_secs must be >= 1 (got 0)",
        ));
    }
    if cfg.workers.staleness_multiplier == 0 {
        return Err(config_error(
            "[workers].staleness_multiplier must be >= 1 (got 0)",
        ));
    }

    if cfg.orchestrator.default_parallelism == 0 {
        return Err(config_error(
            "[orchestrator].default_parallelism must be >= 1 (got 0)",
        ));
    }
    if cfg.orchestrator.dispatch_attempts == 0 {
        return Err(config_error(
            "[orchestrator].dispatch_attempts must be >= 1 (got 0)",
        ));
    }

    Ok(())
}

/// Merge `[handlers]` over the defaults, rejecting unknown job types and
/// handler kinds.
fn resolve_handlers(raw: &BTreeMap<String, String>) -> Result<BTreeMap<JobType, HandlerKind>> {
    let mut handlers = default_handlers();
    for (job_type, kind) in raw {
        let job_type: JobType = job_type
            .parse()
            .map_err(|e: String| config_error(format!("[handlers]: {e}")))?;
        let kind: HandlerKind = kind
            .parse()
            .map_err(|e: String| config_error(format!("[handlers].{job_type}: {e}")))?;
        handlers.insert(job_type, kind);
    }
    Ok(handlers)
}
