// src/workers/mod.rs

//! Worker fleet bookkeeping.
//!
//! - [`registry`] stores [`WorkerRegistration`] records (memory or files).
//! - [`manager`] applies registration, heartbeat, liveness and selection
//!   rules on top of a registry.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod manager;
pub mod registry;

pub use manager::{RegisterWorker, WorkerManager, WorkerStats};
pub use registry::{FileWorkerRegistry, MemoryWorkerRegistry, WorkerRegistry};

pub type WorkerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Unhealthy,
    Offline,
}

impl WorkerStatus {
    /// Status implied by load alone. `Offline` is derived from heartbeat age
    /// and never stored.
    pub fn from_load(current_load: u32, max_concurrency: u32) -> Self {
        if current_load == 0 {
            WorkerStatus::Idle
        } else if current_load <= max_concurrency {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Unhealthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRegistration {
    pub worker_id: WorkerId,
    pub hostname: String,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub max_concurrency: u32,
    #[serde(default)]
    pub current_load: u32,
    pub status: WorkerStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerRegistration {
    /// Fraction of capacity in use; `1.0` for a zero-capacity record.
    pub fn load_ratio(&self) -> f64 {
        if self.max_concurrency == 0 {
            return 1.0;
        }
        self.current_load as f64 / self.max_concurrency as f64
    }

    pub fn has_capability(&self, capability: Option<&str>) -> bool {
        capability.is_none_or(|c| self.capabilities.contains(c))
    }

    pub(crate) fn recompute_status(&mut self) {
        self.status = WorkerStatus::from_load(self.current_load, self.max_concurrency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_load_thresholds() {
        assert_eq!(WorkerStatus::from_load(0, 2), WorkerStatus::Idle);
        assert_eq!(WorkerStatus::from_load(1, 2), WorkerStatus::Busy);
        assert_eq!(WorkerStatus::from_load(2, 2), WorkerStatus::Busy);
        assert_eq!(WorkerStatus::from_load(3, 2), WorkerStatus::Unhealthy);
    }
}
