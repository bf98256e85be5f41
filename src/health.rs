// src/health.rs

//! Aggregated health of the queue, worker manager and state store.

use serde::Serialize;

use crate::queue::JobQueue;
use crate::store::StateStore;
use crate::workers::{WorkerManager, WorkerStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub queue: bool,
    pub worker_manager: bool,
    pub state_store: bool,
}

impl ComponentHealth {
    pub fn all_healthy(&self) -> bool {
        self.queue && self.worker_manager && self.state_store
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub components: ComponentHealth,
    /// Absent when the worker registry could not be read.
    pub workers: Option<WorkerStats>,
}

pub fn check(queue: &JobQueue, workers: &WorkerManager, store: &dyn StateStore) -> HealthReport {
    let stats = workers.get_worker_stats().ok();
    let components = ComponentHealth {
        queue: queue.is_healthy(),
        worker_manager: workers.is_healthy() && stats.is_some(),
        state_store: store.is_healthy(),
    };
    HealthReport {
        healthy: components.all_healthy(),
        components,
        workers: stats,
    }
}
