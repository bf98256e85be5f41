// src/workers/manager.rs

//! Registration, heartbeat liveness and worker selection.
//!
//! The manager never polls workers. A worker is *stale* once
//! `now - last_heartbeat` exceeds the staleness threshold; stale workers are
//! reported `offline` and excluded from selection but kept until they are
//! explicitly deregistered.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::errors::{OrchestratorError, Result};

use super::registry::WorkerRegistry;
use super::{WorkerRegistration, WorkerStatus};

const MAX_WORKER_ID_LEN: usize = 128;
const MAX_CAPABILITIES: usize = 32;
const MAX_CAPABILITY_LEN: usize = 64;

/// Registration request as sent by a worker.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWorker {
    pub worker_id: String,
    pub hostname: String,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub max_concurrency: u32,
    #[serde(default)]
    pub current_load: u32,
}

impl RegisterWorker {
    pub fn new(worker_id: impl Into<String>, hostname: impl Into<String>, max_concurrency: u32) -> Self {
        Self {
            worker_id: worker_id.into(),
            hostname: hostname.into(),
            max_concurrency,
            ..Default::default()
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub total: usize,
    /// Workers that are not stale.
    pub active: usize,
    pub idle: usize,
    pub busy: usize,
    pub unhealthy: usize,
    pub offline: usize,
    /// `sum(load) / sum(max) * 100` over active workers.
    pub utilization_percent: f64,
}

#[derive(Debug)]
pub struct WorkerManager {
    registry: Arc<dyn WorkerRegistry>,
    clock: Arc<dyn Clock>,
    staleness: chrono::TimeDelta,
    /// Serializes this process's read-modify-write sequences; the registry's
    /// own lock covers other processes.
    write_lock: Mutex<()>,
}

impl WorkerManager {
    pub fn new(registry: Arc<dyn WorkerRegistry>, clock: Arc<dyn Clock>, staleness: Duration) -> Self {
        let staleness = chrono::TimeDelta::from_std(staleness).unwrap_or(chrono::TimeDelta::MAX);
        Self {
            registry,
            clock,
            staleness,
            write_lock: Mutex::new(()),
        }
    }

    /// Staleness threshold of `multiplier × heartbeat_interval`.
    pub fn with_heartbeat(
        registry: Arc<dyn WorkerRegistry>,
        clock: Arc<dyn Clock>,
        heartbeat_interval: Duration,
        multiplier: u32,
    ) -> Self {
        Self::new(registry, clock, heartbeat_interval.saturating_mul(multiplier))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a read-modify-write sequence with every other writer locked out.
    fn atomically<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.guard();
        let mut f = Some(f);
        let mut out = None;
        self.registry.exclusive(&mut || -> Result<()> {
            if let Some(f) = f.take() {
                out = Some(f()?);
            }
            Ok(())
        })?;
        out.ok_or_else(|| OrchestratorError::infrastructure("worker registry skipped a locked update"))
    }

    pub fn is_stale(&self, worker: &WorkerRegistration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(worker.last_heartbeat) > self.staleness
    }

    /// Report stale workers as `offline`.
    fn effective(&self, mut worker: WorkerRegistration, now: DateTime<Utc>) -> WorkerRegistration {
        if self.is_stale(&worker, now) {
            worker.status = WorkerStatus::Offline;
        }
        worker
    }

    /// Insert or overwrite a worker record. `registeredAt` survives
    /// re-registration.
    pub fn register_worker(&self, request: RegisterWorker) -> Result<WorkerRegistration> {
        validate_registration(&request)?;

        let worker = self.atomically(|| {
            let now = self.clock.now();
            let registered_at = self
                .registry
                .get(&request.worker_id)?
                .map(|existing| existing.registered_at)
                .unwrap_or(now);

            let mut worker = WorkerRegistration {
                worker_id: request.worker_id,
                hostname: request.hostname,
                pid: request.pid.unwrap_or(0),
                capabilities: request.capabilities.into_iter().collect::<BTreeSet<_>>(),
                max_concurrency: request.max_concurrency,
                current_load: request.current_load,
                status: WorkerStatus::Idle,
                registered_at,
                last_heartbeat: now,
            };
            worker.recompute_status();
            self.registry.put(&worker)?;
            Ok(worker)
        })?;

        info!(
            worker_id = %worker.worker_id,
            hostname = %worker.hostname,
            max_concurrency = worker.max_concurrency,
            capabilities = ?worker.capabilities,
            "worker registered"
        );
        Ok(worker)
    }

    /// Remove a worker. Idempotent; returns whether a record existed.
    pub fn deregister_worker(&self, worker_id: &str) -> Result<bool> {
        let removed = self.atomically(|| self.registry.remove(worker_id))?;
        if removed {
            info!(worker_id = %worker_id, "worker deregistered");
        } else {
            debug!(worker_id = %worker_id, "deregister for unknown worker ignored");
        }
        Ok(removed)
    }

    /// Record a heartbeat. Unknown workers are an error; no record is created.
    pub fn heartbeat(&self, worker_id: &str, current_load: u32) -> Result<WorkerRegistration> {
        let worker = self.atomically(|| {
            let mut worker = self
                .registry
                .get(worker_id)?
                .ok_or_else(|| OrchestratorError::WorkerNotFound(worker_id.to_string()))?;
            worker.last_heartbeat = self.clock.now();
            worker.current_load = current_load;
            worker.recompute_status();
            self.registry.put(&worker)?;
            Ok(worker)
        })?;

        if worker.status == WorkerStatus::Unhealthy {
            warn!(
                worker_id = %worker_id,
                current_load,
                max_concurrency = worker.max_concurrency,
                "worker reports load above capacity"
            );
        } else {
            debug!(worker_id = %worker_id, current_load, "heartbeat");
        }
        Ok(worker)
    }

    /// Refresh `last_heartbeat` and keep the tracked load. For workers this
    /// process hosts itself, whose load moves through claim and release.
    pub fn touch(&self, worker_id: &str) -> Result<WorkerRegistration> {
        self.atomically(|| {
            let mut worker = self
                .registry
                .get(worker_id)?
                .ok_or_else(|| OrchestratorError::WorkerNotFound(worker_id.to_string()))?;
            worker.last_heartbeat = self.clock.now();
            self.registry.put(&worker)?;
            Ok(worker)
        })
    }

    /// Touch `worker_id` every `every` until it is deregistered or the
    /// returned task is aborted.
    pub fn spawn_keep_alive(self: &Arc<Self>, worker_id: &str, every: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let worker_id = worker_id.to_string();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                match manager.touch(&worker_id) {
                    Ok(_) => debug!(worker_id = %worker_id, "keep-alive heartbeat"),
                    Err(OrchestratorError::WorkerNotFound(_)) => {
                        info!(worker_id = %worker_id, "hosted worker gone; keep-alive stopped");
                        return;
                    }
                    Err(err) => warn!(worker_id = %worker_id, error = %err, "keep-alive heartbeat failed"),
                }
            }
        })
    }

    pub fn get_worker(&self, worker_id: &str) -> Result<Option<WorkerRegistration>> {
        let now = self.clock.now();
        Ok(self
            .registry
            .get(worker_id)?
            .map(|w| self.effective(w, now)))
    }

    /// Every registered worker, stale ones reported `offline`.
    pub fn get_all_workers(&self) -> Result<Vec<WorkerRegistration>> {
        let now = self.clock.now();
        Ok(self
            .registry
            .list()?
            .into_iter()
            .map(|w| self.effective(w, now))
            .collect())
    }

    pub fn get_worker_stats(&self) -> Result<WorkerStats> {
        let workers = self.get_all_workers()?;
        let mut stats = WorkerStats {
            total: workers.len(),
            active: 0,
            idle: 0,
            busy: 0,
            unhealthy: 0,
            offline: 0,
            utilization_percent: 0.0,
        };

        let (mut load, mut capacity) = (0u64, 0u64);
        for w in &workers {
            match w.status {
                WorkerStatus::Offline => {
                    stats.offline += 1;
                    continue;
                }
                WorkerStatus::Idle => stats.idle += 1,
                WorkerStatus::Busy => stats.busy += 1,
                WorkerStatus::Unhealthy => stats.unhealthy += 1,
            }
            stats.active += 1;
            load += u64::from(w.current_load);
            capacity += u64::from(w.max_concurrency);
        }

        if capacity > 0 {
            stats.utilization_percent = load as f64 / capacity as f64 * 100.0;
        }
        Ok(stats)
    }

    pub fn is_healthy(&self) -> bool {
        self.registry.is_healthy()
    }

    /// Workers that may receive a job needing `capability`, best first:
    /// idle before busy, then lowest load ratio, then worker id.
    pub fn eligible_workers(&self, capability: Option<&str>) -> Result<Vec<WorkerRegistration>> {
        let mut eligible: Vec<WorkerRegistration> = self
            .get_all_workers()?
            .into_iter()
            .filter(|w| matches!(w.status, WorkerStatus::Idle | WorkerStatus::Busy))
            .filter(|w| w.current_load < w.max_concurrency)
            .filter(|w| w.has_capability(capability))
            .collect();

        eligible.sort_by(|a, b| {
            let a_idle = a.status != WorkerStatus::Idle;
            let b_idle = b.status != WorkerStatus::Idle;
            a_idle
                .cmp(&b_idle)
                .then(a.load_ratio().total_cmp(&b.load_ratio()))
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        });
        Ok(eligible)
    }

    /// Pick the best eligible worker and reserve one slot on it.
    pub fn claim_worker(&self, capability: Option<&str>) -> Result<WorkerRegistration> {
        let worker = self.atomically(|| {
            let mut worker = self
                .eligible_workers(capability)?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    OrchestratorError::Dispatch(match capability {
                        Some(c) => format!("no eligible worker with capability '{c}'"),
                        None => "no eligible worker".to_string(),
                    })
                })?;
            worker.current_load += 1;
            worker.recompute_status();
            self.registry.put(&worker)?;
            Ok(worker)
        })?;
        debug!(worker_id = %worker.worker_id, load = worker.current_load, "reserved worker slot");
        Ok(worker)
    }

    /// Add one unit of load to a worker between heartbeats.
    pub fn reserve(&self, worker_id: &str) -> Result<WorkerRegistration> {
        self.adjust_load(worker_id, |load| load.saturating_add(1))
    }

    /// Give back a slot taken by [`claim_worker`](Self::claim_worker) or
    /// [`reserve`](Self::reserve). A worker that deregistered meanwhile is
    /// not an error.
    pub fn release(&self, worker_id: &str) -> Result<()> {
        match self.adjust_load(worker_id, |load| load.saturating_sub(1)) {
            Ok(_) | Err(OrchestratorError::WorkerNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn adjust_load(&self, worker_id: &str, f: impl FnOnce(u32) -> u32) -> Result<WorkerRegistration> {
        self.atomically(|| {
            let mut worker = self
                .registry
                .get(worker_id)?
                .ok_or_else(|| OrchestratorError::WorkerNotFound(worker_id.to_string()))?;
            worker.current_load = f(worker.current_load);
            worker.recompute_status();
            self.registry.put(&worker)?;
            Ok(worker)
        })
    }
}

fn invalid(msg: impl Into<String>) -> OrchestratorError {
    OrchestratorError::InvalidRequest(msg.into())
}

fn validate_registration(req: &RegisterWorker) -> Result<()> {
    let id = req.worker_id.as_str();
    if id.is_empty() {
        return Err(invalid("workerId must not be empty"));
    }
    if id.len() > MAX_WORKER_ID_LEN {
        return Err(invalid(format!(
            "workerId must not exceed {MAX_WORKER_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(invalid(
            "workerId may only contain alphanumeric, hyphen, underscore, or dot characters",
        ));
    }
    if id.starts_with('.') {
        return Err(invalid("workerId must not start with a dot"));
    }
    if req.hostname.trim().is_empty() {
        return Err(invalid("hostname must not be empty"));
    }
    if req.max_concurrency == 0 {
        return Err(invalid("maxConcurrency must be >= 1"));
    }
    if req.capabilities.len() > MAX_CAPABILITIES {
        return Err(invalid(format!(
            "a worker may have at most {MAX_CAPABILITIES} capabilities"
        )));
    }
    for (i, cap) in req.capabilities.iter().enumerate() {
        if cap.is_empty() || cap.len() > MAX_CAPABILITY_LEN {
            return Err(invalid(format!(
                "capability at index {i} must be 1..={MAX_CAPABILITY_LEN} characters"
            )));
        }
    }
    Ok(())
}
