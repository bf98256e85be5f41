// src/workers/registry.rs

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::errors::{OrchestratorError, Result};
use crate::fs::{
    list_json_files, probe_writable, read_json, remove_record, write_json_atomic, LockFile,
};

use super::WorkerRegistration;

/// Storage for worker records. Holds no liveness logic.
pub trait WorkerRegistry: Send + Sync + Debug {
    fn get(&self, worker_id: &str) -> Result<Option<WorkerRegistration>>;
    fn put(&self, worker: &WorkerRegistration) -> Result<()>;
    /// Returns whether a record was removed.
    fn remove(&self, worker_id: &str) -> Result<bool>;
    /// All records, ordered by worker id.
    fn list(&self) -> Result<Vec<WorkerRegistration>>;
    fn is_healthy(&self) -> bool;

    /// Run `f` with every other writer of this registry locked out, including
    /// other processes sharing the same backend.
    fn exclusive(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        f()
    }
}

#[derive(Debug)]
pub struct MemoryWorkerRegistry {
    workers: Mutex<BTreeMap<String, WorkerRegistration>>,
    available: AtomicBool,
}

impl Default for MemoryWorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn workers(&self) -> Result<MutexGuard<'_, BTreeMap<String, WorkerRegistration>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(OrchestratorError::infrastructure("worker registry unavailable"));
        }
        Ok(self.workers.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl WorkerRegistry for MemoryWorkerRegistry {
    fn get(&self, worker_id: &str) -> Result<Option<WorkerRegistration>> {
        Ok(self.workers()?.get(worker_id).cloned())
    }

    fn put(&self, worker: &WorkerRegistration) -> Result<()> {
        self.workers()?
            .insert(worker.worker_id.clone(), worker.clone());
        Ok(())
    }

    fn remove(&self, worker_id: &str) -> Result<bool> {
        Ok(self.workers()?.remove(worker_id).is_some())
    }

    fn list(&self) -> Result<Vec<WorkerRegistration>> {
        Ok(self.workers()?.values().cloned().collect())
    }

    fn is_healthy(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// One JSON file per worker under `<root>/workers/`.
///
/// Worker ids are validated by the manager to a file-name-safe alphabet
/// before they reach this type.
#[derive(Debug, Clone)]
pub struct FileWorkerRegistry {
    dir: PathBuf,
}

impl FileWorkerRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            dir: root.into().join("workers"),
        }
    }

    fn path(&self, worker_id: &str) -> PathBuf {
        self.dir.join(format!("{worker_id}.json"))
    }
}

fn infra(err: anyhow::Error) -> OrchestratorError {
    OrchestratorError::Infrastructure(format!("{err:#}"))
}

impl WorkerRegistry for FileWorkerRegistry {
    fn get(&self, worker_id: &str) -> Result<Option<WorkerRegistration>> {
        read_json(&self.path(worker_id)).map_err(infra)
    }

    fn put(&self, worker: &WorkerRegistration) -> Result<()> {
        write_json_atomic(&self.path(&worker.worker_id), worker).map_err(infra)
    }

    fn remove(&self, worker_id: &str) -> Result<bool> {
        remove_record(&self.path(worker_id)).map_err(infra)
    }

    fn list(&self) -> Result<Vec<WorkerRegistration>> {
        let mut out = Vec::new();
        for path in list_json_files(&self.dir).map_err(infra)? {
            if let Some(w) = read_json::<WorkerRegistration>(&path).map_err(infra)? {
                out.push(w);
            }
        }
        out.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(out)
    }

    fn is_healthy(&self) -> bool {
        probe_writable(&self.dir)
    }

    fn exclusive(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let mut lock = LockFile::open(&self.dir.join(".lock")).map_err(infra)?;
        let _held = lock.acquire().map_err(infra)?;
        f()
    }
}
