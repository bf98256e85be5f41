// src/store/memory.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::engine::execution::{Checkpoint, Execution};
use crate::errors::{OrchestratorError, Result};
use crate::queue::QueueSnapshot;

use super::{newest, StateStore};

#[derive(Debug, Default)]
struct Records {
    executions: HashMap<Uuid, Execution>,
    checkpoints: HashMap<String, Checkpoint>,
    queue: Option<QueueSnapshot>,
}

/// In-memory store. State is lost when the process exits.
#[derive(Debug)]
pub struct MemoryStateStore {
    records: Mutex<Records>,
    available: AtomicBool,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Records::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing store going away (or coming back). While
    /// unavailable every operation fails with an infrastructure error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn records(&self) -> Result<MutexGuard<'_, Records>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(OrchestratorError::infrastructure("state store unavailable"));
        }
        Ok(self.records.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl StateStore for MemoryStateStore {
    fn save_execution(&self, execution: &Execution) -> Result<()> {
        self.records()?
            .executions
            .insert(execution.id, execution.clone());
        Ok(())
    }

    fn load_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        Ok(self.records()?.executions.get(&id).cloned())
    }

    fn list_executions(&self) -> Result<Vec<Execution>> {
        let mut all: Vec<Execution> = self.records()?.executions.values().cloned().collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(all)
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.records()?
            .checkpoints
            .insert(checkpoint.checkpoint_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.records()?.checkpoints.get(checkpoint_id).cloned())
    }

    fn latest_checkpoint(&self, execution_id: Uuid) -> Result<Option<Checkpoint>> {
        let records = self.records()?;
        Ok(newest(
            records
                .checkpoints
                .values()
                .filter(|cp| cp.execution_id == execution_id)
                .cloned(),
        ))
    }

    fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<()> {
        self.records()?.queue = Some(snapshot.clone());
        Ok(())
    }

    fn load_queue(&self) -> Result<Option<QueueSnapshot>> {
        Ok(self.records()?.queue.clone())
    }

    fn is_healthy(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{JobConfig, JobType};
    use crate::engine::execution::ExecutionOptions;

    #[test]
    fn unavailable_store_fails_fast_and_reports_unhealthy() {
        let store = MemoryStateStore::new();
        let exec = Execution::new("wf", vec![JobConfig::new("A", JobType::Noop)], ExecutionOptions::default());
        store.save_execution(&exec).unwrap();

        store.set_available(false);
        assert!(!store.is_healthy());
        assert!(matches!(
            store.load_execution(exec.id),
            Err(OrchestratorError::Infrastructure(_))
        ));

        store.set_available(true);
        assert_eq!(store.load_execution(exec.id).unwrap(), Some(exec));
    }
}
