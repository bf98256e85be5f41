// src/store/file.rs

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::engine::execution::{Checkpoint, Execution};
use crate::errors::{OrchestratorError, Result};
use crate::fs::{list_json_files, probe_writable, read_json, write_json_atomic, LockFile};
use crate::queue::QueueSnapshot;

use super::{newest, StateStore};

/// One JSON file per record under `root`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn executions_dir(&self) -> PathBuf {
        self.root.join("executions")
    }

    fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    fn execution_path(&self, id: Uuid) -> PathBuf {
        self.executions_dir().join(format!("{id}.json"))
    }

    fn checkpoint_path(&self, checkpoint_id: &str) -> Result<PathBuf> {
        // Ids become file names; refuse anything that could escape the dir.
        if checkpoint_id.is_empty()
            || !checkpoint_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(OrchestratorError::CheckpointNotFound(checkpoint_id.to_string()));
        }
        Ok(self.checkpoints_dir().join(format!("{checkpoint_id}.json")))
    }

    fn queue_path(&self) -> PathBuf {
        self.root.join("queue.json")
    }

    fn load_all_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let mut out = Vec::new();
        for path in list_json_files(&self.checkpoints_dir()).map_err(infra)? {
            match read_json::<Checkpoint>(&path) {
                Ok(Some(cp)) => out.push(cp),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable checkpoint"),
            }
        }
        Ok(out)
    }
}

fn infra(err: anyhow::Error) -> OrchestratorError {
    OrchestratorError::Infrastructure(format!("{err:#}"))
}

impl StateStore for FileStateStore {
    fn save_execution(&self, execution: &Execution) -> Result<()> {
        write_json_atomic(&self.execution_path(execution.id), execution).map_err(infra)
    }

    fn load_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        read_json(&self.execution_path(id)).map_err(infra)
    }

    fn list_executions(&self) -> Result<Vec<Execution>> {
        let mut all = Vec::new();
        for path in list_json_files(&self.executions_dir()).map_err(infra)? {
            if let Some(exec) = read_json::<Execution>(&path).map_err(infra)? {
                all.push(exec);
            }
        }
        all.sort_by(|a: &Execution, b: &Execution| a.started_at.cmp(&b.started_at));
        Ok(all)
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.checkpoint_path(&checkpoint.checkpoint_id)?;
        write_json_atomic(&path, checkpoint).map_err(infra)
    }

    fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let path = match self.checkpoint_path(checkpoint_id) {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };
        read_json(&path).map_err(infra)
    }

    fn latest_checkpoint(&self, execution_id: Uuid) -> Result<Option<Checkpoint>> {
        Ok(newest(
            self.load_all_checkpoints()?
                .into_iter()
                .filter(|cp| cp.execution_id == execution_id),
        ))
    }

    fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<()> {
        write_json_atomic(&self.queue_path(), snapshot).map_err(infra)
    }

    fn load_queue(&self) -> Result<Option<QueueSnapshot>> {
        read_json(&self.queue_path()).map_err(infra)
    }

    fn exclusive(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let mut lock = LockFile::open(&self.root.join("queue.lock")).map_err(infra)?;
        let _held = lock.acquire().map_err(infra)?;
        f()
    }

    fn is_healthy(&self) -> bool {
        probe_writable(&self.root)
    }
}
