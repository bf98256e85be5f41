// src/store/mod.rs

//! Durable storage for executions, checkpoints and job queue state.
//!
//! - [`MemoryStateStore`] keeps everything in process memory.
//! - [`FileStateStore`] writes one JSON file per record under a root
//!   directory (`executions/<id>.json`, `checkpoints/<id>.json`,
//!   `queue.json`).
//!
//! The trait is synchronous: the orchestrator persists a snapshot while it
//! still holds the execution lock.

use std::fmt::Debug;

use uuid::Uuid;

use crate::engine::execution::{Checkpoint, Execution};
use crate::errors::Result;
use crate::queue::QueueSnapshot;

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

pub trait StateStore: Send + Sync + Debug {
    fn save_execution(&self, execution: &Execution) -> Result<()>;
    fn load_execution(&self, id: Uuid) -> Result<Option<Execution>>;
    fn list_executions(&self) -> Result<Vec<Execution>>;

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
    fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>>;
    /// Newest checkpoint (by `createdAt`) of an execution.
    fn latest_checkpoint(&self, execution_id: Uuid) -> Result<Option<Checkpoint>>;

    fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<()>;
    fn load_queue(&self) -> Result<Option<QueueSnapshot>>;

    /// Run `f` with every other queue writer locked out, including other
    /// processes sharing this store.
    fn exclusive(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        f()
    }

    /// Cheap reachability probe for health reporting.
    fn is_healthy(&self) -> bool;
}

fn newest(checkpoints: impl IntoIterator<Item = Checkpoint>) -> Option<Checkpoint> {
    checkpoints
        .into_iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at))
}
