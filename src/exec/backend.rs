// src/exec/backend.rs

//! Pluggable dispatch backend.
//!
//! The orchestrator hands one execution level at a time to a
//! [`JobDispatcher`] and consumes [`JobEvent`]s from the channel it passes
//! in. This keeps the control loop independent of *where* jobs run:
//!
//! - [`LocalDispatcher`](super::LocalDispatcher) runs handlers in-process.
//! - [`WorkerDispatcher`](super::WorkerDispatcher) routes jobs through the
//!   job queue to workers picked by the worker manager.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dag::{JobConfig, JobId, JobType};

/// Terminal result of one job attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(Value),
    Failed(String),
}

/// Progress reported by a dispatcher for the level it is running.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The job was handed to a handler or worker.
    Started {
        job_id: JobId,
        worker_id: Option<String>,
        attempt: u32,
    },
    /// The job reached a terminal outcome. May arrive without a preceding
    /// `Started` when dispatch itself failed.
    Finished { job_id: JobId, outcome: JobOutcome },
}

/// Open while new jobs may be started. Closing it stops further dispatch
/// but never interrupts jobs that already started.
#[derive(Debug, Clone)]
pub struct DispatchGate(Arc<AtomicBool>);

impl Default for DispatchGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchGate {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub job: JobConfig,
    /// Attempt number this dispatch represents.
    pub attempt: u32,
}

/// One level's worth of ready jobs.
#[derive(Debug)]
pub struct LevelDispatch {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub level: usize,
    pub jobs: Vec<ScheduledJob>,
    pub parallelism: usize,
    pub events: mpsc::Sender<JobEvent>,
    pub gate: DispatchGate,
}

pub type DispatchFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

pub trait JobDispatcher: Send + Sync {
    /// Whether jobs of this type can be run at all.
    fn supports(&self, job_type: JobType) -> bool;

    /// Run the level. Resolves once every started job has finished and
    /// reported `Finished`. Jobs not started because the gate closed produce
    /// no events.
    fn dispatch_level(&self, dispatch: LevelDispatch) -> DispatchFuture<'_>;
}
