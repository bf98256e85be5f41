// src/engine/handlers.rs

//! Typed job handler registry.
//!
//! A [`JobHandler`] performs the work of one job type. Handlers are looked up
//! by [`JobType`] and registered once at startup; the orchestrator refuses to
//! start a graph that contains a type with no registered handler.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use crate::dag::{JobConfig, JobType};
use crate::exec::JobOutcome;

/// Error reported by a handler. Recorded on the job state; never aborts the
/// orchestrator loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Everything a handler gets to know about the job it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub job: JobConfig,
    /// 1-based attempt counter for this job within the execution lineage.
    pub attempt: u32,
    /// Worker the job was assigned to, when dispatched through the fleet.
    pub worker_id: Option<String>,
}

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'a>>;

pub trait JobHandler: Send + Sync {
    fn execute(&self, ctx: JobContext) -> HandlerFuture<'_>;
}

/// Completes immediately with `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl JobHandler for NoopHandler {
    fn execute(&self, ctx: JobContext) -> HandlerFuture<'_> {
        Box::pin(async move {
            debug!(job_id = %ctx.job.id, "noop handler");
            Ok(Value::Null)
        })
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("types", &types)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a type.
    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(job_type, handler);
        self
    }

    pub fn with(mut self, job_type: JobType, handler: impl JobHandler + 'static) -> Self {
        self.register(job_type, Arc::new(handler));
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }
}

/// Run a handler on its own task so a panic is reported as a failed job
/// instead of unwinding through the caller.
pub async fn invoke(handler: Arc<dyn JobHandler>, ctx: JobContext) -> JobOutcome {
    let job_id = ctx.job.id.clone();
    let execution_id = ctx.execution_id;

    let joined = tokio::spawn(async move { handler.execute(ctx).await }).await;

    match joined {
        Ok(Ok(value)) => JobOutcome::Succeeded(value),
        Ok(Err(err)) => JobOutcome::Failed(err.to_string()),
        Err(join_err) => {
            let msg = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                "handler task was cancelled".to_string()
            };
            error!(execution_id = %execution_id, job_id = %job_id, error = %msg, "handler panicked");
            JobOutcome::Failed(HandlerError::Panicked(msg).to_string())
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
