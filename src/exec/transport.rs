// src/exec/transport.rs

//! How a job reaches the worker it was assigned to.
//!
//! - [`InProcessTransport`] runs the registered handler in this process on
//!   behalf of the worker (single-binary deployments and tests).
//! - [`MailboxTransport`] parks each assignment in the worker's mailbox until
//!   the worker claims it and reports the result back, typically over HTTP.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dag::{JobConfig, JobType};
use crate::engine::handlers::{invoke, HandlerRegistry, JobContext};
use crate::errors::{OrchestratorError, Result};
use crate::workers::WorkerRegistration;

use super::backend::JobOutcome;

pub type OutcomeFuture<'a> = Pin<Box<dyn Future<Output = JobOutcome> + Send + 'a>>;

pub trait WorkerTransport: Send + Sync {
    fn supports(&self, job_type: JobType) -> bool;

    /// Deliver the job to `worker` and resolve with its outcome.
    fn execute(&self, worker: &WorkerRegistration, ctx: JobContext) -> OutcomeFuture<'_>;

    /// The worker left the fleet (`reason` says how); fail whatever it still
    /// owes. Returns the number of assignments failed.
    fn worker_departed(&self, _worker_id: &str, _reason: &str) -> usize {
        0
    }
}

#[derive(Debug, Clone)]
pub struct InProcessTransport {
    handlers: HandlerRegistry,
}

impl InProcessTransport {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self { handlers }
    }
}

impl WorkerTransport for InProcessTransport {
    fn supports(&self, job_type: JobType) -> bool {
        self.handlers.contains(job_type)
    }

    fn execute(&self, worker: &WorkerRegistration, ctx: JobContext) -> OutcomeFuture<'_> {
        let handler = self.handlers.get(ctx.job.job_type);
        let worker_id = worker.worker_id.clone();
        Box::pin(async move {
            match handler {
                Some(handler) => {
                    debug!(worker_id = %worker_id, job_id = %ctx.job.id, "running job in-process for worker");
                    invoke(handler, ctx).await
                }
                None => JobOutcome::Failed(format!(
                    "no handler registered for type '{}'",
                    ctx.job.job_type
                )),
            }
        })
    }
}

/// Work handed to a remote worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub assignment_id: String,
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub job: JobConfig,
    pub attempt: u32,
    pub assigned_at: DateTime<Utc>,
}

/// Result reported by a remote worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResult {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AssignmentResult {
    fn into_outcome(self) -> JobOutcome {
        if self.success {
            JobOutcome::Succeeded(self.result.unwrap_or(Value::Null))
        } else {
            JobOutcome::Failed(
                self.error
                    .unwrap_or_else(|| "worker reported failure".to_string()),
            )
        }
    }
}

#[derive(Debug)]
struct Outstanding {
    worker_id: String,
    reply: oneshot::Sender<JobOutcome>,
}

#[derive(Debug, Default)]
struct Mailboxes {
    /// Unclaimed assignments per worker, oldest first.
    queued: HashMap<String, VecDeque<Assignment>>,
    /// Every assignment not yet completed, claimed or not.
    outstanding: HashMap<String, Outstanding>,
}

#[derive(Debug, Default)]
pub struct MailboxTransport {
    inner: Mutex<Mailboxes>,
}

impl MailboxTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Mailboxes> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand the oldest unclaimed assignment to the worker.
    pub fn claim_next(&self, worker_id: &str) -> Option<Assignment> {
        let mut inner = self.lock();
        let next = inner.queued.get_mut(worker_id)?.pop_front();
        if let Some(a) = &next {
            debug!(worker_id = %worker_id, assignment_id = %a.assignment_id, job_id = %a.job.id, "assignment claimed");
        }
        next
    }

    /// Record the worker's result for an assignment.
    pub fn complete(
        &self,
        worker_id: &str,
        assignment_id: &str,
        result: AssignmentResult,
    ) -> Result<()> {
        let outstanding = {
            let mut inner = self.lock();
            match inner.outstanding.get(assignment_id) {
                Some(o) if o.worker_id == worker_id => {}
                _ => {
                    return Err(OrchestratorError::AssignmentNotFound(
                        assignment_id.to_string(),
                    ));
                }
            }
            if let Some(queue) = inner.queued.get_mut(worker_id) {
                queue.retain(|a| a.assignment_id != assignment_id);
            }
            inner.outstanding.remove(assignment_id)
        };

        if let Some(o) = outstanding {
            info!(worker_id = %worker_id, assignment_id = %assignment_id, success = result.success, "assignment completed");
            let _ = o.reply.send(result.into_outcome());
        }
        Ok(())
    }

    /// Number of assignments not yet completed.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding.len()
    }
}

impl WorkerTransport for MailboxTransport {
    /// The remote worker decides what it can run.
    fn supports(&self, _job_type: JobType) -> bool {
        true
    }

    fn execute(&self, worker: &WorkerRegistration, ctx: JobContext) -> OutcomeFuture<'_> {
        let assignment = Assignment {
            assignment_id: Uuid::new_v4().to_string(),
            execution_id: ctx.execution_id,
            workflow_id: ctx.workflow_id,
            job: ctx.job,
            attempt: ctx.attempt,
            assigned_at: Utc::now(),
        };
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.lock();
            inner.outstanding.insert(
                assignment.assignment_id.clone(),
                Outstanding {
                    worker_id: worker.worker_id.clone(),
                    reply: tx,
                },
            );
            debug!(
                worker_id = %worker.worker_id,
                assignment_id = %assignment.assignment_id,
                job_id = %assignment.job.id,
                "assignment queued in mailbox"
            );
            inner
                .queued
                .entry(worker.worker_id.clone())
                .or_default()
                .push_back(assignment);
        }

        Box::pin(async move {
            rx.await.unwrap_or_else(|_| {
                JobOutcome::Failed("assignment was dropped before completion".to_string())
            })
        })
    }

    fn worker_departed(&self, worker_id: &str, reason: &str) -> usize {
        let failed: Vec<(String, Outstanding)> = {
            let mut inner = self.lock();
            inner.queued.remove(worker_id);
            let ids: Vec<String> = inner
                .outstanding
                .iter()
                .filter(|(_, o)| o.worker_id == worker_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.outstanding.remove(&id).map(|o| (id, o)))
                .collect()
        };

        for (assignment_id, _) in &failed {
            warn!(worker_id = %worker_id, assignment_id = %assignment_id, reason, "failing assignment of departed worker");
        }
        let count = failed.len();
        for (_, o) in failed {
            let _ = o.reply.send(JobOutcome::Failed(format!(
                "worker '{worker_id}' {reason} before completing the job"
            )));
        }
        count
    }
}
