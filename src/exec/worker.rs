// src/exec/worker.rs

//! Fleet-aware dispatch: ready jobs go through the [`JobQueue`] and each
//! delivery is bound to a worker chosen by the [`WorkerManager`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dag::JobType;
use crate::engine::handlers::JobContext;
use crate::errors::{OrchestratorError, Result};
use crate::queue::{JobQueue, QueuedJob};
use crate::workers::{WorkerManager, WorkerRegistration, WorkerStatus};

use super::backend::{
    DispatchFuture, DispatchGate, JobDispatcher, JobEvent, JobOutcome, LevelDispatch,
};
use super::transport::{OutcomeFuture, WorkerTransport};

/// How often a consumer re-checks the dispatch gate while the queue is paused.
const PAUSED_POLL: Duration = Duration::from_millis(100);

/// How often the worker holding a job is checked for staleness.
const LIVENESS_CHECK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts to find a worker before the job is failed.
    pub attempts: u32,
    /// Delay before the second attempt; doubled each time.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Clone)]
pub struct WorkerDispatcher {
    queue: Arc<JobQueue>,
    workers: Arc<WorkerManager>,
    transport: Arc<dyn WorkerTransport>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for WorkerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDispatcher")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl WorkerDispatcher {
    pub fn new(
        queue: Arc<JobQueue>,
        workers: Arc<WorkerManager>,
        transport: Arc<dyn WorkerTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            workers,
            transport,
            retry,
        }
    }

    /// Concurrency for one level: `min(parallelism, eligible workers)`, at
    /// least one so dispatch retries still apply to an empty fleet.
    fn slots(&self, parallelism: usize) -> usize {
        let eligible = match self.workers.eligible_workers(None) {
            Ok(w) => w.len(),
            Err(err) => {
                warn!(error = %err, "could not list eligible workers");
                0
            }
        };
        parallelism.min(eligible).max(1)
    }
}

impl JobDispatcher for WorkerDispatcher {
    fn supports(&self, job_type: JobType) -> bool {
        self.transport.supports(job_type)
    }

    fn dispatch_level(&self, dispatch: LevelDispatch) -> DispatchFuture<'_> {
        Box::pin(async move {
            let LevelDispatch {
                execution_id,
                workflow_id,
                level,
                jobs,
                parallelism,
                events,
                gate,
            } = dispatch;

            for scheduled in jobs {
                let job_id = scheduled.job.id.clone();
                if let Err(err) =
                    self.queue
                        .enqueue(execution_id, &workflow_id, scheduled.job, scheduled.attempt)
                {
                    warn!(execution_id = %execution_id, job_id = %job_id, error = %err, "enqueue failed");
                    let _ = events
                        .send(JobEvent::Finished {
                            job_id,
                            outcome: JobOutcome::Failed(err.to_string()),
                        })
                        .await;
                }
            }

            let slots = self.slots(parallelism);
            debug!(execution_id = %execution_id, level, slots, "dispatching level to workers");

            let mut consumers = JoinSet::new();
            for _ in 0..slots {
                let this = self.clone();
                let events = events.clone();
                let gate = gate.clone();
                consumers.spawn(async move {
                    while let Some(entry) = this.next_delivery(execution_id, &gate).await {
                        let job_id = entry.job.id.clone();
                        let outcome = this.run_delivery(&entry, &gate, &events).await;
                        if let Some(outcome) = outcome {
                            let _ = events.send(JobEvent::Finished { job_id, outcome }).await;
                        }
                    }
                });
            }
            while consumers.join_next().await.is_some() {}

            // Anything still queued was never started because the gate closed.
            match self.queue.withdraw(execution_id) {
                Ok(0) => {}
                Ok(n) => info!(execution_id = %execution_id, withdrawn = n, "withdrew undispatched jobs"),
                Err(err) => warn!(execution_id = %execution_id, error = %err, "withdraw failed"),
            }
        })
    }
}

impl WorkerDispatcher {
    /// Next queued job of this execution, waiting while the queue is paused.
    /// `None` once the gate is closed or nothing is left.
    async fn next_delivery(&self, execution_id: Uuid, gate: &DispatchGate) -> Option<QueuedJob> {
        loop {
            if !gate.is_open() {
                return None;
            }
            if self.queue.is_paused() {
                let _ = tokio::time::timeout(PAUSED_POLL, self.queue.wait_until_resumed()).await;
                continue;
            }
            match self.queue.dequeue_for(execution_id) {
                Ok(next) => return next,
                Err(err) => {
                    warn!(execution_id = %execution_id, error = %err, "dequeue failed");
                    return None;
                }
            }
        }
    }

    /// Bind the delivery to a worker, run it and settle the queue entry.
    ///
    /// Returns `None` if the gate closed before a worker was bound; the entry
    /// is then returned to the queue and later withdrawn.
    async fn run_delivery(
        &self,
        entry: &QueuedJob,
        gate: &DispatchGate,
        events: &tokio::sync::mpsc::Sender<JobEvent>,
    ) -> Option<JobOutcome> {
        let worker = match self.claim_with_retry(entry, gate).await {
            Ok(Some(worker)) => worker,
            Ok(None) => {
                let _ = self.queue.requeue(entry.execution_id, entry.job_id());
                return None;
            }
            Err(err) => {
                let _ = self.queue.ack(entry.execution_id, entry.job_id());
                return Some(JobOutcome::Failed(err.to_string()));
            }
        };

        let _ = events
            .send(JobEvent::Started {
                job_id: entry.job.id.clone(),
                worker_id: Some(worker.worker_id.clone()),
                attempt: entry.attempt,
            })
            .await;

        info!(
            execution_id = %entry.execution_id,
            job_id = %entry.job.id,
            worker_id = %worker.worker_id,
            attempt = entry.attempt,
            "job assigned to worker"
        );

        let ctx = JobContext {
            execution_id: entry.execution_id,
            workflow_id: entry.workflow_id.clone(),
            job: entry.job.clone(),
            attempt: entry.attempt,
            worker_id: Some(worker.worker_id.clone()),
        };
        let outcome = self
            .await_outcome(&worker.worker_id, self.transport.execute(&worker, ctx))
            .await;

        if let Err(err) = self.workers.release(&worker.worker_id) {
            warn!(worker_id = %worker.worker_id, error = %err, "releasing worker slot failed");
        }
        if let Err(err) = self.queue.ack(entry.execution_id, entry.job_id()) {
            warn!(job_id = %entry.job.id, error = %err, "ack failed");
        }
        Some(outcome)
    }

    /// Wait for the job's outcome. If the worker stops heartbeating or leaves
    /// the registry meanwhile, the transport fails what it owes so the wait
    /// still ends.
    async fn await_outcome(&self, worker_id: &str, mut outcome: OutcomeFuture<'_>) -> JobOutcome {
        let mut checks = tokio::time::interval(LIVENESS_CHECK);
        checks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        checks.tick().await;
        let mut departed = false;
        loop {
            tokio::select! {
                done = &mut outcome => return done,
                _ = checks.tick(), if !departed => {
                    if let Some(reason) = self.worker_lost(worker_id) {
                        let failed = self.transport.worker_departed(worker_id, reason);
                        warn!(worker_id = %worker_id, failed, reason, "worker lost while holding a job");
                        departed = true;
                    }
                }
            }
        }
    }

    fn worker_lost(&self, worker_id: &str) -> Option<&'static str> {
        match self.workers.get_worker(worker_id) {
            Ok(Some(w)) if w.status == WorkerStatus::Offline => Some("stopped heartbeating"),
            Ok(Some(_)) => None,
            Ok(None) => Some("deregistered"),
            Err(err) => {
                debug!(worker_id = %worker_id, error = %err, "liveness check skipped");
                None
            }
        }
    }

    /// Claim a worker, retrying retryable errors with exponential backoff.
    /// `Ok(None)` means the gate closed while retrying.
    async fn claim_with_retry(
        &self,
        entry: &QueuedJob,
        gate: &DispatchGate,
    ) -> Result<Option<WorkerRegistration>> {
        let attempts = self.retry.attempts.max(1);
        let mut delay = self.retry.initial_backoff;
        let capability = entry.job.capability.as_deref();

        for attempt in 1..=attempts {
            if !gate.is_open() {
                return Ok(None);
            }
            match self.workers.claim_worker(capability) {
                Ok(worker) => return Ok(Some(worker)),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(
                        job_id = %entry.job.id,
                        attempt,
                        max_attempts = attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "no worker available; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(err) => {
                    return Err(OrchestratorError::Dispatch(format!(
                        "dispatch failed after {attempt} attempt(s): {err}"
                    )));
                }
            }
        }
        Err(OrchestratorError::Dispatch("dispatch attempts exhausted".to_string()))
    }
}
