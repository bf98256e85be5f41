// src/exec/local.rs

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dag::JobType;
use crate::engine::handlers::{invoke, HandlerRegistry, JobContext};

use super::backend::{DispatchFuture, JobDispatcher, JobEvent, JobOutcome, LevelDispatch};

/// Runs handlers in this process, at most `parallelism` at a time.
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    handlers: HandlerRegistry,
}

impl LocalDispatcher {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self { handlers }
    }
}

impl JobDispatcher for LocalDispatcher {
    fn supports(&self, job_type: JobType) -> bool {
        self.handlers.contains(job_type)
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

            debug!(execution_id = %execution_id, level, jobs = jobs.len(), parallelism, "dispatching level locally");

            let permits = Arc::new(Semaphore::new(parallelism.max(1)));
            let mut running = JoinSet::new();

            for scheduled in jobs {
                // Wait for a slot first so a gate closed meanwhile is seen.
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                if !gate.is_open() {
                    info!(execution_id = %execution_id, level, "dispatch gate closed; not starting further jobs");
                    break;
                }

                let job_id = scheduled.job.id.clone();
                let Some(handler) = self.handlers.get(scheduled.job.job_type) else {
                    warn!(job_id = %job_id, job_type = %scheduled.job.job_type, "no handler registered");
                    let _ = events
                        .send(JobEvent::Finished {
                            job_id,
                            outcome: JobOutcome::Failed(format!(
                                "no handler registered for type '{}'",
                                scheduled.job.job_type
                            )),
                        })
                        .await;
                    continue;
                };

                let _ = events
                    .send(JobEvent::Started {
                        job_id: job_id.clone(),
                        worker_id: None,
                        attempt: scheduled.attempt,
                    })
                    .await;

                let ctx = JobContext {
                    execution_id,
                    workflow_id: workflow_id.clone(),
                    job: scheduled.job,
                    attempt: scheduled.attempt,
                    worker_id: None,
                };
                let events = events.clone();
                running.spawn(async move {
                    let outcome = invoke(handler, ctx).await;
                    let _ = events.send(JobEvent::Finished { job_id, outcome }).await;
                    drop(permit);
                });
            }

            while running.join_next().await.is_some() {}
        })
    }
}
