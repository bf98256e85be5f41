// src/queue.rs

//! Durable, pausable queue of ready jobs.
//!
//! Semantics:
//! - Delivery order is highest `priority` first, FIFO among equal priority.
//! - A job key `(execution id, job id)` is delivered to at most one consumer:
//!   while it is queued or in flight it cannot be enqueued again.
//! - `pause()` stops delivery without dropping entries. The paused flag and
//!   all entries are written through the [`StateStore`] on every mutation, so
//!   a restart neither loses queued work nor silently resumes delivery.
//! - Several processes may share one store. Every mutation re-reads the
//!   persisted snapshot under the store's exclusive lock, so no process
//!   overwrites another's entries.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use crate::dag::{JobConfig, JobId};
use crate::engine::ExecutionStatus;
use crate::errors::{OrchestratorError, Result};
use crate::store::StateStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub job: JobConfig,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Insertion sequence, used for FIFO ordering.
    pub seq: u64,
}

impl QueuedJob {
    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    fn is(&self, execution_id: Uuid, job_id: &str) -> bool {
        self.execution_id == execution_id && self.job.id == job_id
    }
}

/// Persisted queue state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub paused: bool,
    pub entries: Vec<QueuedJob>,
    pub in_flight: Vec<QueuedJob>,
    pub next_seq: u64,
}

impl QueueSnapshot {
    fn contains(&self, execution_id: Uuid, job_id: &str) -> bool {
        self.entries
            .iter()
            .chain(self.in_flight.iter())
            .any(|e| e.is(execution_id, job_id))
    }

    /// Index of the next entry to deliver, optionally restricted to one
    /// execution.
    fn next_index(&self, execution_id: Option<Uuid>) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| execution_id.is_none_or(|id| e.execution_id == id))
            .min_by_key(|(_, e)| (std::cmp::Reverse(e.job.priority), e.seq))
            .map(|(i, _)| i)
    }
}

#[derive(Debug)]
pub struct JobQueue {
    store: Arc<dyn StateStore>,
    state: Mutex<QueueSnapshot>,
    resumed: Notify,
}

impl JobQueue {
    /// Open the queue, restoring persisted state.
    ///
    /// Entries that were in flight when the previous process stopped go back
    /// to the queued set; nobody is going to ack them. Entries of executions
    /// another process is still running stay in flight.
    pub fn open(store: Arc<dyn StateStore>) -> Result<Self> {
        let snapshot = store.load_queue()?.unwrap_or_default();
        let queue = Self {
            store,
            state: Mutex::new(snapshot),
            resumed: Notify::new(),
        };

        let returned = queue.mutate(|state| {
            let running = queue.in_progress(state, &[]);
            let (kept, stranded): (Vec<_>, Vec<_>) = std::mem::take(&mut state.in_flight)
                .into_iter()
                .partition(|e| running.contains(&e.execution_id));
            state.in_flight = kept;
            let count = stranded.len();
            state.entries.extend(stranded);
            Ok(count)
        })?;
        if returned > 0 {
            info!(count = returned, "returning in-flight entries from previous run to the queue");
        }
        if queue.is_paused() {
            info!("job queue restored in paused state");
        }
        Ok(queue)
    }

    fn lock(&self) -> MutexGuard<'_, QueueSnapshot> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to the persisted state under the store's exclusive lock,
    /// persist the result, then commit it to memory. Nothing changes in
    /// memory if persisting fails.
    fn mutate<T>(&self, f: impl FnOnce(&mut QueueSnapshot) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let mut f = Some(f);
        let mut out = None;
        self.store.exclusive(&mut || -> Result<()> {
            let Some(f) = f.take() else {
                return Ok(());
            };
            let current = self.store.load_queue()?.unwrap_or_default();
            let mut next = current.clone();
            let value = f(&mut next)?;
            if next != current {
                self.store.save_queue(&next)?;
            }
            *guard = next;
            out = Some(value);
            Ok(())
        })?;
        out.ok_or_else(|| OrchestratorError::infrastructure("state store skipped a locked queue update"))
    }

    /// Executions with entries in `state` that are in `live` or that the
    /// store records as pending or running, possibly in another process.
    fn in_progress(&self, state: &QueueSnapshot, live: &[Uuid]) -> HashSet<Uuid> {
        let ids: HashSet<Uuid> = state
            .entries
            .iter()
            .chain(state.in_flight.iter())
            .map(|e| e.execution_id)
            .collect();
        ids.into_iter()
            .filter(|id| {
                live.contains(id)
                    || matches!(
                        self.store.load_execution(*id),
                        Ok(Some(e)) if matches!(e.status, ExecutionStatus::Pending | ExecutionStatus::Running)
                    )
            })
            .collect()
    }

    pub fn enqueue(
        &self,
        execution_id: Uuid,
        workflow_id: &str,
        job: JobConfig,
        attempt: u32,
    ) -> Result<QueuedJob> {
        self.mutate(|state| {
            if state.contains(execution_id, &job.id) {
                return Err(OrchestratorError::Dispatch(format!(
                    "job '{}' of execution {} is already queued or in flight",
                    job.id, execution_id
                )));
            }
            let entry = QueuedJob {
                execution_id,
                workflow_id: workflow_id.to_string(),
                job,
                attempt,
                enqueued_at: Utc::now(),
                seq: state.next_seq,
            };
            state.next_seq += 1;
            state.entries.push(entry.clone());
            debug!(execution_id = %execution_id, job_id = %entry.job.id, seq = entry.seq, "enqueued job");
            Ok(entry)
        })
    }

    /// Deliver the next job from any execution. `None` when paused or empty.
    pub fn dequeue(&self) -> Result<Option<QueuedJob>> {
        self.deliver(None)
    }

    /// Deliver the next job of one execution. `None` when paused or when that
    /// execution has nothing queued.
    pub fn dequeue_for(&self, execution_id: Uuid) -> Result<Option<QueuedJob>> {
        self.deliver(Some(execution_id))
    }

    fn deliver(&self, execution_id: Option<Uuid>) -> Result<Option<QueuedJob>> {
        self.mutate(|state| {
            if state.paused {
                return Ok(None);
            }
            let Some(index) = state.next_index(execution_id) else {
                return Ok(None);
            };
            let entry = state.entries.remove(index);
            state.in_flight.push(entry.clone());
            Ok(Some(entry))
        })
    }

    /// Mark a delivered job as done. Returns whether it was in flight.
    pub fn ack(&self, execution_id: Uuid, job_id: &str) -> Result<bool> {
        self.mutate(|state| {
            let before = state.in_flight.len();
            state.in_flight.retain(|e| !e.is(execution_id, job_id));
            Ok(state.in_flight.len() != before)
        })
    }

    /// Return a delivered job to the queue with its original position.
    pub fn requeue(&self, execution_id: Uuid, job_id: &str) -> Result<bool> {
        self.mutate(|state| {
            match state.in_flight.iter().position(|e| e.is(execution_id, job_id)) {
                Some(i) => {
                    let entry = state.in_flight.remove(i);
                    state.entries.push(entry);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    /// Drop every queued (not in-flight) entry of an execution.
    pub fn withdraw(&self, execution_id: Uuid) -> Result<usize> {
        self.mutate(|state| {
            let before = state.entries.len();
            state.entries.retain(|e| e.execution_id != execution_id);
            Ok(before - state.entries.len())
        })
    }

    /// Drop every entry, queued or in flight, whose execution is neither in
    /// `live` nor stored as running by another process. Used at startup:
    /// executions from a previous process are recovered through checkpoints,
    /// not through the queue.
    pub fn purge_orphans(&self, live: &[Uuid]) -> Result<usize> {
        self.mutate(|state| {
            let keep = self.in_progress(state, live);
            let before = state.entries.len() + state.in_flight.len();
            state.entries.retain(|e| keep.contains(&e.execution_id));
            state.in_flight.retain(|e| keep.contains(&e.execution_id));
            Ok(before - state.entries.len() - state.in_flight.len())
        })
    }

    pub fn pause(&self) -> Result<()> {
        self.mutate(|state| {
            state.paused = true;
            Ok(())
        })?;
        info!("job queue paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.mutate(|state| {
            state.paused = false;
            Ok(())
        })?;
        info!("job queue resumed");
        self.resumed.notify_waiters();
        Ok(())
    }

    /// Whether delivery is paused, as last persisted by any process sharing
    /// the store. Falls back to the last known state if the store is down.
    pub fn is_paused(&self) -> bool {
        let mut state = self.lock();
        if let Ok(Some(stored)) = self.store.load_queue() {
            *state = stored;
        }
        state.paused
    }

    /// Completes once the queue is not paused.
    pub async fn wait_until_resumed(&self) {
        loop {
            let notified = self.resumed.notified();
            if !self.is_paused() {
                return;
            }
            notified.await;
        }
    }

    /// Number of queued (undelivered) entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn is_healthy(&self) -> bool {
        self.store.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::JobType;
    use crate::store::{FileStateStore, MemoryStateStore};

    fn queue() -> (Arc<MemoryStateStore>, JobQueue) {
        let store = Arc::new(MemoryStateStore::new());
        let q = JobQueue::open(store.clone()).unwrap();
        (store, q)
    }

    fn job(id: &str, priority: i32) -> JobConfig {
        let mut j = JobConfig::new(id, JobType::Noop);
        j.priority = priority;
        j
    }

    #[test]
    fn higher_priority_first_then_fifo() {
        let (_, q) = queue();
        let exec = Uuid::new_v4();
        q.enqueue(exec, "wf", job("low", 0), 1).unwrap();
        q.enqueue(exec, "wf", job("high", 5), 1).unwrap();
        q.enqueue(exec, "wf", job("low2", 0), 1).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| q.dequeue().unwrap())
            .map(|e| e.job.id)
            .collect();
        assert_eq!(order, vec!["high", "low", "low2"]);
        assert_eq!(q.in_flight_len(), 3);
    }

    #[test]
    fn same_key_cannot_be_enqueued_twice_until_acked() {
        let (_, q) = queue();
        let exec = Uuid::new_v4();
        q.enqueue(exec, "wf", job("A", 0), 1).unwrap();
        assert!(matches!(
            q.enqueue(exec, "wf", job("A", 0), 1),
            Err(OrchestratorError::Dispatch(_))
        ));

        let delivered = q.dequeue().unwrap().unwrap();
        assert!(q.enqueue(exec, "wf", job("A", 0), 2).is_err());
        assert!(q.ack(exec, delivered.job_id()).unwrap());
        assert!(q.enqueue(exec, "wf", job("A", 0), 2).is_ok());
    }

    #[test]
    fn paused_queue_delivers_nothing_and_keeps_entries() {
        let (_, q) = queue();
        let exec = Uuid::new_v4();
        q.enqueue(exec, "wf", job("A", 0), 1).unwrap();
        q.pause().unwrap();

        assert!(q.dequeue().unwrap().is_none());
        assert_eq!(q.len(), 1);

        q.resume().unwrap();
        assert_eq!(q.dequeue().unwrap().map(|e| e.job.id), Some("A".to_string()));
    }

    #[test]
    fn dequeue_for_only_sees_one_execution() {
        let (_, q) = queue();
        let (e1, e2) = (Uuid::new_v4(), Uuid::new_v4());
        q.enqueue(e1, "wf", job("A", 9), 1).unwrap();
        q.enqueue(e2, "wf", job("B", 0), 1).unwrap();

        assert_eq!(q.dequeue_for(e2).unwrap().map(|e| e.job.id), Some("B".to_string()));
        assert!(q.dequeue_for(e2).unwrap().is_none());
        assert_eq!(q.withdraw(e1).unwrap(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn state_is_restored_on_reopen_with_in_flight_requeued() {
        let (store, q) = queue();
        let exec = Uuid::new_v4();
        q.enqueue(exec, "wf", job("A", 0), 1).unwrap();
        q.enqueue(exec, "wf", job("B", 0), 1).unwrap();
        q.dequeue().unwrap();
        q.pause().unwrap();
        drop(q);

        let reopened = JobQueue::open(store).unwrap();
        assert!(reopened.is_paused());
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.in_flight_len(), 0);
    }

    #[test]
    fn failed_persist_leaves_memory_untouched() {
        let (store, q) = queue();
        store.set_available(false);

        assert!(q.enqueue(Uuid::new_v4(), "wf", job("A", 0), 1).is_err());
        assert!(q.pause().is_err());
        assert!(q.is_empty());
        assert!(!q.is_paused());
        assert!(!q.is_healthy());
    }

    #[test]
    fn queues_sharing_a_store_keep_each_others_entries() {
        let dir = tempfile::tempdir().unwrap();
        let open = || JobQueue::open(Arc::new(FileStateStore::new(dir.path()))).unwrap();
        let (first, second) = (open(), open());
        let (e1, e2) = (Uuid::new_v4(), Uuid::new_v4());

        first.enqueue(e1, "wf", job("A", 0), 1).unwrap();
        second.enqueue(e2, "wf", job("B", 0), 1).unwrap();
        first.enqueue(e1, "wf", job("C", 0), 1).unwrap();

        // Each sees the other's work; nothing was overwritten.
        assert_eq!(second.dequeue_for(e1).unwrap().map(|e| e.job.id), Some("A".to_string()));
        assert_eq!(first.dequeue_for(e2).unwrap().map(|e| e.job.id), Some("B".to_string()));
        assert!(first.enqueue(e1, "wf", job("A", 0), 2).is_err());

        second.pause().unwrap();
        assert!(first.is_paused());
        assert!(first.dequeue().unwrap().is_none());
        first.resume().unwrap();
        assert_eq!(second.dequeue().unwrap().map(|e| e.job.id), Some("C".to_string()));
    }

    #[test]
    fn entries_of_executions_running_elsewhere_survive_startup() {
        use crate::engine::{Execution, ExecutionOptions};

        let (store, q) = queue();
        let mut elsewhere = Execution::new("wf", Vec::new(), ExecutionOptions::default());
        elsewhere.status = ExecutionStatus::Running;
        store.save_execution(&elsewhere).unwrap();
        let gone = Uuid::new_v4();

        q.enqueue(elsewhere.id, "wf", job("A", 0), 1).unwrap();
        q.enqueue(elsewhere.id, "wf", job("B", 0), 1).unwrap();
        q.enqueue(gone, "wf", job("C", 0), 1).unwrap();
        q.dequeue_for(elsewhere.id).unwrap();
        q.dequeue_for(gone).unwrap();
        drop(q);

        let reopened = JobQueue::open(store).unwrap();
        // Only the entry whose owner is gone goes back to the queue.
        assert_eq!(reopened.in_flight_len(), 1);
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.purge_orphans(&[]).unwrap(), 1);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.in_flight_len(), 1);
    }

    #[tokio::test]
    async fn wait_until_resumed_wakes_on_resume() {
        let (_, q) = queue();
        let q = Arc::new(q);
        q.pause().unwrap();

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.wait_until_resumed().await })
        };
        tokio::task::yield_now().await;
        q.resume().unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
