// src/dag/job_state.rs

//! Per-execution state of a single job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a job inside one execution.
///
/// `Pending → Ready → Running → {Succeeded, Failed}`; `Skipped` is reached
/// from `Pending`/`Ready` when an upstream job failed or the execution halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub status: JobStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn mark_ready(&mut self) {
        self.status = JobStatus::Ready;
    }

    pub fn mark_running(&mut self, worker_id: Option<String>, attempt: u32) {
        self.status = JobStatus::Running;
        self.attempts = self.attempts.max(attempt);
        self.worker_id = worker_id;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.error = None;
    }

    pub fn mark_succeeded(&mut self, result: Value) {
        self.status = JobStatus::Succeeded;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_skipped(&mut self) {
        self.status = JobStatus::Skipped;
        self.finished_at = Some(Utc::now());
    }

    /// Rewind a job that was in flight when a snapshot was taken so it is
    /// dispatched again. Attempts are preserved.
    pub fn reset_for_resume(&mut self) {
        if matches!(self.status, JobStatus::Ready | JobStatus::Running) {
            self.status = JobStatus::Pending;
            self.worker_id = None;
            self.started_at = None;
            self.finished_at = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn running_job_rewinds_to_pending_and_keeps_attempts() {
        let mut state = JobState::default();
        state.mark_running(Some("w-1".into()), 2);
        state.reset_for_resume();

        assert_eq!(state.status, JobStatus::Pending);
        assert_eq!(state.attempts, 2);
        assert!(state.worker_id.is_none());
    }

    #[test]
    fn terminal_states_are_not_rewound() {
        let mut state = JobState::default();
        state.mark_running(None, 1);
        state.mark_succeeded(json!({ "ok": true }));
        state.reset_for_resume();

        assert_eq!(state.status, JobStatus::Succeeded);
        assert!(state.status.is_terminal());
    }

    #[test]
    fn serializes_with_lowercase_status() {
        let mut state = JobState::default();
        state.mark_failed("boom");
        let v = serde_json::to_value(&state).unwrap();
        assert_eq!(v["status"], json!("failed"));
        assert_eq!(v["error"], json!("boom"));
        assert!(v.get("workerId").is_none());
    }
}
