// src/engine/execution.rs

//! Execution records and checkpoints.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dag::{JobConfig, JobId, JobState};
use crate::errors::{OrchestratorError, Result};
use crate::types::FailurePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Not actively making progress: terminal or paused.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == ExecutionStatus::Paused
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// Maximum number of jobs of one level running at the same time.
    pub parallelism: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            parallelism: 4,
            failure_policy: FailurePolicy::Halt,
        }
    }
}

/// One run of a job graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub graph: Vec<JobConfig>,
    pub options: ExecutionOptions,
    pub jobs: BTreeMap<JobId, JobState>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Checkpoint this execution was reconstructed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    pub fn new(workflow_id: impl Into<String>, graph: Vec<JobConfig>, options: ExecutionOptions) -> Self {
        let now = Utc::now();
        let jobs = graph
            .iter()
            .map(|job| (job.id.clone(), JobState::default()))
            .collect();
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            graph,
            options,
            jobs,
            started_at: now,
            completed_at: None,
            updated_at: now,
            resumed_from: None,
            error: None,
        }
    }

    /// Build a fresh execution from a checkpoint. In-flight jobs are rewound
    /// to `pending` so they run again; finished jobs keep their outcome.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let now = Utc::now();
        let mut jobs = checkpoint.jobs.clone();
        for state in jobs.values_mut() {
            state.reset_for_resume();
        }
        Self {
            id: Uuid::new_v4(),
            workflow_id: checkpoint.workflow_id.clone(),
            status: ExecutionStatus::Pending,
            graph: checkpoint.graph.clone(),
            options: checkpoint.options,
            jobs,
            started_at: now,
            completed_at: None,
            updated_at: now,
            resumed_from: Some(checkpoint.checkpoint_id.clone()),
            error: None,
        }
    }

    pub fn set_status(&mut self, status: ExecutionStatus) {
        self.status = status;
        let now = Utc::now();
        self.updated_at = now;
        if status.is_terminal() {
            self.completed_at = Some(now);
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Immutable snapshot of an execution's job states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub graph: Vec<JobConfig>,
    pub options: ExecutionOptions,
    pub jobs: BTreeMap<JobId, JobState>,
    pub created_at: DateTime<Utc>,
    /// blake3 over the serialized graph and job map.
    pub digest: String,
}

impl Checkpoint {
    pub fn capture(execution: &Execution) -> Result<Self> {
        let digest = content_digest(&execution.graph, &execution.jobs)?;
        Ok(Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            execution_id: execution.id,
            workflow_id: execution.workflow_id.clone(),
            graph: execution.graph.clone(),
            options: execution.options,
            jobs: execution.jobs.clone(),
            created_at: Utc::now(),
            digest,
        })
    }

    /// Recompute the digest and compare. A mismatch means the stored record
    /// was altered or truncated.
    pub fn verify(&self) -> Result<()> {
        let actual = content_digest(&self.graph, &self.jobs)?;
        if actual != self.digest {
            return Err(OrchestratorError::Infrastructure(format!(
                "checkpoint {} is corrupt: digest mismatch",
                self.checkpoint_id
            )));
        }
        Ok(())
    }
}

/// Digest of an execution's graph and job states, used to tell whether
/// anything changed between two checkpoints.
pub fn content_digest(graph: &[JobConfig], jobs: &BTreeMap<JobId, JobState>) -> Result<String> {
    let bytes = serde_json::to_vec(&(graph, jobs))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{JobStatus, JobType};
    use serde_json::json;

    fn sample() -> Execution {
        let graph = vec![
            JobConfig::new("A", JobType::Noop),
            JobConfig::new("B", JobType::Noop).after("A"),
        ];
        Execution::new("wf", graph, ExecutionOptions::default())
    }

    #[test]
    fn checkpoint_resume_rewinds_in_flight_jobs() {
        let mut exec = sample();
        exec.jobs.get_mut("A").unwrap().mark_succeeded(json!(1));
        exec.jobs.get_mut("B").unwrap().mark_running(None, 1);

        let cp = Checkpoint::capture(&exec).unwrap();
        cp.verify().unwrap();

        let resumed = Execution::from_checkpoint(&cp);
        assert_ne!(resumed.id, exec.id);
        assert_eq!(resumed.resumed_from.as_deref(), Some(cp.checkpoint_id.as_str()));
        assert_eq!(resumed.jobs["A"].status, JobStatus::Succeeded);
        assert_eq!(resumed.jobs["B"].status, JobStatus::Pending);
        assert_eq!(resumed.jobs["B"].attempts, 1);
    }

    #[test]
    fn tampered_checkpoint_fails_verification() {
        let exec = sample();
        let mut cp = Checkpoint::capture(&exec).unwrap();
        cp.jobs.get_mut("A").unwrap().mark_succeeded(json!("forged"));

        let err = cp.verify().unwrap_err();
        assert!(matches!(err, OrchestratorError::Infrastructure(_)));
    }

    #[test]
    fn digest_survives_json_round_trip() {
        let mut exec = sample();
        exec.jobs.get_mut("A").unwrap().mark_succeeded(json!({ "loss": 0.25 }));
        let cp = Checkpoint::capture(&exec).unwrap();

        let text = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&text).unwrap();
        back.verify().unwrap();
    }

    #[test]
    fn terminal_status_sets_completed_at() {
        let mut exec = sample();
        exec.set_status(ExecutionStatus::Running);
        assert!(exec.completed_at.is_none());
        exec.set_status(ExecutionStatus::Completed);
        assert!(exec.completed_at.is_some());
        assert!(exec.status.is_settled());
    }
}
