// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! The variants follow the engine's error taxonomy:
//! - [`OrchestratorError::Validation`]: malformed graph, surfaced before
//!   execution starts and never retried.
//! - [`OrchestratorError::Dispatch`]: no eligible worker / queue refused the
//!   job; retried with backoff by the dispatcher before the job is failed.
//! - [`OrchestratorError::Infrastructure`]: state store or queue unreachable,
//!   corrupt checkpoint. Operations fail fast.
//!
//! Handler failures are not errors of the engine itself; they are recorded on
//! the job state (see [`crate::engine::HandlerError`]).

use thiserror::Error;
use uuid::Uuid;

use crate::dag::validator::ValidationIssue;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid job graph: {}", describe_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Assignment not found: {0}")]
    AssignmentNotFound(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn infrastructure<E: std::fmt::Display>(e: E) -> Self {
        Self::Infrastructure(e.to_string())
    }

    /// Whether a caller may retry the failed operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Dispatch(_) | Self::Infrastructure(_))
    }
}

fn describe_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, OrchestratorError>;
