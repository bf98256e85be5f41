// src/types.rs

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What the orchestrator does with the rest of an execution once a job fails.
///
/// - `Halt`: stop dispatching new jobs, let already dispatched jobs in the
///   current level finish, skip everything else and fail the execution
///   (default behaviour).
/// - `Continue`: skip only the transitive dependents of the failed job and
///   keep running independent branches. The execution still ends `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Halt,
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "halt" => Ok(FailurePolicy::Halt),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(format!(
                "invalid failure_policy: {other} (expected \"halt\" or \"continue\")"
            )),
        }
    }
}

/// Which dispatcher the orchestrator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorMode {
    /// Run handlers in this process; no workers involved.
    #[default]
    Local,
    /// Route jobs through the job queue to registered workers.
    Distributed,
}

/// Where execution state, checkpoints, queue state and worker records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One JSON file per record under the storage directory.
    File,
    /// In memory only (lost on restart).
    #[default]
    Memory,
}

/// How the distributed orchestrator hands a job to the worker it selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Run the registered handler in this process on behalf of the worker.
    #[default]
    InProcess,
    /// Park the assignment in the worker's mailbox until it is claimed and
    /// reported back over the HTTP API.
    Mailbox,
}

/// Built-in handler implementations that can be bound to a job type in
/// `[handlers]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Noop,
    Command,
}

impl FromStr for HandlerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "noop" => Ok(HandlerKind::Noop),
            "command" => Ok(HandlerKind::Command),
            other => Err(format!(
                "invalid handler kind: {other} (expected \"noop\" or \"command\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parses_case_insensitively() {
        assert_eq!("HALT".parse::<FailurePolicy>(), Ok(FailurePolicy::Halt));
        assert_eq!(" continue ".parse::<FailurePolicy>(), Ok(FailurePolicy::Continue));
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn handler_kind_rejects_unknown() {
        assert_eq!("command".parse::<HandlerKind>(), Ok(HandlerKind::Command));
        assert!("python".parse::<HandlerKind>().is_err());
    }
}
