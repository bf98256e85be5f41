// src/dag/job.rs

//! Job graph nodes: [`JobConfig`] and the closed set of [`JobType`] tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical job identifier type, unique within one graph.
pub type JobId = String;

/// Type tag of a job; selects the handler that executes it.
///
/// An unknown tag fails deserialization, so a graph can only ever carry one of
/// these. Whether a handler is registered for a tag is checked separately by
/// the orchestrator before execution starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Noop,
    Command,
    DataPreparation,
    Training,
    Evaluation,
    Export,
}

impl JobType {
    pub const ALL: [JobType; 6] = [
        JobType::Noop,
        JobType::Command,
        JobType::DataPreparation,
        JobType::Training,
        JobType::Evaluation,
        JobType::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Noop => "noop",
            JobType::Command => "command",
            JobType::DataPreparation => "data_preparation",
            JobType::Training => "training",
            JobType::Evaluation => "evaluation",
            JobType::Export => "export",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        JobType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| format!("unknown job type: {s}"))
    }
}

/// A node in the pipeline graph.
///
/// JSON uses camelCase (`dependsOn`); the TOML pipeline format may use
/// `depends_on` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub id: JobId,

    /// Human readable name; defaults to the id when empty.
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub job_type: JobType,

    /// Jobs that must succeed before this one may start.
    #[serde(default, alias = "depends_on")]
    pub depends_on: Vec<JobId>,

    /// Opaque handler input.
    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Capability tag a worker must advertise to receive this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,

    /// Queue priority; higher is delivered first.
    #[serde(default)]
    pub priority: i32,
}

impl JobConfig {
    pub fn new(id: impl Into<JobId>, job_type: JobType) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            job_type,
            depends_on: Vec::new(),
            parameters: Map::new(),
            capability: None,
            priority: 0,
        }
    }

    pub fn after(mut self, dep: impl Into<JobId>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}
