// src/dag/mod.rs

//! Job graph model and pure graph algorithms.
//!
//! - [`job`] defines the graph nodes ([`JobConfig`], [`JobType`]).
//! - [`graph`] is an adjacency view used for scheduling and skip propagation.
//! - [`validator`] validates graphs and computes topological order and
//!   execution levels.
//! - [`job_state`] is the per-execution state of a job.
//! - [`state_manager`] applies job state transitions.

pub mod graph;
pub mod job;
pub mod job_state;
pub mod state_manager;
pub mod validator;

pub use graph::JobGraph;
pub use job::{JobConfig, JobId, JobType};
pub use job_state::{JobState, JobStatus};
pub use state_manager::StateManager;
pub use validator::{
    execution_levels, plan, topological_sort, validate, ExecutionPlan, ValidationIssue,
    ValidationReport,
};
