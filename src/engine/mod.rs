// src/engine/mod.rs

//! Orchestration engine.
//!
//! - [`execution`] holds the persisted execution and checkpoint records.
//! - [`handlers`] is the typed job handler registry.
//! - [`core`] is the pure per-execution state machine.
//! - [`runtime`] is the async control loop around the core, one per execution.
//! - [`orchestrator`] is the public API: execute, pause, resume, checkpoint.
//! - [`distributed`] wires the orchestrator to the worker fleet.

pub mod core;
pub mod distributed;
pub mod execution;
pub mod handlers;
pub mod orchestrator;
pub mod runtime;

pub use distributed::DistributedOrchestrator;
pub use execution::{Checkpoint, Execution, ExecutionOptions, ExecutionStatus};
pub use handlers::{HandlerError, HandlerRegistry, JobContext, JobHandler, NoopHandler};
pub use orchestrator::{DagOrchestrator, ExecuteOptions, OrchestratorSettings, PauseOutcome};
pub use runtime::Progress;
