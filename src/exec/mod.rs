// src/exec/mod.rs

//! Job execution layer.
//!
//! - [`backend`] defines the [`JobDispatcher`] trait the orchestrator drives
//!   one level at a time, plus the events dispatchers report back.
//! - [`local`] runs handlers in-process under a concurrency limit.
//! - [`worker`] routes jobs through the job queue to fleet workers.
//! - [`transport`] delivers an assigned job to its worker.
//! - [`command`] is the shell command job handler.

pub mod backend;
pub mod command;
pub mod local;
pub mod transport;
pub mod worker;

pub use backend::{
    DispatchGate, JobDispatcher, JobEvent, JobOutcome, LevelDispatch, ScheduledJob,
};
pub use command::CommandHandler;
pub use local::LocalDispatcher;
pub use transport::{
    Assignment, AssignmentResult, InProcessTransport, MailboxTransport, WorkerTransport,
};
pub use worker::{RetryPolicy, WorkerDispatcher};
