// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - [`model`] is the TOML-backed data model of `Trainflow.toml`.
//! - [`loader`] reads a config file from disk.
//! - [`validate`] turns a [`RawConfigFile`] into a checked [`ConfigFile`].
//! - [`pipeline`] reads pipeline (job graph) files.

pub mod loader;
pub mod model;
pub mod pipeline;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{
    ConfigFile, OrchestratorSection, RawConfigFile, ServerSection, StorageSection, WorkersSection,
};
pub use pipeline::PipelineFile;
