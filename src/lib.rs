// src/lib.rs

pub mod api;
pub mod app;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod health;
pub mod logging;
pub mod queue;
pub mod store;
pub mod types;
pub mod workers;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::app::{build_handlers, App};
use crate::cli::{CliArgs, Command};
use crate::config::{load_or_default, ConfigFile, PipelineFile};
use crate::dag::{plan, validate};
use crate::engine::{ExecuteOptions, Execution, ExecutionStatus};
use crate::types::OrchestratorMode;

/// High-level entry point used by `main.rs`.
///
/// Loads the config, then dispatches the subcommand:
/// - `serve`: HTTP API with Ctrl-C graceful shutdown
/// - `validate`: print the execution plan of a pipeline file
/// - `run`: execute a pipeline file and wait for it (Ctrl-C pauses it with a
///   checkpoint)
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    match args.command {
        Command::Serve { bind } => serve(&cfg, bind).await,
        Command::Validate { pipeline } => validate_pipeline(&cfg, &pipeline),
        Command::Run {
            pipeline,
            parallelism,
        } => run_pipeline(&cfg, &pipeline, parallelism).await,
    }
}

async fn serve(cfg: &ConfigFile, bind: Option<String>) -> Result<()> {
    let app = App::from_config(cfg)?;
    let addr = bind.unwrap_or_else(|| cfg.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(addr = %addr, "trainflow API listening");
    axum::serve(listener, api::router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn validate_pipeline(cfg: &ConfigFile, path: &Path) -> Result<()> {
    let pipeline = PipelineFile::load(path)
        .with_context(|| format!("reading pipeline {}", path.display()))?;

    let report = validate(&pipeline.jobs);
    if !report.valid {
        println!("pipeline '{}' is invalid:", pipeline.workflow);
        for issue in &report.errors {
            println!("  - {issue}");
        }
        anyhow::bail!("{} validation error(s)", report.errors.len());
    }

    let plan = plan(&pipeline.jobs)?;
    println!("trainflow plan: {}", pipeline.workflow);
    println!("  jobs: {}", pipeline.jobs.len());
    println!("  order: {}", plan.topological_order.join(" -> "));
    for (level, ids) in plan.execution_levels.iter().enumerate() {
        println!("  level {level}: {}", ids.join(", "));
    }

    // Remote workers decide for themselves what they can run.
    if cfg.orchestrator.transport == types::TransportMode::InProcess
        || cfg.orchestrator.mode == OrchestratorMode::Local
    {
        let handlers = build_handlers(&cfg.handlers);
        for job in pipeline.jobs.iter().filter(|j| !handlers.contains(j.job_type)) {
            println!(
                "  warning: no handler for job '{}' of type '{}'",
                job.id, job.job_type
            );
        }
    }

    debug!("validate complete (no execution)");
    Ok(())
}

async fn run_pipeline(cfg: &ConfigFile, path: &Path, parallelism: Option<usize>) -> Result<()> {
    let pipeline = PipelineFile::load(path)
        .with_context(|| format!("reading pipeline {}", path.display()))?;
    let app = App::from_config(cfg)?;

    let options = ExecuteOptions {
        parallelism: parallelism.or(pipeline.parallelism),
        failure_policy: pipeline.failure_policy,
    };
    let mut keep_alive = None;
    if app.distributed.is_some() && app.mailbox.is_none() {
        let capacity = options
            .parallelism
            .unwrap_or(cfg.orchestrator.default_parallelism);
        keep_alive = app.host_local_worker(capacity, cfg.workers.heartbeat_interval())?;
    }

    let execution = app.execute(&pipeline.workflow, pipeline.jobs, options)?;
    let execution_id = execution.id;
    info!(execution_id = %execution_id, workflow_id = %pipeline.workflow, "execution started");

    // Ctrl-C → pause with a checkpoint; the wait below returns once drained.
    {
        let orchestrator = app.orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            match orchestrator.pause(execution_id, true) {
                Ok(outcome) => {
                    if let Some(cp) = outcome.checkpoint {
                        eprintln!("paused; resume with checkpoint {}", cp.checkpoint_id);
                    }
                }
                Err(e) => warn!(execution_id = %execution_id, error = %e, "pause on Ctrl+C failed"),
            }
        });
    }

    let finished = app.wait(execution_id).await;
    if let Some(task) = keep_alive {
        task.abort();
    }
    let finished = finished?;
    print_summary(&finished);

    match finished.status {
        ExecutionStatus::Completed => Ok(()),
        ExecutionStatus::Paused => Ok(()),
        status => anyhow::bail!(
            "execution {execution_id} ended {status:?}{}",
            finished
                .error
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        ),
    }
}

fn print_summary(execution: &Execution) {
    println!(
        "execution {} ({}): {:?}",
        execution.id, execution.workflow_id, execution.status
    );
    for job in &execution.graph {
        let Some(state) = execution.jobs.get(&job.id) else {
            continue;
        };
        match (&state.error, &state.result) {
            (Some(err), _) => println!("  {:<24} {:?}  {err}", job.id, state.status),
            (None, Some(result)) if !result.is_null() => {
                println!("  {:<24} {:?}  {result}", job.id, state.status)
            }
            _ => println!("  {:<24} {:?}", job.id, state.status),
        }
    }
}
