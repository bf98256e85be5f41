// src/exec/command.rs

//! Shell command job handler.
//!
//! Parameters:
//! - `cmd` (string, required): run with `sh -c` (`cmd /C` on Windows).
//! - `cwd` (string, optional): working directory.
//! - `timeout_secs` (number, optional): kill the process after this long.
//!
//! Succeeds with `{ "exitCode": 0, "stdout": "..." }`; a non-zero exit,
//! spawn error or timeout fails the job.

use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::engine::handlers::{HandlerError, HandlerFuture, JobContext, JobHandler};

/// Stdout kept in the job result; the rest is dropped.
const MAX_CAPTURED_STDOUT: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandHandler;

impl JobHandler for CommandHandler {
    fn execute(&self, ctx: JobContext) -> HandlerFuture<'_> {
        Box::pin(run_command(ctx))
    }
}

fn shell(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

async fn run_command(ctx: JobContext) -> Result<Value, HandlerError> {
    let params = &ctx.job.parameters;
    let cmd_line = params
        .get("cmd")
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::InvalidParameters("missing string parameter 'cmd'".into()))?
        .to_string();
    let timeout = match params.get("timeout_secs") {
        None => None,
        Some(v) => Some(
            v.as_f64()
                .filter(|s| *s > 0.0)
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .ok_or_else(|| {
                    HandlerError::InvalidParameters(
                        "'timeout_secs' must be a positive number of representable seconds".into(),
                    )
                })?,
        ),
    };

    info!(
        execution_id = %ctx.execution_id,
        job_id = %ctx.job.id,
        attempt = ctx.attempt,
        cmd = %cmd_line,
        "starting command"
    );

    let mut cmd = shell(&cmd_line);
    if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
        cmd.current_dir(cwd);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| HandlerError::failed(format!("spawning '{cmd_line}': {e}")))?;

    // Drain stderr into the log so the pipe never fills.
    if let Some(stderr) = child.stderr.take() {
        let job_id = ctx.job.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job_id = %job_id, "stderr: {}", line);
            }
        });
    }

    let stdout = child.stdout.take();
    let collect_stdout = async move {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout {
            let _ = out.read_to_end(&mut buf).await;
        }
        buf
    };

    let run = async {
        let (status, out) = tokio::join!(child.wait(), collect_stdout);
        (status, out)
    };

    let (status, out) = match timeout {
        Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
            HandlerError::failed(format!("command timed out after {}s", limit.as_secs_f64()))
        })?,
        None => run.await,
    };

    let status =
        status.map_err(|e| HandlerError::failed(format!("waiting for '{cmd_line}': {e}")))?;
    let code = status.code().unwrap_or(-1);

    info!(
        execution_id = %ctx.execution_id,
        job_id = %ctx.job.id,
        exit_code = code,
        success = status.success(),
        "command exited"
    );

    if !status.success() {
        return Err(HandlerError::failed(format!("command exited with code {code}")));
    }

    let mut stdout = String::from_utf8_lossy(&out).into_owned();
    if stdout.len() > MAX_CAPTURED_STDOUT {
        let mut cut = MAX_CAPTURED_STDOUT;
        while !stdout.is_char_boundary(cut) {
            cut -= 1;
        }
        stdout.truncate(cut);
    }
    Ok(json!({ "exitCode": code, "stdout": stdout }))
}
