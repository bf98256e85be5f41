// src/api/executions.rs

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::App;
use crate::dag::{plan, JobConfig};
use crate::engine::{Execution, ExecutionStatus, ExecuteOptions};
use crate::errors::OrchestratorError;
use crate::types::FailurePolicy;

use super::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct GraphRequest {
    pub jobs: Vec<JobConfig>,
}

/// `{valid: false, errors}` for a bad graph, the plan otherwise. A bad graph
/// is not an HTTP error; only a malformed body is.
pub async fn validate_graph(
    State(app): State<App>,
    payload: Result<Json<GraphRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = payload?;
    match app.orchestrator.check_graph(&request.jobs) {
        Ok(()) => {
            let plan = plan(&request.jobs)?;
            Ok(Json(json!({
                "valid": true,
                "topologicalOrder": plan.topological_order,
                "executionLevels": plan.execution_levels,
            })))
        }
        Err(OrchestratorError::Validation(errors)) => Ok(Json(json!({
            "valid": false,
            "errors": errors,
        }))),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub workflow_id: String,
    pub jobs: Vec<JobConfig>,
    #[serde(default)]
    pub parallelism: Option<usize>,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAccepted {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
}

pub async fn create(
    State(app): State<App>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ExecutionAccepted>)> {
    let Json(request) = payload?;
    let execution = app.execute(
        &request.workflow_id,
        request.jobs,
        ExecuteOptions {
            parallelism: request.parallelism,
            failure_policy: request.failure_policy,
        },
    )?;
    Ok((
        StatusCode::CREATED,
        Json(ExecutionAccepted {
            execution_id: execution.id,
            status: execution.status,
            started_at: execution.started_at,
        }),
    ))
}

pub async fn list(State(app): State<App>) -> ApiResult<Json<Value>> {
    let executions = app.orchestrator.list_executions()?;
    Ok(Json(json!({
        "count": executions.len(),
        "executions": executions,
    })))
}

pub async fn get(State(app): State<App>, Path(id): Path<Uuid>) -> ApiResult<Json<Execution>> {
    Ok(Json(app.orchestrator.get_execution(id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseRequest {
    #[serde(default = "default_true")]
    pub create_checkpoint: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PauseRequest {
    fn default() -> Self {
        Self {
            create_checkpoint: true,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseResponse {
    pub paused: bool,
    pub checkpoint_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

/// The body is optional; an empty body requests a checkpoint.
pub async fn pause(
    State(app): State<App>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Json<PauseResponse>> {
    let request: PauseRequest = if body.is_empty() {
        PauseRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let outcome = app.orchestrator.pause(id, request.create_checkpoint)?;
    Ok(Json(PauseResponse {
        paused: outcome.paused,
        checkpoint_created: outcome.checkpoint.is_some(),
        checkpoint_id: outcome.checkpoint.map(|c| c.checkpoint_id),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatusResponse {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
}

impl From<Execution> for ExecutionStatusResponse {
    fn from(execution: Execution) -> Self {
        Self {
            execution_id: execution.id,
            status: execution.status,
        }
    }
}

pub async fn resume(
    State(app): State<App>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExecutionStatusResponse>> {
    Ok(Json(app.orchestrator.resume(id)?.into()))
}

pub async fn resume_from_checkpoint(
    State(app): State<App>,
    Path(checkpoint_id): Path<String>,
) -> ApiResult<Json<ExecutionStatusResponse>> {
    Ok(Json(app.orchestrator.resume_from_checkpoint(&checkpoint_id)?.into()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointCreated {
    pub checkpoint_id: String,
    pub created_at: DateTime<Utc>,
}

pub async fn checkpoint(
    State(app): State<App>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CheckpointCreated>)> {
    let checkpoint = app.orchestrator.checkpoint(id)?;
    Ok((
        StatusCode::CREATED,
        Json(CheckpointCreated {
            checkpoint_id: checkpoint.checkpoint_id,
            created_at: checkpoint.created_at,
        }),
    ))
}
