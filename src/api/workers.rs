// src/api/workers.rs

//! Worker fleet endpoints. Workers push registrations and heartbeats; with
//! the mailbox transport they also pull assignments and report results.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::App;
use crate::errors::OrchestratorError;
use crate::exec::AssignmentResult;
use crate::workers::{RegisterWorker, WorkerRegistration, WorkerStatus};

use super::ApiResult;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    pub worker_id: String,
    pub registered_at: DateTime<Utc>,
}

pub async fn register(
    State(app): State<App>,
    payload: Result<Json<RegisterWorker>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Registered>)> {
    let Json(request) = payload?;
    let worker = app.workers.register_worker(request)?;
    Ok((
        StatusCode::CREATED,
        Json(Registered {
            worker_id: worker.worker_id,
            registered_at: worker.registered_at,
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub current_load: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    pub status: WorkerStatus,
    pub current_load: u32,
    pub last_heartbeat: DateTime<Utc>,
}

pub async fn heartbeat(
    State(app): State<App>,
    Path(worker_id): Path<String>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> ApiResult<Json<HeartbeatAck>> {
    let Json(request) = payload?;
    let worker = app.workers.heartbeat(&worker_id, request.current_load)?;
    Ok(Json(HeartbeatAck {
        status: worker.status,
        current_load: worker.current_load,
        last_heartbeat: worker.last_heartbeat,
    }))
}

/// Idempotent: removing an unknown worker still succeeds.
pub async fn deregister(
    State(app): State<App>,
    Path(worker_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = app.deregister_worker(&worker_id)?;
    info!(worker_id = %worker_id, removed, "worker deregistered");
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerView {
    #[serde(flatten)]
    pub worker: WorkerRegistration,
    /// Load as a percentage of capacity.
    pub utilization: f64,
    /// Seconds since first registration.
    pub uptime: i64,
}

#[derive(Debug, Serialize)]
pub struct WorkerList {
    pub count: usize,
    pub workers: Vec<WorkerView>,
}

pub async fn list(State(app): State<App>) -> ApiResult<Json<WorkerList>> {
    let now = app.workers.now();
    let workers: Vec<WorkerView> = app
        .workers
        .get_all_workers()?
        .into_iter()
        .map(|worker| WorkerView {
            utilization: worker.load_ratio() * 100.0,
            uptime: now.signed_duration_since(worker.registered_at).num_seconds(),
            worker,
        })
        .collect();
    Ok(Json(WorkerList {
        count: workers.len(),
        workers,
    }))
}

/// Next assignment for the worker, or `204 No Content`.
pub async fn claim_next(
    State(app): State<App>,
    Path(worker_id): Path<String>,
) -> ApiResult<Response> {
    let mailbox = app.mailbox.as_ref().ok_or_else(|| {
        OrchestratorError::InvalidState("job pull requires the mailbox transport".to_string())
    })?;
    if app.workers.get_worker(&worker_id)?.is_none() {
        return Err(OrchestratorError::WorkerNotFound(worker_id).into());
    }
    Ok(match mailbox.claim_next(&worker_id) {
        Some(assignment) => Json(assignment).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

pub async fn report_result(
    State(app): State<App>,
    Path((worker_id, assignment_id)): Path<(String, String)>,
    payload: Result<Json<AssignmentResult>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(result) = payload?;
    let mailbox = app.mailbox.as_ref().ok_or_else(|| {
        OrchestratorError::InvalidState("job results require the mailbox transport".to_string())
    })?;
    mailbox.complete(&worker_id, &assignment_id, result)?;
    Ok(Json(serde_json::json!({ "accepted": true })))
}
