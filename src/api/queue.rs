// src/api/queue.rs

//! Global queue controls. Pausing stops delivery to workers without
//! dropping queued jobs.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app::App;

use super::ApiResult;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub paused: bool,
    pub queued: usize,
    pub in_flight: usize,
    pub healthy: bool,
}

fn snapshot(app: &App) -> QueueStatus {
    QueueStatus {
        paused: app.queue.is_paused(),
        queued: app.queue.len(),
        in_flight: app.queue.in_flight_len(),
        healthy: app.queue.is_healthy(),
    }
}

pub async fn status(State(app): State<App>) -> Json<QueueStatus> {
    Json(snapshot(&app))
}

pub async fn pause(State(app): State<App>) -> ApiResult<Json<QueueStatus>> {
    app.queue.pause()?;
    Ok(Json(snapshot(&app)))
}

pub async fn resume(State(app): State<App>) -> ApiResult<Json<QueueStatus>> {
    app.queue.resume()?;
    Ok(Json(snapshot(&app)))
}
