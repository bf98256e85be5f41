// src/api/mod.rs

//! HTTP/JSON surface over [`App`].
//!
//! | Route | Handler |
//! |---|---|
//! | `POST /graphs/validate` | [`executions::validate_graph`] |
//! | `GET /executions`, `POST /executions` | [`executions::list`], [`executions::create`] |
//! | `GET /executions/{id}` | [`executions::get`] |
//! | `POST /executions/{id}/pause` | [`executions::pause`] |
//! | `POST /executions/{id}/resume` | [`executions::resume`] |
//! | `POST /executions/{id}/checkpoints` | [`executions::checkpoint`] |
//! | `POST /checkpoints/{id}/resume` | [`executions::resume_from_checkpoint`] |
//! | `GET /workers`, `POST /workers/register` | [`workers::list`], [`workers::register`] |
//! | `POST /workers/{id}/heartbeat`, `DELETE /workers/{id}` | [`workers::heartbeat`], [`workers::deregister`] |
//! | `POST /workers/{id}/jobs/next` | [`workers::claim_next`] |
//! | `POST /workers/{id}/jobs/{assignment_id}/result` | [`workers::report_result`] |
//! | `GET /queue`, `POST /queue/pause`, `POST /queue/resume` | [`queue`] |
//! | `GET /health` | [`health::health`] |

use axum::routing::{delete, get, post};
use axum::Router;

use crate::app::App;

pub mod error;
pub mod executions;
pub mod health;
pub mod queue;
pub mod workers;

pub use error::{ApiError, ApiResult};

pub fn router(app: App) -> Router {
    Router::new()
        .route("/graphs/validate", post(executions::validate_graph))
        .route("/executions", get(executions::list).post(executions::create))
        .route("/executions/{id}", get(executions::get))
        .route("/executions/{id}/pause", post(executions::pause))
        .route("/executions/{id}/resume", post(executions::resume))
        .route("/executions/{id}/checkpoints", post(executions::checkpoint))
        .route("/checkpoints/{id}/resume", post(executions::resume_from_checkpoint))
        .route("/workers", get(workers::list))
        .route("/workers/register", post(workers::register))
        .route("/workers/{id}", delete(workers::deregister))
        .route("/workers/{id}/heartbeat", post(workers::heartbeat))
        .route("/workers/{id}/jobs/next", post(workers::claim_next))
        .route(
            "/workers/{id}/jobs/{assignment_id}/result",
            post(workers::report_result),
        )
        .route("/queue", get(queue::status))
        .route("/queue/pause", post(queue::pause))
        .route("/queue/resume", post(queue::resume))
        .route("/health", get(health::health))
        .with_state(app)
}
