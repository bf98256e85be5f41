// src/api/error.rs

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::errors::OrchestratorError;

/// Error returned by HTTP handlers, rendered as `{ "error", "code" }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Orchestrator(err) => classify(err),
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let ApiError::Orchestrator(OrchestratorError::Validation(issues)) = &self {
            body["issues"] = json!(issues);
        }

        (status, Json(body)).into_response()
    }
}

fn classify(err: &OrchestratorError) -> (StatusCode, &'static str, String) {
    use OrchestratorError as E;
    match err {
        E::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string()),
        E::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", err.to_string()),
        E::InvalidState(_) => (StatusCode::BAD_REQUEST, "INVALID_STATE", err.to_string()),
        E::ConfigError(_) => (StatusCode::BAD_REQUEST, "CONFIG_ERROR", err.to_string()),
        E::ExecutionNotFound(_)
        | E::CheckpointNotFound(_)
        | E::WorkerNotFound(_)
        | E::AssignmentNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        E::Dispatch(_) => {
            tracing::error!(error = %err, "dispatch error");
            (StatusCode::INTERNAL_SERVER_ERROR, "DISPATCH_ERROR", err.to_string())
        }
        E::Infrastructure(_) => {
            tracing::error!(error = %err, "infrastructure error");
            (StatusCode::INTERNAL_SERVER_ERROR, "INFRASTRUCTURE_ERROR", err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn status_codes_follow_error_taxonomy() {
        let status = |e: OrchestratorError| ApiError::from(e).into_response().status();
        assert_eq!(status(OrchestratorError::Validation(vec![])), StatusCode::BAD_REQUEST);
        assert_eq!(status(OrchestratorError::InvalidState("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(OrchestratorError::ExecutionNotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(status(OrchestratorError::WorkerNotFound("w".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(OrchestratorError::Dispatch("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            status(OrchestratorError::Infrastructure("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
