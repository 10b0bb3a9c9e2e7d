use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;
use crate::worker::Busy;

/// Everything this API reports to a client. Worker diagnostics (exit codes,
/// stderr, paths) are logged where they occur and never reach these messages.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found")]
    NotFound,

    #[error("all workers are busy, try again shortly")]
    Busy,

    #[error("the worker did not answer in time")]
    WorkerTimeout,

    #[error("the worker failed to produce an answer")]
    WorkerFailure,

    #[error("the worker is not available")]
    SpawnError,

    #[error("the conversation store is unavailable")]
    StoreUnavailable,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Busy => StatusCode::TOO_MANY_REQUESTS,
            ApiError::WorkerTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::WorkerFailure => StatusCode::BAD_GATEWAY,
            ApiError::SpawnError => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::StoreUnavailable => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::NotFound => "not_found",
            ApiError::Busy => "busy",
            ApiError::WorkerTimeout => "worker_timeout",
            ApiError::WorkerFailure => "worker_failure",
            ApiError::SpawnError => "spawn_error",
            ApiError::StoreUnavailable => "store_unavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        (self.status(), body).into_response()
    }
}

impl From<Busy> for ApiError {
    fn from(_: Busy) -> Self {
        ApiError::Busy
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            _ => ApiError::StoreUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_kinds() {
        assert_eq!(
            ApiError::InvalidRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Busy.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::WorkerTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ApiError::WorkerFailure.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::SpawnError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::StoreUnavailable.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn worker_failure_body_carries_no_diagnostics() {
        let msg = ApiError::WorkerFailure.to_string();
        assert!(!msg.contains("stderr"));
        assert_eq!(ApiError::WorkerFailure.code(), "worker_failure");
    }
}
