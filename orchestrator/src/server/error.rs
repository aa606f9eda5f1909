//! Mapping of orchestrator errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::errors::OrchestratorError;

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError(pub OrchestratorError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            OrchestratorError::VerificationFailed => StatusCode::UNAUTHORIZED,
            OrchestratorError::ProjectNotFound(_) | OrchestratorError::SnapshotNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            OrchestratorError::BuildInProgress(_)
            | OrchestratorError::ProjectExists(_)
            | OrchestratorError::PortInUse { .. }
            | OrchestratorError::InvalidTransition { .. }
            | OrchestratorError::NoSnapshotAvailable(_) => StatusCode::CONFLICT,
            OrchestratorError::ValidationError(_) | OrchestratorError::JsonError(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::RuntimeError(_) | OrchestratorError::ProxyError(_) => StatusCode::BAD_GATEWAY,
            OrchestratorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
