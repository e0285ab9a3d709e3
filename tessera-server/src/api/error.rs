//! Mapping of manager errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use tessera_core::error::TopologyError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound { kind: &'static str, namespace: String, name: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Topology(e) if e.is_conflict() => StatusCode::CONFLICT,
            Self::Topology(TopologyError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Topology(TopologyError::Contended { .. } | TopologyError::Store(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            Self::Topology(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("⚠️ Admin request failed: {}", self);
        }
        let details = match &self {
            Self::Topology(TopologyError::Validation(v)) => serde_json::to_value(v).ok(),
            _ => None,
        };
        (status, Json(json!({ "error": self.to_string(), "details": details }))).into_response()
    }
}
