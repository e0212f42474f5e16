use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Failures of the call flows and their administrative operations.
///
/// Caller-facing handlers never surface these directly; they turn each
/// variant into a re-prompt or a clean hangup. Admin routes render them
/// as JSON with a matching status code.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("room '{room}' is full ({max} participants)")]
    CapacityExceeded { room: String, max: usize },

    #[error("access denied to room '{0}'")]
    AccessDenied(String),

    #[error("reservation '{id}' is {status}, expected pending")]
    InvalidState { id: String, status: String },

    #[error("downstream failure: {0}")]
    DownstreamFailure(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type FlowResult<T> = Result<T, FlowError>;

impl FlowError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        FlowError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FlowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FlowError::NotFound { .. } => StatusCode::NOT_FOUND,
            FlowError::CapacityExceeded { .. } | FlowError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            FlowError::AccessDenied(_) => StatusCode::FORBIDDEN,
            FlowError::DownstreamFailure(_) => StatusCode::BAD_GATEWAY,
            FlowError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(serde_json::json!({
                "status": "error",
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}
