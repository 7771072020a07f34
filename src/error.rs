use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent unavailable: {0} is offline")]
    AgentUnavailable(String),

    #[error("platform adapter failure ({platform}): {message}")]
    AdapterFailure {
        platform: &'static str,
        message: String,
    },

    #[error("remote execution failure: {0}")]
    RemoteExecution(String),

    #[error("no idle agent available for role {0}")]
    ClassificationMiss(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AgentNotFound(ref id) => (StatusCode::NOT_FOUND, format!("agent not found: {id}")),
            AppError::AgentUnavailable(ref id) => {
                (StatusCode::CONFLICT, format!("agent unavailable: {id} is offline"))
            }
            AppError::ClassificationMiss(ref role) => (
                StatusCode::CONFLICT,
                format!("no idle agent available for role {role}"),
            ),
            AppError::AdapterFailure { .. } | AppError::RemoteExecution(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Json(ref err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::Internal(ref err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };

        let body = json!({
            "error": error_message
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rej: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rej.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
