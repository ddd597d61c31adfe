use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Schedule conflict: {message}")]
    Conflict {
        message: String,
        conflicting_ids: Vec<Uuid>,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "auth_error",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal_error",
            AppError::Validation(_) => "validation_error",
            AppError::Conflict { .. } => "schedule_conflict",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Unavailable(_) => "store_unavailable",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Conflict { .. } | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let mut error_body = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });

        if let AppError::Conflict { conflicting_ids, .. } = &self {
            error_body["conflicting_ids"] = json!(conflicting_ids);
        }

        tracing::error!("Error: {}: {}", status, self);

        let body = Json(json!({
            "success": false,
            "error": error_body
        }));

        (status, body).into_response()
    }
}
