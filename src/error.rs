use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gateway credentials not configured: {0}")]
    CredentialsNotConfigured(String),

    #[error("Gateway credentials invalid: {0}")]
    CredentialsInvalid(String),

    #[error("Gateway unreachable: {0}")]
    GatewayUnreachable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Shared names for not-found payloads so handlers and queries agree.
pub mod msg {
    pub const TENANT: &str = "tenant";
    pub const TRANSACTION: &str = "transaction";
    pub const PLAN: &str = "plan";
    pub const COURSE: &str = "course";
    pub const MANUAL_CHARGE: &str = "manual charge";
    pub const GATEWAY: &str = "gateway";
}

pub trait OptionExt<T> {
    fn or_not_found(self, what: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, what: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(what.to_string()))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::CredentialsNotConfigured(msg) => {
                tracing::error!("Credentials not configured: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Gateway credentials not configured",
                    Some(msg.clone()),
                )
            }
            AppError::CredentialsInvalid(msg) => {
                tracing::error!("Credentials invalid: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Gateway credentials invalid",
                    None,
                )
            }
            AppError::GatewayUnreachable(msg) => {
                tracing::error!("Gateway unreachable: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Gateway unreachable", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
