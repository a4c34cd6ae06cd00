use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Delivery reconciliation errors
///
/// These carry the delivery id so an operator can locate both ledger copies
/// and reconcile by hand. They are never retried or auto-healed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Delivery not found: {delivery_id}")]
    NotFound { delivery_id: Uuid },

    #[error("Delivery {delivery_id} present on {present_side} ledger only")]
    OneSided {
        delivery_id: Uuid,
        present_side: &'static str,
    },

    #[error("Dual write failed for delivery {delivery_id}: {detail}")]
    PartialFailure {
        delivery_id: Uuid,
        committed_side: &'static str,
        rolled_back: bool,
        detail: String,
    },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::InvalidArgument(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", msg, None)
            }
            // Duplicate-day conflicts are recovered internally by re-fetch;
            // one reaching the surface means the recovery itself failed.
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg, None)
            }
            AppError::Delivery(DeliveryError::NotFound { delivery_id }) => (
                StatusCode::NOT_FOUND,
                "DELIVERY_NOT_FOUND",
                format!("Delivery not found: {}", delivery_id),
                Some(serde_json::json!({ "delivery_id": delivery_id })),
            ),
            AppError::Delivery(DeliveryError::OneSided {
                delivery_id,
                present_side,
            }) => (
                StatusCode::CONFLICT,
                "CONSISTENCY_ERROR",
                format!(
                    "Delivery {} exists on the {} ledger only",
                    delivery_id, present_side
                ),
                Some(serde_json::json!({
                    "delivery_id": delivery_id,
                    "present_side": present_side,
                })),
            ),
            AppError::Delivery(DeliveryError::PartialFailure {
                delivery_id,
                committed_side,
                rolled_back,
                detail,
            }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PARTIAL_FAILURE",
                format!("Dual write failed for delivery {}: {}", delivery_id, detail),
                Some(serde_json::json!({
                    "delivery_id": delivery_id,
                    "committed_side": committed_side,
                    "rolled_back": rolled_back,
                })),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl AppError {
    /// Transient store failures, retryable for idempotent reads only
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Unavailable(_))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
