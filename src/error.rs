use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::order::PaymentStatus;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("payment required (payment status is {payment_status})")]
    PaymentRequired { payment_status: PaymentStatus },

    #[error("payment failed; the order is cancelled")]
    PaymentFailed,

    #[error("no couriers available")]
    NoCourierAvailable,

    #[error("payment signature mismatch")]
    SignatureMismatch,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("payment gateway timed out")]
    GatewayTimeout,

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient failures a caller may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::GatewayTimeout | AppError::Conflict(_) | AppError::Unavailable(_)
        )
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Conflict(what) => AppError::Conflict(what),
            StoreError::Unavailable(what) => AppError::Unavailable(what),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::SignatureMismatch => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::InvalidStatus(_) | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PaymentRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::PaymentFailed => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NoCourierAvailable | AppError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Configuration(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = match &self {
            AppError::PaymentRequired { payment_status } => json!({
                "error": self.to_string(),
                "payment_status": payment_status,
                "payment_required": true,
            }),
            AppError::PaymentFailed => json!({
                "error": self.to_string(),
                "payment_status": PaymentStatus::Failed,
                "order_status": "cancelled",
            }),
            _ => json!({
                "error": self.to_string()
            }),
        };

        (status, Json(body)).into_response()
    }
}
