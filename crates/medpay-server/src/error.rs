//! Error types for the MedPay server.
//!
//! Protocol routes (Click, Payme) never surface these to the provider; they
//! translate every failure into the calling protocol's own error vocabulary.
//! `AppError` is the taxonomy for the client-facing billing API and for
//! internal propagation between services.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: String, required: String },

    #[error("Wallet is blocked: {0}")]
    WalletBlocked(String),

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::InsufficientBalance { .. } => {
                (StatusCode::PAYMENT_REQUIRED, self.to_string())
            }
            AppError::WalletBlocked(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::GatewayUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_message() {
        let err = AppError::InsufficientBalance {
            available: "5000.00".to_string(),
            required: "10000.00".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("5000.00"));
        assert!(msg.contains("10000.00"));
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (
                AppError::NotFound("payment".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::Validation("bad amount".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::InsufficientBalance {
                    available: "0".into(),
                    required: "1".into(),
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                AppError::WalletBlocked("frozen".into()),
                StatusCode::FORBIDDEN,
            ),
            (
                AppError::GatewayUnavailable("maintenance".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
