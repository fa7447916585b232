//! Error handling for the triage server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error (malformed frame, missing envelope field)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Classifier output missing required fields or violating value bounds
    #[error("Classification error: {0}")]
    Classification(String),

    /// Reconciliation loop failure (bad action, iteration cap)
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    /// Broker unreachable or publish/consume failure
    #[error("Broker error: {0}")]
    Broker(String),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Kafka client error
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Classification(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "CLASSIFICATION_ERROR",
                msg.clone(),
            ),
            Error::Reconciliation(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "RECONCILIATION_ERROR",
                msg.clone(),
            ),
            Error::Broker(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BROKER_UNAVAILABLE",
                msg.clone(),
            ),
            Error::Ledger(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "LEDGER_ERROR",
                msg.clone(),
            ),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
            Error::Kafka(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BROKER_UNAVAILABLE",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
