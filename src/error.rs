//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::DomainError;
use crate::event_store::EventStoreError;
use crate::projection::ProjectionError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Coarse error classes callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InvalidStateTransition,
    ConcurrencyConflict,
    NotFound,
    PersistenceFailure,
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Version conflict on account {aggregate_id} after {attempts} attempts")]
    VersionConflict { aggregate_id: Uuid, attempts: u32 },

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidRequest(_) => ErrorKind::Validation,
            AppError::Domain(e) if e.is_validation() => ErrorKind::Validation,
            AppError::Domain(_) => ErrorKind::InvalidStateTransition,
            AppError::VersionConflict { .. } => ErrorKind::ConcurrencyConflict,
            AppError::EventStore(e) if e.is_concurrency_conflict() => {
                ErrorKind::ConcurrencyConflict
            }
            AppError::AccountNotFound(_) => ErrorKind::NotFound,
            AppError::EventStore(_)
            | AppError::Projection(_)
            | AppError::Database(_)
            | AppError::Internal(_)
            | AppError::Config(_) => ErrorKind::PersistenceFailure,
        }
    }
}

impl From<EventStoreError> for AppError {
    fn from(err: EventStoreError) -> Self {
        AppError::EventStore(err)
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::AccountNotFound(id) => {
                (StatusCode::NOT_FOUND, "account_not_found", Some(id.to_string()))
            }

            // 409 Conflict
            AppError::VersionConflict { .. } => {
                (StatusCode::CONFLICT, "version_conflict", None)
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(ref domain_err) => match domain_err {
                DomainError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "validation_error", Some(msg.clone()))
                }
                DomainError::CurrencyMismatch { .. } => {
                    (StatusCode::BAD_REQUEST, "currency_mismatch", None)
                }
                DomainError::InsufficientBalance { .. } => {
                    (StatusCode::BAD_REQUEST, "insufficient_balance", None)
                }
                DomainError::InvalidStateTransition { .. } => {
                    (StatusCode::CONFLICT, "invalid_state_transition", None)
                }
            },

            // 500 Internal Server Error
            AppError::EventStore(e) if e.is_concurrency_conflict() => {
                (StatusCode::CONFLICT, "version_conflict", None)
            }
            AppError::EventStore(e) => {
                tracing::error!("Event store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "event_store_error", None)
            }
            AppError::Projection(e) => {
                tracing::error!("Projection error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "projection_error", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_kinds() {
        let err = AppError::from(DomainError::insufficient_balance(dec!(10), dec!(5)));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = AppError::from(DomainError::CurrencyMismatch {
            expected: "USD".to_string(),
            actual: "EUR".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            AppError::from(DomainError::Validation("empty".to_string())).kind(),
            ErrorKind::Validation
        );

        let err = AppError::from(DomainError::invalid_transition("debit", AccountStatus::New));
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);

        let id = Uuid::new_v4();
        assert_eq!(AppError::AccountNotFound(id).kind(), ErrorKind::NotFound);

        let err = AppError::from(EventStoreError::ConcurrencyConflict {
            aggregate_id: id,
            expected: 1,
            actual: 2,
        });
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);

        let err = AppError::from(EventStoreError::Unavailable("down".to_string()));
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    }

    #[test]
    fn test_status_codes() {
        let response = AppError::InvalidRequest("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::AccountNotFound(Uuid::nil()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response =
            AppError::from(DomainError::invalid_transition("credit", AccountStatus::Held))
                .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError::Internal("boom".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
