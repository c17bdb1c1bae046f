//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::auth::AuthErrorKind;
use crate::db::StoreError;
use crate::saga::{ActivationError, RegistrationError};

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::db_error(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Log the underlying cause and return a generic message.
    pub fn db_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Internal("the server encountered an internal error".into())
    }

    /// Map a store error where not-found and conflicts are meaningful to the client.
    pub fn from_store(context: &str, e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::not_found("resource not found"),
            StoreError::VersionConflict => {
                Self::conflict("the resource was modified by another request")
            }
            StoreError::DuplicateEmail | StoreError::DuplicateUsername | StoreError::Conflict => {
                Self::conflict(e.to_string())
            }
            other => Self::db_error(context, other),
        }
    }
}

impl From<AuthErrorKind> for ApiError {
    fn from(kind: AuthErrorKind) -> Self {
        match kind {
            AuthErrorKind::MissingCredentials | AuthErrorKind::InvalidCredentials => {
                Self::unauthorized(kind.message())
            }
            AuthErrorKind::Forbidden => Self::forbidden(kind.message()),
            AuthErrorKind::ServerError => Self::internal(kind.message()),
        }
    }
}

impl From<RegistrationError> for ApiError {
    fn from(e: RegistrationError) -> Self {
        match e {
            RegistrationError::DuplicateEmail | RegistrationError::DuplicateUsername => {
                Self::conflict(e.to_string())
            }
            RegistrationError::NotificationFailed => Self::db_error("Registration rolled back", e),
            RegistrationError::Internal(_) => Self::db_error("Registration failed", e),
        }
    }
}

impl From<ActivationError> for ApiError {
    fn from(e: ActivationError) -> Self {
        match e {
            ActivationError::NotFound => Self::not_found("invitation not found or expired"),
            ActivationError::Store(e) => Self::db_error("Failed to activate user", e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Successful payloads are wrapped as `{"data": ...}`.
#[derive(Serialize)]
pub struct Envelope<T> {
    pub data: T,
}

pub fn envelope<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { data })
}

/// Check a required text field against a length range (in characters).
pub fn validate_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < min {
        return Err(if min == 1 {
            ApiError::bad_request(format!("{} cannot be empty", field))
        } else {
            ApiError::bad_request(format!("{} must be at least {} characters", field, min))
        });
    }
    if len > max {
        return Err(ApiError::bad_request(format!(
            "{} cannot be longer than {} characters",
            field, max
        )));
    }
    Ok(())
}
