//! Authentication error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Terminal rejection classes of the authorization gate.
///
/// Externally, every malformed, invalid or expired credential is the same
/// `InvalidCredentials`; which check failed is never revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    MissingCredentials,
    InvalidCredentials,
    Forbidden,
    ServerError,
}

impl AuthErrorKind {
    /// Stable classification used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorKind::MissingCredentials => "missing_credentials",
            AuthErrorKind::InvalidCredentials => "invalid_credentials",
            AuthErrorKind::Forbidden => "forbidden",
            AuthErrorKind::ServerError => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthErrorKind::MissingCredentials | AuthErrorKind::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            AuthErrorKind::Forbidden => StatusCode::FORBIDDEN,
            AuthErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthErrorKind::MissingCredentials | AuthErrorKind::InvalidCredentials => "unauthorized",
            AuthErrorKind::Forbidden => "forbidden",
            AuthErrorKind::ServerError => "the server encountered an internal error",
        }
    }
}

/// Which authentication scheme a 401 should challenge for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    Bearer,
    Basic,
}

impl Challenge {
    fn header_value(&self) -> HeaderValue {
        match self {
            Challenge::Bearer => HeaderValue::from_static("Bearer"),
            Challenge::Basic => HeaderValue::from_static(r#"Basic realm="restricted", charset="UTF-8""#),
        }
    }
}

/// Authentication rejection returned by the gate extractors.
#[derive(Debug)]
pub struct ApiAuthError {
    pub kind: AuthErrorKind,
    pub challenge: Challenge,
}

impl ApiAuthError {
    pub fn new(kind: AuthErrorKind, challenge: Challenge) -> Self {
        Self { kind, challenge }
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
        }

        let mut response = (
            self.kind.status_code(),
            Json(ErrorResponse {
                error: self.kind.message(),
            }),
        )
            .into_response();

        if response.status() == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, self.challenge.header_value());
        }

        response
    }
}
