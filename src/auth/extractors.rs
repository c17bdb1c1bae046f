//! Axum extractors for authentication.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use super::basic::verify_basic;
use super::errors::{ApiAuthError, AuthErrorKind, Challenge};
use super::gate::{Rejection, authorize_bearer};
use super::state::{HasAuthBackend, HasBasicAuth};
use super::types::AuthenticatedUser;

/// One record per rejected request; server faults at error level.
fn log_rejection(parts: &Parts, rejection: &Rejection, scheme: &str) {
    let cause = rejection.cause.as_deref().unwrap_or("");
    if rejection.kind == AuthErrorKind::ServerError {
        tracing::error!(
            method = %parts.method,
            path = %parts.uri.path(),
            scheme,
            kind = rejection.kind.as_str(),
            cause,
            "Authorization failed"
        );
    } else {
        tracing::warn!(
            method = %parts.method,
            path = %parts.uri.path(),
            scheme,
            kind = rejection.kind.as_str(),
            "Authorization rejected"
        );
    }
}

/// Extractor for endpoints that require a bearer token.
/// Verifies the token, then resolves its subject through the identity cache.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(header::AUTHORIZATION);

        match authorize_bearer(header, state.jwt(), state.identities()).await {
            Ok((user, claims)) => Ok(Auth(AuthenticatedUser {
                user,
                claims,
                method: parts.method.clone(),
                path: parts.uri.path().to_string(),
            })),
            Err(rejection) => {
                log_rejection(parts, &rejection, "bearer");
                Err(ApiAuthError::new(rejection.kind, Challenge::Bearer))
            }
        }
    }
}

/// Extractor for operational endpoints behind HTTP Basic credentials.
pub struct BasicAuth;

impl<S> FromRequestParts<S> for BasicAuth
where
    S: HasBasicAuth + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let result = match parts.headers.get(header::AUTHORIZATION) {
            None => Err(AuthErrorKind::MissingCredentials),
            Some(value) => value
                .to_str()
                .map_err(|_| AuthErrorKind::InvalidCredentials)
                .and_then(|value| verify_basic(value, state.basic_auth())),
        };

        result.map(|_| BasicAuth).map_err(|kind| {
            log_rejection(parts, &kind.into(), "basic");
            ApiAuthError::new(kind, Challenge::Basic)
        })
    }
}
