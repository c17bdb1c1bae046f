//! Authentication user types.

use axum::http::Method;

use crate::db::User;
use crate::jwt::Claims;

/// Identity admitted by the bearer gate, handed to handlers explicitly.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Resolved identity
    pub user: User,
    /// Verified token claims
    pub claims: Claims,
    /// Request method, kept for rejection logs further down the pipeline
    pub method: Method,
    /// Request path
    pub path: String,
}
