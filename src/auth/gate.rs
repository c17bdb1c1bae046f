//! Bearer authorization state machine.

use axum::http::HeaderValue;

use super::errors::AuthErrorKind;
use crate::db::User;
use crate::identity::{IdentityResolver, ResolveError};
use crate::jwt::{Claims, JwtConfig};

/// Split `"<scheme> <credential>"`, requiring an exact scheme match and
/// exactly one space-separated credential.
pub fn split_scheme<'a>(value: &'a str, scheme: &str) -> Result<&'a str, AuthErrorKind> {
    let mut parts = value.split(' ');
    let (Some(found), Some(credential), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AuthErrorKind::InvalidCredentials);
    };

    if found != scheme || credential.is_empty() {
        return Err(AuthErrorKind::InvalidCredentials);
    }

    Ok(credential)
}

/// Read an `Authorization` header for the given scheme.
pub fn parse_authorization<'a>(
    header: Option<&'a HeaderValue>,
    scheme: &str,
) -> Result<&'a str, AuthErrorKind> {
    let value = header.ok_or(AuthErrorKind::MissingCredentials)?;
    let value = value
        .to_str()
        .map_err(|_| AuthErrorKind::InvalidCredentials)?;
    split_scheme(value, scheme)
}

/// A bearer gate refusal, with the underlying failure when there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: AuthErrorKind,
    pub cause: Option<String>,
}

impl From<AuthErrorKind> for Rejection {
    fn from(kind: AuthErrorKind) -> Self {
        Self { kind, cause: None }
    }
}

/// Run the bearer gate: parse, verify, then resolve the subject.
///
/// Nothing is logged here; the caller records the rejection once.
pub async fn authorize_bearer(
    header: Option<&HeaderValue>,
    jwt: &JwtConfig,
    identities: &IdentityResolver,
) -> Result<(User, Claims), Rejection> {
    let token = parse_authorization(header, "Bearer")?;

    let claims = jwt
        .verify_bearer(token)
        .map_err(|_| AuthErrorKind::InvalidCredentials)?;

    let user_id = claims.user_id().ok_or(AuthErrorKind::InvalidCredentials)?;

    match identities.resolve(user_id).await {
        Ok(user) => Ok((user, claims)),
        Err(ResolveError::NotFound) => Err(AuthErrorKind::InvalidCredentials.into()),
        Err(e) => Err(Rejection {
            kind: AuthErrorKind::ServerError,
            cause: Some(format!("resolve user {}: {}", user_id, e)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Invitation, NewUser};
    use crate::identity::IdentitySource;
    use crate::jwt::DEFAULT_TOKEN_EXPIRY;
    use std::sync::Arc;
    use std::time::Duration;

    fn jwt() -> JwtConfig {
        JwtConfig::new(
            b"gate-test-secret-gate-test-secret",
            "hubgate",
            "hubgate",
            DEFAULT_TOKEN_EXPIRY,
        )
    }

    async fn setup() -> (Database, IdentityResolver, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let (_, invitation) = Invitation::issue(Duration::from_secs(60));
        let user = db
            .users()
            .create_and_invite(
                &NewUser {
                    username: "alice".to_string(),
                    email: "alice@example.com".to_string(),
                    password_hash: "x".to_string(),
                    role: "user".to_string(),
                },
                &invitation,
            )
            .await
            .unwrap();
        let source: Arc<dyn IdentitySource> = Arc::new(db.clone());
        (db, IdentityResolver::new(source, None), user.id)
    }

    #[test]
    fn test_split_scheme() {
        assert_eq!(split_scheme("Bearer abc", "Bearer"), Ok("abc"));

        for value in ["", "Bearer", "Bearer ", "bearer abc", "Bearer a b", "Basic abc", " Bearer abc"] {
            assert_eq!(
                split_scheme(value, "Bearer"),
                Err(AuthErrorKind::InvalidCredentials),
                "value {:?}",
                value
            );
        }
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(
            parse_authorization(None, "Bearer"),
            Err(AuthErrorKind::MissingCredentials)
        );
    }

    #[test]
    fn test_non_ascii_header_is_invalid() {
        let value = HeaderValue::from_bytes(b"Bearer \xff\xfe").unwrap();
        assert_eq!(
            parse_authorization(Some(&value), "Bearer"),
            Err(AuthErrorKind::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_admits_valid_token() {
        let (_db, identities, id) = setup().await;
        let jwt = jwt();
        let token = jwt.generate_token(id).unwrap().token;
        let header = HeaderValue::from_str(&format!("Bearer {}", token)).unwrap();

        let (user, claims) = authorize_bearer(Some(&header), &jwt, &identities)
            .await
            .unwrap();
        assert_eq!(user.id, id);
        assert_eq!(claims.user_id(), Some(id));
    }

    #[tokio::test]
    async fn test_unknown_subject_is_invalid_credentials() {
        let (_db, identities, id) = setup().await;
        let jwt = jwt();
        let token = jwt.generate_token(id + 100).unwrap().token;
        let header = HeaderValue::from_str(&format!("Bearer {}", token)).unwrap();

        assert_eq!(
            authorize_bearer(Some(&header), &jwt, &identities).await.unwrap_err(),
            Rejection::from(AuthErrorKind::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let (db, identities, id) = setup().await;
        let jwt = jwt();
        let token = jwt.generate_token(id).unwrap().token;
        let header = HeaderValue::from_str(&format!("Bearer {}", token)).unwrap();

        db.pool().close().await;

        let rejection = authorize_bearer(Some(&header), &jwt, &identities)
            .await
            .unwrap_err();
        assert_eq!(rejection.kind, AuthErrorKind::ServerError);
        let cause = rejection.cause.unwrap();
        assert!(cause.starts_with(&format!("resolve user {}", id)), "{}", cause);
    }

    #[tokio::test]
    async fn test_tampered_token_is_invalid_credentials() {
        let (_db, identities, id) = setup().await;
        let jwt = jwt();
        let mut token = jwt.generate_token(id).unwrap().token;
        token.push('x');
        let header = HeaderValue::from_str(&format!("Bearer {}", token)).unwrap();

        assert_eq!(
            authorize_bearer(Some(&header), &jwt, &identities).await.unwrap_err(),
            Rejection::from(AuthErrorKind::InvalidCredentials)
        );
    }
}
