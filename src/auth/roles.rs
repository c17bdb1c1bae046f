//! Role precedence and resource ownership checks.

use async_trait::async_trait;

use super::errors::AuthErrorKind;
use super::types::AuthenticatedUser;
use crate::db::{Database, Role, StoreError, User};

/// Source of role definitions.
#[async_trait]
pub trait RoleCatalog: Send + Sync {
    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;
}

#[async_trait]
impl RoleCatalog for Database {
    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        self.roles().get_by_name(name).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    #[error("role not found: {0}")]
    RoleNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Whether `user` holds at least the privilege of `required`.
pub async fn role_precedence<C>(catalog: &C, user: &User, required: &str) -> Result<bool, RoleError>
where
    C: RoleCatalog + ?Sized,
{
    let role = catalog
        .get_role_by_name(required)
        .await?
        .ok_or_else(|| RoleError::RoleNotFound(required.to_string()))?;

    Ok(user.role.level >= role.level)
}

/// Allow the owner of a resource, or anyone at or above `min_role`.
pub async fn check_resource_ownership<C>(
    catalog: &C,
    current: &AuthenticatedUser,
    owner_id: i64,
    min_role: &str,
) -> Result<(), AuthErrorKind>
where
    C: RoleCatalog + ?Sized,
{
    if current.user.id == owner_id {
        return Ok(());
    }

    match role_precedence(catalog, &current.user, min_role).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::warn!(
                method = %current.method,
                path = %current.path,
                user_id = current.user.id,
                owner_id,
                kind = AuthErrorKind::Forbidden.as_str(),
                "Ownership check rejected request"
            );
            Err(AuthErrorKind::Forbidden)
        }
        Err(e) => {
            tracing::error!(
                method = %current.method,
                path = %current.path,
                user_id = current.user.id,
                owner_id,
                role = min_role,
                error = %e,
                "Ownership check failed on role lookup"
            );
            Err(AuthErrorKind::ServerError)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::Claims;
    use axum::http::Method;

    struct StaticCatalog;

    #[async_trait]
    impl RoleCatalog for StaticCatalog {
        async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
            let level = match name {
                "user" => 1,
                "moderator" => 2,
                "admin" => 3,
                _ => return Ok(None),
            };
            Ok(Some(Role {
                name: name.to_string(),
                level,
            }))
        }
    }

    fn current(id: i64, role: &str, level: i32) -> AuthenticatedUser {
        AuthenticatedUser {
            user: User {
                id,
                username: format!("user{}", id),
                email: format!("user{}@example.com", id),
                password_hash: String::new(),
                activated: true,
                role: Role {
                    name: role.to_string(),
                    level,
                },
                created_at: String::new(),
            },
            claims: Claims {
                sub: id.to_string(),
                iss: "hubgate".to_string(),
                aud: "hubgate".to_string(),
                iat: 0,
                exp: 0,
                nbf: 0,
            },
            method: Method::PATCH,
            path: "/v1/posts/1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_owner_bypasses_role_check() {
        let owner = current(5, "user", 1);
        assert_eq!(
            check_resource_ownership(&StaticCatalog, &owner, 5, "admin").await,
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_non_owner_below_role_is_forbidden() {
        let other = current(6, "user", 1);
        assert_eq!(
            check_resource_ownership(&StaticCatalog, &other, 5, "moderator").await,
            Err(AuthErrorKind::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_higher_role_is_allowed() {
        let moderator = current(6, "moderator", 2);
        assert_eq!(
            check_resource_ownership(&StaticCatalog, &moderator, 5, "moderator").await,
            Ok(())
        );
        assert_eq!(
            check_resource_ownership(&StaticCatalog, &moderator, 5, "admin").await,
            Err(AuthErrorKind::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_unknown_role_is_server_error() {
        let other = current(6, "admin", 3);
        assert!(matches!(
            role_precedence(&StaticCatalog, &other.user, "owner").await,
            Err(RoleError::RoleNotFound(_))
        ));
        assert_eq!(
            check_resource_ownership(&StaticCatalog, &other, 5, "owner").await,
            Err(AuthErrorKind::ServerError)
        );
    }

    #[tokio::test]
    async fn test_precedence_against_database() {
        let db = Database::open(":memory:").await.unwrap();
        let admin = current(1, "admin", 3);
        assert!(role_precedence(&db, &admin.user, "moderator").await.unwrap());
        assert!(!role_precedence(&db, &current(2, "user", 1).user, "admin")
            .await
            .unwrap());
    }
}
