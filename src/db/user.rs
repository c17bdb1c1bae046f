use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;

use super::{QUERY_TIMEOUT, Role, StoreError, timed, unix_now};

macro_rules! select_user {
    ($filter:literal) => {
        concat!(
            "SELECT u.id, u.username, u.email, u.password, u.activated, u.created_at, ",
            "r.name AS role_name, r.level AS role_level ",
            "FROM users u JOIN roles r ON r.id = u.role_id ",
            $filter
        )
    };
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// A persisted identity. The password is only ever held as an argon2 hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub activated: bool,
    pub role: Role,
    pub created_at: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password: String,
    activated: bool,
    created_at: String,
    role_name: String,
    role_level: i32,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password,
            activated: row.activated,
            role: Role {
                name: row.role_name,
                level: row.role_level,
            },
            created_at: row.created_at,
        }
    }
}

/// A user that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    /// Name of the role to assign, resolved against the role catalog on insert.
    pub role: String,
}

/// The stored half of an invitation. The plaintext token is never persisted.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub token_hash: String,
    /// Unix timestamp (seconds) after which the invitation can no longer be used.
    pub expires_at: i64,
}

impl Invitation {
    /// Issue a fresh invitation. Returns the plaintext token alongside the
    /// record to store.
    pub fn issue(ttl: Duration) -> (String, Self) {
        let plaintext = uuid::Uuid::new_v4().to_string();
        let invitation = Self {
            token_hash: hash_invitation_token(&plaintext),
            expires_at: unix_now() + ttl.as_secs() as i64,
        };
        (plaintext, invitation)
    }
}

/// SHA-256 of a plaintext invitation token, hex encoded.
pub fn hash_invitation_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Map unique-constraint violations on insert to their domain errors.
fn classify_insert_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            let message = db_err.message();
            if message.contains("users.email") {
                return StoreError::DuplicateEmail;
            }
            if message.contains("users.username") {
                return StoreError::DuplicateUsername;
            }
            return StoreError::Conflict;
        }
    }
    StoreError::Sqlx(e)
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pending user and its invitation in one transaction.
    /// Either both rows are committed or neither is.
    pub async fn create_and_invite(
        &self,
        user: &NewUser,
        invitation: &Invitation,
    ) -> Result<User, StoreError> {
        let created = tokio::time::timeout(QUERY_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            let id: i64 = sqlx::query_scalar(
                "INSERT INTO users (username, email, password, role_id)
                 VALUES (?, ?, ?, (SELECT id FROM roles WHERE name = ?))
                 RETURNING id",
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.role)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO invitations (token_hash, user_id, expires_at) VALUES (?, ?, ?)")
                .bind(&invitation.token_hash)
                .bind(id)
                .bind(invitation.expires_at)
                .execute(&mut *tx)
                .await?;

            let row: UserRow = sqlx::query_as(select_user!("WHERE u.id = ?"))
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<_, sqlx::Error>(User::from(row))
        })
        .await
        .map_err(|_| StoreError::Timeout)?;

        created.map_err(classify_insert_error)
    }

    /// Consume an invitation and activate its user.
    /// Returns the activated user's ID, or `NotFound` if the token is unknown,
    /// expired, or already used.
    pub async fn activate(&self, token_hash: &str) -> Result<i64, StoreError> {
        let now = unix_now();
        let activated = timed(async {
            let mut tx = self.pool.begin().await?;

            let user_id: Option<i64> = sqlx::query_scalar(
                "SELECT user_id FROM invitations WHERE token_hash = ? AND expires_at > ?",
            )
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(user_id) = user_id else {
                return Ok::<_, sqlx::Error>(None);
            };

            sqlx::query("UPDATE users SET activated = 1 WHERE id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM invitations WHERE user_id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(Some(user_id))
        })
        .await?;

        activated.ok_or(StoreError::NotFound)
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = timed(
            sqlx::query_as(select_user!("WHERE u.id = ?"))
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::from))
    }

    /// Get an activated user by email.
    pub async fn get_activated_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = timed(
            sqlx::query_as(select_user!("WHERE u.email = ? AND u.activated = 1"))
                .bind(email)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::from))
    }

    /// Set the role for a user.
    pub async fn set_role(&self, id: i64, role: &str) -> Result<bool, StoreError> {
        let result = timed(
            sqlx::query("UPDATE users SET role_id = (SELECT id FROM roles WHERE name = ?) WHERE id = ?")
                .bind(role)
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a user by ID. Invitations, posts and comments cascade.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = timed(
            sqlx::query("DELETE FROM users WHERE id = ?")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete pending users that no longer hold a usable invitation.
    pub async fn cleanup_pending(&self) -> Result<u64, StoreError> {
        let result = timed(
            sqlx::query(
                "DELETE FROM users WHERE activated = 0 AND NOT EXISTS (
                    SELECT 1 FROM invitations i WHERE i.user_id = users.id AND i.expires_at > ?
                )",
            )
            .bind(unix_now())
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete expired invitations.
    pub async fn delete_expired_invitations(&self) -> Result<u64, StoreError> {
        let result = timed(
            sqlx::query("DELETE FROM invitations WHERE expires_at <= ?")
                .bind(unix_now())
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }
}
