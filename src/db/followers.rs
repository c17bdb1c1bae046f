//! Follow relationships between users.

use sqlx::sqlite::SqlitePool;

use super::{StoreError, timed};

#[derive(Clone)]
pub struct FollowerStore {
    pool: SqlitePool,
}

impl FollowerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Make `follower_id` follow `user_id`. Following twice is a `Conflict`.
    pub async fn follow(&self, user_id: i64, follower_id: i64) -> Result<(), StoreError> {
        let result = timed(
            sqlx::query("INSERT INTO followers (user_id, follower_id) VALUES (?, ?)")
                .bind(user_id)
                .bind(follower_id)
                .execute(&self.pool),
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(StoreError::Sqlx(sqlx::Error::Database(e))) if e.is_unique_violation() => {
                Err(StoreError::Conflict)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a follow edge. Unfollowing someone not followed is a no-op.
    pub async fn unfollow(&self, user_id: i64, follower_id: i64) -> Result<(), StoreError> {
        timed(
            sqlx::query("DELETE FROM followers WHERE user_id = ? AND follower_id = ?")
                .bind(user_id)
                .bind(follower_id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}
