//! Comment storage.

use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use super::{StoreError, timed};

#[derive(Clone)]
pub struct CommentStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub created_at: String,
}

impl CommentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add a comment to a post. Returns the stored comment.
    pub async fn create(
        &self,
        post_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<Comment, StoreError> {
        let id: i64 = timed(
            sqlx::query_scalar(
                "INSERT INTO comments (post_id, user_id, content) VALUES (?, ?, ?) RETURNING id",
            )
            .bind(post_id)
            .bind(user_id)
            .bind(content)
            .fetch_one(&self.pool),
        )
        .await?;

        timed(
            sqlx::query_as(
                "SELECT c.id, c.post_id, c.user_id, u.username, c.content, c.created_at
                 FROM comments c JOIN users u ON u.id = c.user_id
                 WHERE c.id = ?",
            )
            .bind(id)
            .fetch_one(&self.pool),
        )
        .await
    }

    /// List comments on a post, newest first.
    pub async fn list_by_post(&self, post_id: i64) -> Result<Vec<Comment>, StoreError> {
        timed(
            sqlx::query_as(
                "SELECT c.id, c.post_id, c.user_id, u.username, c.content, c.created_at
                 FROM comments c JOIN users u ON u.id = c.user_id
                 WHERE c.post_id = ?
                 ORDER BY c.created_at DESC, c.id DESC",
            )
            .bind(post_id)
            .fetch_all(&self.pool),
        )
        .await
    }
}
