//! Post storage with optimistic concurrency control.
//!
//! Every post carries a `version`. Updates are conditioned on the version the
//! caller last read and bump it in the same statement, so concurrent writers
//! collide instead of overwriting each other.

use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use super::{Comment, StoreError, timed};

#[derive(Clone)]
pub struct PostStore {
    pool: SqlitePool,
}

/// A versioned post.
#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<Comment>>,
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: i64,
    user_id: i64,
    title: String,
    content: String,
    tags: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PostRow> for Post {
    type Error = StoreError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let tags = serde_json::from_str(&row.tags)
            .map_err(|e| StoreError::Corrupt(format!("tags of post {}: {}", row.id, e)))?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            content: row.content,
            tags,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            comments: None,
        })
    }
}

/// Fields for a new post.
#[derive(Debug, Clone)]
pub struct NewPost<'a> {
    pub user_id: i64,
    pub title: &'a str,
    pub content: &'a str,
    pub tags: &'a [String],
}

impl PostStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new post at version 0.
    pub async fn create(&self, post: &NewPost<'_>) -> Result<Post, StoreError> {
        let tags = serde_json::to_string(post.tags)
            .map_err(|e| StoreError::Corrupt(format!("tags of new post: {}", e)))?;
        let row: PostRow = timed(
            sqlx::query_as(
                "INSERT INTO posts (user_id, title, content, tags) VALUES (?, ?, ?, ?)
                 RETURNING id, user_id, title, content, tags, version, created_at, updated_at",
            )
            .bind(post.user_id)
            .bind(post.title)
            .bind(post.content)
            .bind(&tags)
            .fetch_one(&self.pool),
        )
        .await?;
        Post::try_from(row)
    }

    /// Get a post by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Post>, StoreError> {
        let row: Option<PostRow> = timed(
            sqlx::query_as(
                "SELECT id, user_id, title, content, tags, version, created_at, updated_at
                 FROM posts WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await?;
        row.map(Post::try_from).transpose()
    }

    /// Update a post only if it is still at `expected_version`, incrementing
    /// the version and `updated_at` in the same statement. Returns the post
    /// as stored.
    ///
    /// Zero affected rows means either the post is gone or someone else
    /// updated it first; both surface as `VersionConflict`. No retry is
    /// attempted here.
    pub async fn update_versioned(
        &self,
        id: i64,
        expected_version: i64,
        title: &str,
        content: &str,
    ) -> Result<Post, StoreError> {
        let row: Option<PostRow> = timed(
            sqlx::query_as(
                "UPDATE posts SET title = ?, content = ?, version = version + 1, updated_at = datetime('now')
                 WHERE id = ? AND version = ?
                 RETURNING id, user_id, title, content, tags, version, created_at, updated_at",
            )
            .bind(title)
            .bind(content)
            .bind(id)
            .bind(expected_version)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.ok_or(StoreError::VersionConflict)
            .and_then(Post::try_from)
    }

    /// Delete a post by ID. Returns true if a post was deleted.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = timed(
            sqlx::query("DELETE FROM posts WHERE id = ?")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn insert_owner(db: &Database) -> i64 {
        sqlx::query_scalar(
            "INSERT INTO users (username, email, password, role_id, activated)
             VALUES ('owner', 'owner@example.com', 'x', 1, 1) RETURNING id",
        )
        .fetch_one(db.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_update_increments_version_by_one() {
        let db = Database::open(":memory:").await.unwrap();
        let owner = insert_owner(&db).await;
        let tags = vec!["rust".to_string()];
        let post = db
            .posts()
            .create(&NewPost {
                user_id: owner,
                title: "hello",
                content: "world",
                tags: &tags,
            })
            .await
            .unwrap();
        assert_eq!(post.version, 0);
        assert_eq!(post.tags, tags);

        let updated = db
            .posts()
            .update_versioned(post.id, 0, "hello", "again")
            .await
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.content, "again");
        assert_eq!(updated.tags, tags);

        // The stale version is rejected, not reconciled
        let err = db
            .posts()
            .update_versioned(post.id, 0, "hello", "lost update")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict));

        let stored = db.posts().get_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "again");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_update_missing_post_conflicts() {
        let db = Database::open(":memory:").await.unwrap();
        let err = db
            .posts()
            .update_versioned(42, 0, "t", "c")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict));
    }

    #[tokio::test]
    async fn test_concurrent_updates_from_same_version() {
        let db = Database::open(":memory:").await.unwrap();
        let owner = insert_owner(&db).await;
        sqlx::query(
            "INSERT INTO posts (id, user_id, title, content, version) VALUES (7, ?, 't', 'c', 3)",
        )
        .bind(owner)
        .execute(db.pool())
        .await
        .unwrap();

        let first = db.posts();
        let second = db.posts();
        let (a, b) = tokio::join!(
            first.update_versioned(7, 3, "t", "from a"),
            second.update_versioned(7, 3, "t", "from b"),
        );

        let outcomes = [a, b];
        let successes: Vec<i64> = outcomes
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|post| post.version))
            .collect();
        assert_eq!(successes, vec![4]);
        assert!(
            outcomes
                .iter()
                .any(|r| matches!(r, Err(StoreError::VersionConflict)))
        );

        let stored = db.posts().get_by_id(7).await.unwrap().unwrap();
        assert_eq!(stored.version, 4);
    }

    #[tokio::test]
    async fn test_unreadable_tags_are_reported() {
        let db = Database::open(":memory:").await.unwrap();
        let owner = insert_owner(&db).await;
        sqlx::query(
            "INSERT INTO posts (id, user_id, title, content, tags) VALUES (9, ?, 't', 'c', 'not json')",
        )
        .bind(owner)
        .execute(db.pool())
        .await
        .unwrap();

        let err = db.posts().get_by_id(9).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)), "{:?}", err);
    }
}
