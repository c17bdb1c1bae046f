//! Role catalog.

use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use super::{StoreError, timed};

/// A named privilege level. Higher levels dominate lower ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Role {
    pub name: String,
    pub level: i32,
}

#[derive(Clone)]
pub struct RoleStore {
    pool: SqlitePool,
}

impl RoleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a role by name.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        timed(
            sqlx::query_as::<_, Role>("SELECT name, level FROM roles WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[tokio::test]
    async fn test_seeded_roles_are_ordered() {
        let db = Database::open(":memory:").await.unwrap();
        let roles = db.roles();

        let user = roles.get_by_name("user").await.unwrap().unwrap();
        let moderator = roles.get_by_name("moderator").await.unwrap().unwrap();
        let admin = roles.get_by_name("admin").await.unwrap().unwrap();

        assert!(user.level < moderator.level);
        assert!(moderator.level < admin.level);
    }

    #[tokio::test]
    async fn test_unknown_role() {
        let db = Database::open(":memory:").await.unwrap();
        assert!(db.roles().get_by_name("owner").await.unwrap().is_none());
    }
}
