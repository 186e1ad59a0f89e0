use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::petitions::{Role, SystemRole, UnknownVariant, UserId};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory lookup failed: {0}")]
    Lookup(#[from] sqlx::Error),
    #[error("directory holds an invalid entry: {0}")]
    InvalidEntry(#[from] UnknownVariant),
}

/// Read-only view of approver assignments. Implementations must answer from
/// current data on every call; the engine never caches the result.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ApproverDirectory: Send + Sync {
    /// Active approver roles held by the user.
    async fn roles_for(&self, user: UserId) -> Result<HashSet<Role>, DirectoryError>;

    /// Account role, `None` for an unknown user.
    async fn system_role(&self, user: UserId) -> Result<Option<SystemRole>, DirectoryError>;
}

/// Directory backed by the `users` and `approver_assignments` tables.
#[derive(Debug, Clone)]
pub struct SqlApproverDirectory {
    pool: SqlitePool,
}

impl SqlApproverDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApproverDirectory for SqlApproverDirectory {
    async fn roles_for(&self, user: UserId) -> Result<HashSet<Role>, DirectoryError> {
        let rows = sqlx::query(
            r#"
            SELECT approver_role FROM approver_assignments
            WHERE user_id = ?1 AND is_active = 1
            "#,
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await?;

        let mut roles = HashSet::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("approver_role")?;
            roles.insert(raw.parse::<Role>()?);
        }
        Ok(roles)
    }

    async fn system_role(&self, user: UserId) -> Result<Option<SystemRole>, DirectoryError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT system_role FROM users WHERE id = ?1")
            .bind(user.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(raw.map(|r| r.parse::<SystemRole>()).transpose()?)
    }
}
