use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::petitions::{SignatureId, UserId};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature lookup failed: {0}")]
    Lookup(#[from] sqlx::Error),
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Newest active signature of the user, if any.
    async fn active_signature(&self, user: UserId) -> Result<Option<SignatureId>, SignatureError>;

    async fn has_active_signature(&self, user: UserId) -> Result<bool, SignatureError> {
        Ok(self.active_signature(user).await?.is_some())
    }
}

/// Reads the `signature_images` table; uploads are handled elsewhere.
#[derive(Debug, Clone)]
pub struct SqlSignatureStore {
    pool: SqlitePool,
}

impl SqlSignatureStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignatureStore for SqlSignatureStore {
    async fn active_signature(&self, user: UserId) -> Result<Option<SignatureId>, SignatureError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM signature_images
            WHERE user_id = ?1 AND is_active = 1
            ORDER BY uploaded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id.map(SignatureId))
    }
}
