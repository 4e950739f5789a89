//! User directory over the `users` table.

use async_trait::async_trait;
use sqlx::PgPool;

use farmgate_core::AppResult;
use farmgate_core::traits::UserDirectory;
use farmgate_core::types::UserId;

use super::db_error;

/// Resolves users through the shared `users` table.
#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    /// Create a directory over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn resolve_email(&self, email: &str) -> AppResult<Option<UserId>> {
        sqlx::query_scalar("SELECT id FROM users WHERE lower(email) = lower($1)")
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to resolve user email"))
    }

    async fn user_exists(&self, user_id: UserId) -> AppResult<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to look up user"))
    }

    async fn email_of(&self, user_id: UserId) -> AppResult<Option<String>> {
        sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to look up user email"))
    }
}
