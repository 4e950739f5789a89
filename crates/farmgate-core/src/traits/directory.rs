//! User directory trait.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::id::UserId;

/// Identity lookups provided by the surrounding application.
#[async_trait]
pub trait UserDirectory: Send + Sync + std::fmt::Debug + 'static {
    /// Resolve an email address to a registered user, if any.
    async fn resolve_email(&self, email: &str) -> AppResult<Option<UserId>>;

    /// Check that a user id belongs to a registered user.
    async fn user_exists(&self, user_id: UserId) -> AppResult<bool>;

    /// Return the email address registered for a user.
    async fn email_of(&self, user_id: UserId) -> AppResult<Option<String>>;
}
