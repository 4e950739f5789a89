//! In-memory user directory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use farmgate_core::AppResult;
use farmgate_core::traits::UserDirectory;
use farmgate_core::types::UserId;

/// A user directory backed by a map of email to user id.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<RwLock<HashMap<String, UserId>>>,
}

impl MemoryUserDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return the id.
    pub async fn register(&self, email: &str) -> UserId {
        let key = email.trim().to_lowercase();
        let mut users = self.users.write().await;
        *users.entry(key).or_insert_with(UserId::new)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn resolve_email(&self, email: &str) -> AppResult<Option<UserId>> {
        let key = email.trim().to_lowercase();
        Ok(self.users.read().await.get(&key).copied())
    }

    async fn user_exists(&self, user_id: UserId) -> AppResult<bool> {
        Ok(self.users.read().await.values().any(|id| *id == user_id))
    }

    async fn email_of(&self, user_id: UserId) -> AppResult<Option<String>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|(_, id)| **id == user_id)
            .map(|(email, _)| email.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_is_idempotent_and_case_insensitive() {
        let dir = MemoryUserDirectory::new();
        let a = dir.register("Bob@X.com").await;
        let b = dir.register("bob@x.com").await;
        assert_eq!(a, b);
        assert_eq!(dir.resolve_email(" BOB@x.com ").await.unwrap(), Some(a));
        assert!(dir.user_exists(a).await.unwrap());
        assert_eq!(dir.email_of(a).await.unwrap().as_deref(), Some("bob@x.com"));
    }
}
