//! Notification dispatcher trait.

use async_trait::async_trait;

use crate::events::Notification;
use crate::result::AppResult;

/// Out-of-band delivery of invitation and access messages (email, push).
///
/// The engine calls the dispatcher only after the triggering state write
/// has succeeded and never depends on its result for correctness.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync + std::fmt::Debug + 'static {
    /// Deliver a notification.
    async fn dispatch(&self, notification: Notification) -> AppResult<()>;
}
