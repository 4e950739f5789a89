//! Built-in notification dispatchers.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use farmgate_core::events::Notification;
use farmgate_core::traits::NotificationDispatcher;
use farmgate_core::{AppError, AppResult};

/// Logs every notification at `info` and delivers nothing.
#[derive(Debug, Clone, Default)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn dispatch(&self, notification: Notification) -> AppResult<()> {
        let payload = serde_json::to_string(&notification.payload)?;
        info!(kind = notification.kind(), %payload, "Notification dispatched");
        Ok(())
    }
}

/// Drops every notification.
#[derive(Debug, Clone, Default)]
pub struct NoopDispatcher;

#[async_trait]
impl NotificationDispatcher for NoopDispatcher {
    async fn dispatch(&self, _notification: Notification) -> AppResult<()> {
        Ok(())
    }
}

/// Forwards notifications into an unbounded channel.
///
/// The receiving side is typically a delivery task or a test.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelDispatcher {
    /// Creates a dispatcher and the receiver for its notifications.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationDispatcher for ChannelDispatcher {
    async fn dispatch(&self, notification: Notification) -> AppResult<()> {
        self.tx
            .send(notification)
            .map_err(|_| AppError::internal("Notification channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use farmgate_core::events::AccessNotification;
    use farmgate_core::types::{FarmId, UserId};

    use super::*;

    fn notification() -> Notification {
        Notification::new(
            Utc::now(),
            AccessNotification::Changed {
                farm_id: FarmId::new(),
                user_id: UserId::new(),
                actor_id: UserId::new(),
                action: "access_revoked".into(),
                reason: None,
            }
            .into(),
        )
    }

    #[tokio::test]
    async fn test_channel_dispatcher_forwards_and_reports_closed_channel() {
        let (dispatcher, mut rx) = ChannelDispatcher::new();
        dispatcher.dispatch(notification()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind(), "access.changed");

        drop(rx);
        assert!(dispatcher.dispatch(notification()).await.is_err());
    }
}
