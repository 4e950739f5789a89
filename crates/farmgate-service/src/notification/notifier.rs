//! Best-effort notification sending.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use farmgate_core::events::{Notification, NotificationPayload};
use farmgate_core::traits::NotificationDispatcher;

/// Wraps a dispatcher so delivery failures are logged and swallowed.
///
/// Callers invoke it only after the triggering write has committed.
#[derive(Debug, Clone)]
pub struct Notifier {
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl Notifier {
    /// Creates a notifier over a dispatcher.
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Send a notification, logging any failure.
    pub async fn send(&self, at: DateTime<Utc>, payload: impl Into<NotificationPayload>) {
        let notification = Notification::new(at, payload.into());
        let kind = notification.kind();
        if let Err(e) = self.dispatcher.dispatch(notification).await {
            warn!(kind, error = %e, "Notification delivery failed");
        }
    }
}
