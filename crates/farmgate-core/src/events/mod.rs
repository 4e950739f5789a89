//! Notification payloads emitted by Farmgate operations.
//!
//! Roles and permissions are carried as their string names so that this
//! crate stays free of entity dependencies.

pub mod access;
pub mod invitation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use access::AccessNotification;
pub use invitation::InvitationNotification;

/// A message for the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// When the triggering state change happened.
    pub timestamp: DateTime<Utc>,
    /// The payload.
    pub payload: NotificationPayload,
}

/// Union of all notification types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event")]
pub enum NotificationPayload {
    /// An invitation-related message.
    Invitation(InvitationNotification),
    /// An access-related message.
    Access(AccessNotification),
}

impl Notification {
    /// Create a new notification.
    pub fn new(timestamp: DateTime<Utc>, payload: NotificationPayload) -> Self {
        Self { timestamp, payload }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            NotificationPayload::Invitation(n) => n.kind(),
            NotificationPayload::Access(n) => n.kind(),
        }
    }
}

impl From<InvitationNotification> for NotificationPayload {
    fn from(n: InvitationNotification) -> Self {
        Self::Invitation(n)
    }
}

impl From<AccessNotification> for NotificationPayload {
    fn from(n: AccessNotification) -> Self {
        Self::Access(n)
    }
}
