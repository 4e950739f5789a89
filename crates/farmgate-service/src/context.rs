//! Request context carrying the acting user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use farmgate_core::types::UserId;

/// Context for one caller-initiated operation.
///
/// Built by the surrounding application for every user action and passed
/// into service methods so each operation knows who is acting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// The acting user.
    pub actor_id: UserId,
    /// Correlation id for logs.
    pub request_id: Uuid,
    /// When the request was received.
    pub request_time: DateTime<Utc>,
}

impl RequestContext {
    /// Creates a context for an actor.
    pub fn new(actor_id: UserId) -> Self {
        Self {
            actor_id,
            request_id: Uuid::new_v4(),
            request_time: Utc::now(),
        }
    }

    /// Context for work started by the engine itself, such as sweeps.
    pub fn system() -> Self {
        Self::new(UserId::from_uuid(Uuid::nil()))
    }

    /// Returns whether this is a system context.
    pub fn is_system(&self) -> bool {
        self.actor_id.as_uuid().is_nil()
    }
}
