//! Fire-and-forget analytics recording and funnel rollups.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use farmgate_core::AppResult;
use farmgate_core::types::{FarmId, InvitationId};
use farmgate_database::AnalyticsStore;
use farmgate_entity::analytics::{AnalyticsEventType, FunnelRollup, InvitationAnalyticsEvent};
use farmgate_entity::invitation::Invitation;

/// Records funnel events. Never authoritative for access decisions, and
/// write failures never reach the caller.
#[derive(Debug, Clone)]
pub struct AnalyticsRecorder {
    store: Arc<dyn AnalyticsStore>,
    inline: bool,
}

impl AnalyticsRecorder {
    /// Creates a recorder. With `inline` set, events are written on the
    /// caller's task; otherwise on a spawned task.
    pub fn new(store: Arc<dyn AnalyticsStore>, inline: bool) -> Self {
        Self { store, inline }
    }

    /// Record an event for an invitation.
    pub async fn record(
        &self,
        invitation: &Invitation,
        event_type: AnalyticsEventType,
        metadata: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) {
        let event =
            InvitationAnalyticsEvent::new(invitation.id, invitation.farm_id, event_type, metadata, at);
        if self.inline {
            write_event(self.store.as_ref(), event).await;
        } else {
            let store = self.store.clone();
            tokio::spawn(async move { write_event(store.as_ref(), event).await });
        }
    }

    /// Funnel counts and rates for a farm since `since`.
    pub async fn funnel(&self, farm_id: FarmId, since: DateTime<Utc>) -> AppResult<FunnelRollup> {
        let events = self.store.farm_events(farm_id, since).await?;
        Ok(FunnelRollup::from_events(farm_id, since, &events))
    }

    /// Every event for one invitation, oldest first.
    pub async fn timeline(
        &self,
        invitation_id: InvitationId,
    ) -> AppResult<Vec<InvitationAnalyticsEvent>> {
        self.store.invitation_events(invitation_id).await
    }

    /// Delete events older than `cutoff`.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        self.store.prune_events_before(cutoff).await
    }
}

async fn write_event(store: &dyn AnalyticsStore, event: InvitationAnalyticsEvent) {
    let invitation_id = event.invitation_id;
    let event_type = event.event_type;
    if let Err(e) = store.record_event(event).await {
        warn!(
            %invitation_id,
            event_type = event_type.as_str(),
            error = %e,
            "Failed to record analytics event"
        );
    }
}
