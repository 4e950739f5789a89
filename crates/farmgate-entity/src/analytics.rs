//! Invitation funnel analytics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use farmgate_core::types::{AnalyticsEventId, FarmId, InvitationId};

/// A step in the invitation funnel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "analytics_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    /// The invitation row was created.
    Created,
    /// The invitation was sent.
    Sent,
    /// Delivery was confirmed.
    Delivered,
    /// The message was opened.
    Opened,
    /// The link was clicked.
    Clicked,
    /// The invitation page was viewed.
    Viewed,
    /// The invitee accepted.
    Accepted,
    /// The invitee declined.
    Rejected,
    /// The invitation expired.
    Expired,
    /// The invitation was cancelled.
    Cancelled,
    /// A reminder was sent.
    ReminderSent,
}

impl AnalyticsEventType {
    /// Return the event type as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Viewed => "viewed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::ReminderSent => "reminder_sent",
        }
    }
}

impl fmt::Display for AnalyticsEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One funnel event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationAnalyticsEvent {
    /// Unique event identifier.
    pub id: AnalyticsEventId,
    /// The invitation.
    pub invitation_id: InvitationId,
    /// The farm, denormalised for rollups.
    pub farm_id: FarmId,
    /// The funnel step.
    pub event_type: AnalyticsEventType,
    /// Extra context (reminder number, user agent, ...).
    pub metadata: Option<serde_json::Value>,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
}

impl InvitationAnalyticsEvent {
    /// Build an event.
    pub fn new(
        invitation_id: InvitationId,
        farm_id: FarmId,
        event_type: AnalyticsEventType,
        metadata: Option<serde_json::Value>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AnalyticsEventId::new(),
            invitation_id,
            farm_id,
            event_type,
            metadata,
            occurred_at,
        }
    }
}

/// Funnel counts and conversion rates for a farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelRollup {
    /// The farm.
    pub farm_id: FarmId,
    /// Window start.
    pub since: DateTime<Utc>,
    /// Distinct invitations per funnel step.
    pub counts: BTreeMap<AnalyticsEventType, u64>,
    /// Opened over sent, in percent.
    pub open_rate: f64,
    /// Clicked over sent, in percent.
    pub click_rate: f64,
    /// Accepted over sent, in percent.
    pub acceptance_rate: f64,
}

impl FunnelRollup {
    /// Aggregate events. Each invitation counts at most once per step, so
    /// repeated opens or clicks do not inflate the rates.
    pub fn from_events<'a>(
        farm_id: FarmId,
        since: DateTime<Utc>,
        events: impl IntoIterator<Item = &'a InvitationAnalyticsEvent>,
    ) -> Self {
        let mut seen = std::collections::BTreeSet::new();
        let mut counts: BTreeMap<AnalyticsEventType, u64> = BTreeMap::new();
        for event in events {
            if event.farm_id != farm_id || event.occurred_at < since {
                continue;
            }
            if event.event_type != AnalyticsEventType::ReminderSent
                && !seen.insert((event.invitation_id, event.event_type))
            {
                continue;
            }
            *counts.entry(event.event_type).or_default() += 1;
        }

        let count = |t: AnalyticsEventType| counts.get(&t).copied().unwrap_or(0);
        let sent = count(AnalyticsEventType::Sent);
        let rate = |n: u64| {
            if sent == 0 {
                0.0
            } else {
                (n as f64 / sent as f64 * 100.0).min(100.0)
            }
        };
        let open_rate = rate(count(AnalyticsEventType::Opened));
        let click_rate = rate(count(AnalyticsEventType::Clicked));
        let acceptance_rate = rate(count(AnalyticsEventType::Accepted));

        Self {
            farm_id,
            since,
            counts,
            open_rate,
            click_rate,
            acceptance_rate,
        }
    }

    /// Count for a step.
    pub fn count(&self, event_type: AnalyticsEventType) -> u64 {
        self.counts.get(&event_type).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_funnel_dedups_per_invitation() {
        let now = Utc::now();
        let farm = FarmId::new();
        let a = InvitationId::new();
        let b = InvitationId::new();
        let ev = |inv, t| InvitationAnalyticsEvent::new(inv, farm, t, None, now);
        let events = vec![
            ev(a, AnalyticsEventType::Sent),
            ev(b, AnalyticsEventType::Sent),
            ev(a, AnalyticsEventType::Opened),
            ev(a, AnalyticsEventType::Opened),
            ev(a, AnalyticsEventType::Accepted),
            ev(a, AnalyticsEventType::ReminderSent),
            ev(a, AnalyticsEventType::ReminderSent),
            InvitationAnalyticsEvent::new(
                b,
                farm,
                AnalyticsEventType::Opened,
                None,
                now - Duration::days(30),
            ),
        ];

        let rollup = FunnelRollup::from_events(farm, now - Duration::days(1), &events);
        assert_eq!(rollup.count(AnalyticsEventType::Sent), 2);
        assert_eq!(rollup.count(AnalyticsEventType::Opened), 1);
        assert_eq!(rollup.count(AnalyticsEventType::ReminderSent), 2);
        assert_eq!(rollup.open_rate, 50.0);
        assert_eq!(rollup.acceptance_rate, 50.0);
        assert_eq!(rollup.click_rate, 0.0);
    }
}
