//! Invitation funnel events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use farmgate_core::AppResult;
use farmgate_core::types::{AnalyticsEventId, FarmId, InvitationId};
use farmgate_entity::analytics::{AnalyticsEventType, InvitationAnalyticsEvent};

use super::{PgStore, db_error};
use crate::store::AnalyticsStore;

const EVENT_COLUMNS: &str = "id, invitation_id, farm_id, event_type, metadata, occurred_at";

#[derive(Debug, FromRow)]
struct EventRow {
    id: AnalyticsEventId,
    invitation_id: InvitationId,
    farm_id: FarmId,
    event_type: AnalyticsEventType,
    metadata: Option<serde_json::Value>,
    occurred_at: DateTime<Utc>,
}

impl From<EventRow> for InvitationAnalyticsEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            invitation_id: row.invitation_id,
            farm_id: row.farm_id,
            event_type: row.event_type,
            metadata: row.metadata,
            occurred_at: row.occurred_at,
        }
    }
}

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn record_event(&self, event: InvitationAnalyticsEvent) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO invitation_analytics (id, invitation_id, farm_id, event_type, metadata, \
             occurred_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(event.invitation_id)
        .bind(event.farm_id)
        .bind(event.event_type)
        .bind(&event.metadata)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to record analytics event"))?;
        Ok(())
    }

    async fn farm_events(
        &self,
        farm_id: FarmId,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<InvitationAnalyticsEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM invitation_analytics \
             WHERE farm_id = $1 AND occurred_at >= $2 ORDER BY occurred_at"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(farm_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to load farm analytics"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn invitation_events(
        &self,
        invitation_id: InvitationId,
    ) -> AppResult<Vec<InvitationAnalyticsEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM invitation_analytics \
             WHERE invitation_id = $1 ORDER BY occurred_at"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(invitation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to load invitation analytics"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM invitation_analytics WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to prune analytics events"))?;
        Ok(result.rows_affected())
    }
}
