//! Bulk invitation batches and their items.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;

use farmgate_core::types::{BulkInvitationId, FarmId, InvitationId, UserId};
use farmgate_core::{AppError, AppResult, ErrorCode};
use farmgate_entity::bulk::{
    BulkInvitation, BulkInvitationItem, BulkInvitationStatus, BulkItemOutcome,
};
use farmgate_entity::permission::PermissionSet;
use farmgate_entity::role::FarmRole;

use super::{PgStore, db_error};
use crate::store::{BulkInvitationStore, version_conflict};

const BULK_COLUMNS: &str = "id, farm_id, created_by, default_role, custom_permissions, message, \
    total_invitations, sent_count, accepted_count, rejected_count, expired_count, failed_count, \
    status, version, created_at, updated_at, completed_at, cancelled_at";

const ITEM_COLUMNS: &str =
    "bulk_invitation_id, position, email, outcome, invitation_id, failure_reason, processed_at";

#[derive(Debug, FromRow)]
struct BulkRow {
    id: BulkInvitationId,
    farm_id: FarmId,
    created_by: UserId,
    default_role: FarmRole,
    custom_permissions: Json<PermissionSet>,
    message: Option<String>,
    total_invitations: i32,
    sent_count: i32,
    accepted_count: i32,
    rejected_count: i32,
    expired_count: i32,
    failed_count: i32,
    status: BulkInvitationStatus,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl From<BulkRow> for BulkInvitation {
    fn from(row: BulkRow) -> Self {
        Self {
            id: row.id,
            farm_id: row.farm_id,
            created_by: row.created_by,
            default_role: row.default_role,
            custom_permissions: row.custom_permissions.0,
            message: row.message,
            total_invitations: row.total_invitations,
            sent_count: row.sent_count,
            accepted_count: row.accepted_count,
            rejected_count: row.rejected_count,
            expired_count: row.expired_count,
            failed_count: row.failed_count,
            status: row.status,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    bulk_invitation_id: BulkInvitationId,
    position: i32,
    email: String,
    outcome: String,
    invitation_id: Option<InvitationId>,
    failure_reason: Option<String>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ItemRow> for BulkInvitationItem {
    type Error = AppError;

    fn try_from(row: ItemRow) -> AppResult<Self> {
        let outcome = match (row.outcome.as_str(), row.invitation_id) {
            ("pending", _) => BulkItemOutcome::Pending,
            ("sent", Some(invitation_id)) => BulkItemOutcome::Sent { invitation_id },
            ("failed", _) => BulkItemOutcome::Failed {
                reason: row.failure_reason.unwrap_or_default(),
            },
            ("skipped", _) => BulkItemOutcome::Skipped,
            (other, _) => {
                return Err(AppError::internal(format!(
                    "Unreadable outcome '{other}' on bulk item {}/{}",
                    row.bulk_invitation_id, row.position
                )));
            }
        };
        Ok(Self {
            bulk_invitation_id: row.bulk_invitation_id,
            position: row.position,
            email: row.email,
            outcome,
            processed_at: row.processed_at,
        })
    }
}

/// Split an outcome into its stored columns.
fn outcome_columns(outcome: &BulkItemOutcome) -> (Option<InvitationId>, Option<&str>) {
    match outcome {
        BulkItemOutcome::Sent { invitation_id } => (Some(*invitation_id), None),
        BulkItemOutcome::Failed { reason } => (None, Some(reason.as_str())),
        BulkItemOutcome::Pending | BulkItemOutcome::Skipped => (None, None),
    }
}

#[async_trait]
impl BulkInvitationStore for PgStore {
    async fn insert_bulk(
        &self,
        bulk: BulkInvitation,
        items: Vec<BulkInvitationItem>,
    ) -> AppResult<BulkInvitation> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let sql = format!(
            "INSERT INTO bulk_invitations ({BULK_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, \
             $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) RETURNING {BULK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, BulkRow>(&sql)
            .bind(bulk.id)
            .bind(bulk.farm_id)
            .bind(bulk.created_by)
            .bind(bulk.default_role)
            .bind(Json(&bulk.custom_permissions))
            .bind(&bulk.message)
            .bind(bulk.total_invitations)
            .bind(bulk.sent_count)
            .bind(bulk.accepted_count)
            .bind(bulk.rejected_count)
            .bind(bulk.expired_count)
            .bind(bulk.failed_count)
            .bind(bulk.status)
            .bind(bulk.version)
            .bind(bulk.created_at)
            .bind(bulk.updated_at)
            .bind(bulk.completed_at)
            .bind(bulk.cancelled_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to insert bulk invitation"))?;

        let item_sql = format!(
            "INSERT INTO bulk_invitation_items ({ITEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        for item in &items {
            let (invitation_id, failure_reason) = outcome_columns(&item.outcome);
            sqlx::query(&item_sql)
                .bind(item.bulk_invitation_id)
                .bind(item.position)
                .bind(&item.email)
                .bind(item.outcome.label())
                .bind(invitation_id)
                .bind(failure_reason)
                .bind(item.processed_at)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to insert bulk invitation item"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit bulk invitation"))?;
        Ok(row.into())
    }

    async fn find_bulk(&self, id: BulkInvitationId) -> AppResult<Option<BulkInvitation>> {
        let sql = format!("SELECT {BULK_COLUMNS} FROM bulk_invitations WHERE id = $1");
        let row = sqlx::query_as::<_, BulkRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find bulk invitation"))?;
        Ok(row.map(Into::into))
    }

    async fn list_farm_bulks(&self, farm_id: FarmId) -> AppResult<Vec<BulkInvitation>> {
        let sql = format!(
            "SELECT {BULK_COLUMNS} FROM bulk_invitations WHERE farm_id = $1 \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, BulkRow>(&sql)
            .bind(farm_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list bulk invitations"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_bulk_items(&self, id: BulkInvitationId) -> AppResult<Vec<BulkInvitationItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM bulk_invitation_items WHERE bulk_invitation_id = $1 \
             ORDER BY position"
        );
        let rows = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list bulk invitation items"))?;
        rows.into_iter().map(BulkInvitationItem::try_from).collect()
    }

    async fn update_bulk(
        &self,
        bulk: BulkInvitation,
        expected_version: i64,
    ) -> AppResult<BulkInvitation> {
        let sql = format!(
            "UPDATE bulk_invitations SET sent_count = $3, accepted_count = $4, \
             rejected_count = $5, expired_count = $6, failed_count = $7, status = $8, \
             updated_at = $9, completed_at = $10, cancelled_at = $11, version = version + 1 \
             WHERE id = $1 AND version = $2 RETURNING {BULK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, BulkRow>(&sql)
            .bind(bulk.id)
            .bind(expected_version)
            .bind(bulk.sent_count)
            .bind(bulk.accepted_count)
            .bind(bulk.rejected_count)
            .bind(bulk.expired_count)
            .bind(bulk.failed_count)
            .bind(bulk.status)
            .bind(bulk.updated_at)
            .bind(bulk.completed_at)
            .bind(bulk.cancelled_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to update bulk invitation"))?;
        if let Some(row) = row {
            return Ok(row.into());
        }
        match self.find_bulk(bulk.id).await? {
            Some(_) => Err(version_conflict("Bulk invitation", bulk.id)),
            None => Err(AppError::coded(
                ErrorCode::BulkInvitationNotFound,
                format!("Bulk invitation {} not found", bulk.id),
            )),
        }
    }

    async fn update_bulk_item(&self, item: BulkInvitationItem) -> AppResult<()> {
        let (invitation_id, failure_reason) = outcome_columns(&item.outcome);
        let result = sqlx::query(
            "UPDATE bulk_invitation_items SET outcome = $3, invitation_id = $4, \
             failure_reason = $5, processed_at = $6 \
             WHERE bulk_invitation_id = $1 AND position = $2",
        )
        .bind(item.bulk_invitation_id)
        .bind(item.position)
        .bind(item.outcome.label())
        .bind(invitation_id)
        .bind(failure_reason)
        .bind(item.processed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update bulk invitation item"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::coded(
                ErrorCode::BulkInvitationNotFound,
                format!(
                    "Bulk invitation item {}/{} not found",
                    item.bulk_invitation_id, item.position
                ),
            ));
        }
        Ok(())
    }
}
