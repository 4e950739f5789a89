//! Temporary permission requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;

use farmgate_core::types::{FarmId, PermissionRequestId, UserId};
use farmgate_core::{AppError, AppResult, ErrorCode};
use farmgate_entity::permission::PermissionSet;
use farmgate_entity::permission_request::{PermissionRequest, PermissionRequestStatus};
use farmgate_entity::urgency::UrgencyLevel;

use super::audit::insert_audit;
use super::{PgStore, db_error};
use crate::store::{PermissionRequestStore, RequestWrite, version_conflict};

const REQUEST_COLUMNS: &str = "id, farm_id, requester_id, requested_permissions, reason, \
    urgency_level, duration_hours, status, reviewed_by, reviewed_at, review_note, expires_at, \
    version, created_at, updated_at";

#[derive(Debug, FromRow)]
struct RequestRow {
    id: PermissionRequestId,
    farm_id: FarmId,
    requester_id: UserId,
    requested_permissions: Json<PermissionSet>,
    reason: String,
    urgency_level: UrgencyLevel,
    duration_hours: i64,
    status: PermissionRequestStatus,
    reviewed_by: Option<UserId>,
    reviewed_at: Option<DateTime<Utc>>,
    review_note: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RequestRow> for PermissionRequest {
    fn from(row: RequestRow) -> Self {
        Self {
            id: row.id,
            farm_id: row.farm_id,
            requester_id: row.requester_id,
            requested_permissions: row.requested_permissions.0,
            reason: row.reason,
            urgency_level: row.urgency_level,
            duration_hours: row.duration_hours,
            status: row.status,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            review_note: row.review_note,
            expires_at: row.expires_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl PermissionRequestStore for PgStore {
    async fn insert_request(&self, request: PermissionRequest) -> AppResult<PermissionRequest> {
        let sql = format!(
            "INSERT INTO permission_requests ({REQUEST_COLUMNS}) VALUES ($1, $2, $3, $4, $5, \
             $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) RETURNING {REQUEST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(request.id)
            .bind(request.farm_id)
            .bind(request.requester_id)
            .bind(Json(&request.requested_permissions))
            .bind(&request.reason)
            .bind(request.urgency_level)
            .bind(request.duration_hours)
            .bind(request.status)
            .bind(request.reviewed_by)
            .bind(request.reviewed_at)
            .bind(&request.review_note)
            .bind(request.expires_at)
            .bind(request.version)
            .bind(request.created_at)
            .bind(request.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to insert permission request"))?;
        Ok(row.into())
    }

    async fn find_request(
        &self,
        id: PermissionRequestId,
    ) -> AppResult<Option<PermissionRequest>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM permission_requests WHERE id = $1");
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find permission request"))?;
        Ok(row.map(Into::into))
    }

    async fn list_farm_requests(
        &self,
        farm_id: FarmId,
        status: Option<PermissionRequestStatus>,
    ) -> AppResult<Vec<PermissionRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM permission_requests WHERE farm_id = $1 \
             AND ($2::permission_request_status IS NULL OR status = $2) ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(farm_id)
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list permission requests"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_active_requests(
        &self,
        farm_id: FarmId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<PermissionRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM permission_requests WHERE farm_id = $1 \
             AND requester_id = $2 AND status = 'approved' AND expires_at > $3 \
             ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(farm_id)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list active permission requests"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_stale_requests(
        &self,
        now: DateTime<Utc>,
        pending_cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<PermissionRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM permission_requests \
             WHERE (status = 'approved' AND expires_at <= $1) \
             OR (status = 'pending' AND created_at <= $2) ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(now)
            .bind(pending_cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list stale permission requests"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_request(&self, write: RequestWrite) -> AppResult<PermissionRequest> {
        let request = &write.request;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let sql = format!(
            "UPDATE permission_requests SET status = $3, reviewed_by = $4, reviewed_at = $5, \
             review_note = $6, expires_at = $7, updated_at = $8, version = version + 1 \
             WHERE id = $1 AND version = $2 RETURNING {REQUEST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(request.id)
            .bind(write.expected_version)
            .bind(request.status)
            .bind(request.reviewed_by)
            .bind(request.reviewed_at)
            .bind(&request.review_note)
            .bind(request.expires_at)
            .bind(request.updated_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to update permission request"))?;

        let Some(row) = row else {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM permission_requests WHERE id = $1)",
            )
            .bind(request.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to check permission request"))?;
            return Err(if exists {
                version_conflict("Permission request", request.id)
            } else {
                AppError::coded(
                    ErrorCode::PermissionRequestNotFound,
                    format!("Permission request {} not found", request.id),
                )
            });
        };

        if let Some(entry) = &write.audit {
            insert_audit(&mut tx, entry).await?;
        }
        tx.commit()
            .await
            .map_err(db_error("Failed to commit permission request"))?;
        Ok(row.into())
    }
}
