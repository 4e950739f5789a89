//! Audit log queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection};

use farmgate_core::AppResult;
use farmgate_core::types::{AuditLogId, FarmId, InvitationId, PageResponse, UserId};
use farmgate_entity::audit::{AuditAction, AuditLogEntry, AuditQuery};
use farmgate_entity::permission::PermissionSet;
use farmgate_entity::role::FarmRole;

use super::{PgStore, db_error};
use crate::store::AuditStore;

const AUDIT_COLUMNS: &str = "id, farm_id, target_user_id, target_email, action_performed_by, \
    action, previous_role, new_role, previous_permissions, new_permissions, reason, \
    invitation_id, recorded_at";

const AUDIT_FILTER: &str = "($1::uuid IS NULL OR farm_id = $1) \
    AND ($2::uuid IS NULL OR target_user_id = $2) \
    AND ($3::uuid IS NULL OR action_performed_by = $3) \
    AND ($4::text[] IS NULL OR action::text = ANY($4)) \
    AND ($5::timestamptz IS NULL OR recorded_at >= $5) \
    AND ($6::timestamptz IS NULL OR recorded_at < $6)";

#[derive(Debug, FromRow)]
struct AuditRow {
    id: AuditLogId,
    farm_id: FarmId,
    target_user_id: Option<UserId>,
    target_email: Option<String>,
    action_performed_by: UserId,
    action: AuditAction,
    previous_role: Option<FarmRole>,
    new_role: Option<FarmRole>,
    previous_permissions: Json<PermissionSet>,
    new_permissions: Json<PermissionSet>,
    reason: Option<String>,
    invitation_id: Option<InvitationId>,
    recorded_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditLogEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            farm_id: row.farm_id,
            target_user_id: row.target_user_id,
            target_email: row.target_email,
            action_performed_by: row.action_performed_by,
            action: row.action,
            previous_role: row.previous_role,
            new_role: row.new_role,
            previous_permissions: row.previous_permissions.0,
            new_permissions: row.new_permissions.0,
            reason: row.reason,
            invitation_id: row.invitation_id,
            timestamp: row.recorded_at,
        }
    }
}

/// Append an entry on an open connection, usually inside the transaction
/// of the mutation it records.
pub(super) async fn insert_audit(conn: &mut PgConnection, entry: &AuditLogEntry) -> AppResult<()> {
    let sql = format!(
        "INSERT INTO audit_log ({AUDIT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
    );
    sqlx::query(&sql)
        .bind(entry.id)
        .bind(entry.farm_id)
        .bind(entry.target_user_id)
        .bind(&entry.target_email)
        .bind(entry.action_performed_by)
        .bind(entry.action)
        .bind(entry.previous_role)
        .bind(entry.new_role)
        .bind(Json(&entry.previous_permissions))
        .bind(Json(&entry.new_permissions))
        .bind(&entry.reason)
        .bind(entry.invitation_id)
        .bind(entry.timestamp)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to write audit entry"))?;
    Ok(())
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append_audit(&self, entry: AuditLogEntry) -> AppResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(db_error("Failed to acquire connection"))?;
        insert_audit(&mut conn, &entry).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> AppResult<PageResponse<AuditLogEntry>> {
        let actions: Option<Vec<String>> = query
            .effective_actions()
            .map(|list| list.iter().map(|a| a.as_str().to_string()).collect());

        let count_sql = format!("SELECT COUNT(*) FROM audit_log WHERE {AUDIT_FILTER}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(query.farm_id)
            .bind(query.target_user_id)
            .bind(query.actor_id)
            .bind(&actions)
            .bind(query.since)
            .bind(query.until)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to count audit entries"))?;

        let select_sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE {AUDIT_FILTER} \
             ORDER BY recorded_at DESC LIMIT $7 OFFSET $8"
        );
        let rows = sqlx::query_as::<_, AuditRow>(&select_sql)
            .bind(query.farm_id)
            .bind(query.target_user_id)
            .bind(query.actor_id)
            .bind(&actions)
            .bind(query.since)
            .bind(query.until)
            .bind(query.page.limit() as i64)
            .bind(query.page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to search audit log"))?;

        Ok(PageResponse::new(
            rows.into_iter().map(Into::into).collect(),
            query.page.page,
            query.page.page_size,
            total as u64,
        ))
    }

    async fn prune_audit_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM audit_log WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to prune audit log"))?;
        Ok(result.rows_affected())
    }
}
