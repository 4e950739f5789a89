//! Access grant queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection};

use farmgate_core::types::{FarmId, GrantId, InvitationId, UserId};
use farmgate_core::{AppError, AppResult, ErrorCode};
use farmgate_entity::audit::AuditLogEntry;
use farmgate_entity::grant::{AccessGrant, GrantStatus};
use farmgate_entity::permission::PermissionSet;
use farmgate_entity::role::FarmRole;

use super::audit::insert_audit;
use super::{PgStore, db_error, violated_constraint};
use crate::store::{GrantStore, GrantWrite, check_owner_floor, version_conflict};

pub(super) const GRANT_COLUMNS: &str = "id, farm_id, user_id, role, permissions, invited_by, \
    invited_at, accepted_at, status, expires_at, is_active, last_accessed_at, invitation_id, \
    version, created_at, updated_at";

#[derive(Debug, FromRow)]
pub(super) struct GrantRow {
    id: GrantId,
    farm_id: FarmId,
    user_id: UserId,
    role: FarmRole,
    permissions: Json<PermissionSet>,
    invited_by: UserId,
    invited_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    status: GrantStatus,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    last_accessed_at: Option<DateTime<Utc>>,
    invitation_id: Option<InvitationId>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<GrantRow> for AccessGrant {
    fn from(row: GrantRow) -> Self {
        Self {
            id: row.id,
            farm_id: row.farm_id,
            user_id: row.user_id,
            role: row.role,
            permissions: row.permissions.0,
            invited_by: row.invited_by,
            invited_at: row.invited_at,
            accepted_at: row.accepted_at,
            status: row.status,
            expires_at: row.expires_at,
            is_active: row.is_active,
            last_accessed_at: row.last_accessed_at,
            invitation_id: row.invitation_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn already_member(grant: &AccessGrant) -> AppError {
    AppError::coded(
        ErrorCode::AlreadyMember,
        format!(
            "User {} already has access to farm {}",
            grant.user_id, grant.farm_id
        ),
    )
}

/// Insert a grant row on an open connection.
pub(super) async fn insert_grant_row(
    conn: &mut PgConnection,
    grant: &AccessGrant,
) -> AppResult<AccessGrant> {
    let sql = format!(
        "INSERT INTO access_grants ({GRANT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
         RETURNING {GRANT_COLUMNS}"
    );
    let result = sqlx::query_as::<_, GrantRow>(&sql)
        .bind(grant.id)
        .bind(grant.farm_id)
        .bind(grant.user_id)
        .bind(grant.role)
        .bind(Json(&grant.permissions))
        .bind(grant.invited_by)
        .bind(grant.invited_at)
        .bind(grant.accepted_at)
        .bind(grant.status)
        .bind(grant.expires_at)
        .bind(grant.is_active)
        .bind(grant.last_accessed_at)
        .bind(grant.invitation_id)
        .bind(grant.version)
        .bind(grant.created_at)
        .bind(grant.updated_at)
        .fetch_one(&mut *conn)
        .await;
    match result {
        Ok(row) => Ok(row.into()),
        Err(e) if violated_constraint(&e) == Some("access_grants_active_member_idx") => {
            Err(already_member(grant))
        }
        Err(e) => Err(db_error("Failed to insert access grant")(e)),
    }
}

/// Compare-and-set update of a grant row on an open connection.
pub(super) async fn update_grant_row(
    conn: &mut PgConnection,
    grant: &AccessGrant,
    expected_version: i64,
) -> AppResult<AccessGrant> {
    let sql = format!(
        "UPDATE access_grants SET role = $3, permissions = $4, accepted_at = $5, status = $6, \
         expires_at = $7, is_active = $8, last_accessed_at = $9, invitation_id = $10, \
         updated_at = $11, version = version + 1 \
         WHERE id = $1 AND version = $2 RETURNING {GRANT_COLUMNS}"
    );
    let row = sqlx::query_as::<_, GrantRow>(&sql)
        .bind(grant.id)
        .bind(expected_version)
        .bind(grant.role)
        .bind(Json(&grant.permissions))
        .bind(grant.accepted_at)
        .bind(grant.status)
        .bind(grant.expires_at)
        .bind(grant.is_active)
        .bind(grant.last_accessed_at)
        .bind(grant.invitation_id)
        .bind(grant.updated_at)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("Failed to update access grant"))?;
    match row {
        Some(row) => Ok(row.into()),
        None => {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM access_grants WHERE id = $1)")
                    .bind(grant.id)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(db_error("Failed to check access grant"))?;
            if exists {
                Err(version_conflict("Access grant", grant.id))
            } else {
                Err(AppError::coded(ErrorCode::GrantNotFound, "Access grant not found"))
            }
        }
    }
}

#[async_trait]
impl GrantStore for PgStore {
    async fn find_active_grant(
        &self,
        farm_id: FarmId,
        user_id: UserId,
    ) -> AppResult<Option<AccessGrant>> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM access_grants \
             WHERE farm_id = $1 AND user_id = $2 AND is_active"
        );
        let row = sqlx::query_as::<_, GrantRow>(&sql)
            .bind(farm_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find access grant"))?;
        Ok(row.map(Into::into))
    }

    async fn find_grant(&self, id: GrantId) -> AppResult<Option<AccessGrant>> {
        let sql = format!("SELECT {GRANT_COLUMNS} FROM access_grants WHERE id = $1");
        let row = sqlx::query_as::<_, GrantRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find access grant"))?;
        Ok(row.map(Into::into))
    }

    async fn list_farm_grants(
        &self,
        farm_id: FarmId,
        include_inactive: bool,
    ) -> AppResult<Vec<AccessGrant>> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM access_grants \
             WHERE farm_id = $1 AND ($2 OR is_active) ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, GrantRow>(&sql)
            .bind(farm_id)
            .bind(include_inactive)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list farm members"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_user_grants(&self, user_id: UserId) -> AppResult<Vec<AccessGrant>> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM access_grants \
             WHERE user_id = $1 AND is_active ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, GrantRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list user farms"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_grant(
        &self,
        grant: AccessGrant,
        audit: AuditLogEntry,
    ) -> AppResult<AccessGrant> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        let stored = insert_grant_row(&mut tx, &grant).await?;
        insert_audit(&mut tx, &audit).await?;
        tx.commit()
            .await
            .map_err(db_error("Failed to commit access grant"))?;
        Ok(stored)
    }

    async fn insert_first_grant(
        &self,
        grant: AccessGrant,
        audit: AuditLogEntry,
    ) -> AppResult<AccessGrant> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(grant.farm_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to lock farm"))?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM access_grants WHERE farm_id = $1")
            .bind(grant.farm_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to count farm grants"))?;
        if existing > 0 {
            return Err(AppError::conflict(format!(
                "Farm {} already has members",
                grant.farm_id
            )));
        }

        let stored = insert_grant_row(&mut tx, &grant).await?;
        insert_audit(&mut tx, &audit).await?;
        tx.commit()
            .await
            .map_err(db_error("Failed to commit owner grant"))?;
        Ok(stored)
    }

    async fn update_grant(&self, write: GrantWrite) -> AppResult<AccessGrant> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        if write.enforce_owner_floor {
            // Owner rows are locked in id order before the target row so
            // concurrent demotions on one farm serialize instead of deadlocking.
            let sql = format!(
                "SELECT {GRANT_COLUMNS} FROM access_grants \
                 WHERE farm_id = $1 AND role = 'owner' AND status = 'accepted' AND is_active \
                 ORDER BY id FOR UPDATE"
            );
            let owners: Vec<AccessGrant> = sqlx::query_as::<_, GrantRow>(&sql)
                .bind(write.grant.farm_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error("Failed to lock owner grants"))?
                .into_iter()
                .map(Into::into)
                .collect();
            let floor_owners = owners.iter().filter(|g| g.holds_owner_floor()).count();

            let sql = format!("SELECT {GRANT_COLUMNS} FROM access_grants WHERE id = $1 FOR UPDATE");
            let current: AccessGrant = sqlx::query_as::<_, GrantRow>(&sql)
                .bind(write.grant.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error("Failed to lock access grant"))?
                .map(Into::into)
                .ok_or_else(|| AppError::coded(ErrorCode::GrantNotFound, "Access grant not found"))?;
            if current.version != write.expected_version {
                return Err(version_conflict("Access grant", current.id));
            }
            check_owner_floor(&current, &write.grant, floor_owners)?;
        }

        let stored = update_grant_row(&mut tx, &write.grant, write.expected_version).await?;
        insert_audit(&mut tx, &write.audit).await?;
        tx.commit()
            .await
            .map_err(db_error("Failed to commit access grant"))?;
        Ok(stored)
    }

    async fn touch_grant(&self, id: GrantId, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE access_grants SET last_accessed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to touch access grant"))?;
        Ok(())
    }

    async fn list_grants_past_expiry(&self, now: DateTime<Utc>) -> AppResult<Vec<AccessGrant>> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM access_grants \
             WHERE is_active AND status IN ('pending', 'accepted', 'suspended') \
             AND expires_at IS NOT NULL AND expires_at <= $1"
        );
        let rows = sqlx::query_as::<_, GrantRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list expired grants"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
