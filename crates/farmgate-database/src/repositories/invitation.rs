//! Invitation queries, including the acceptance transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection};

use farmgate_core::types::{BulkInvitationId, FarmId, InvitationId, UserId};
use farmgate_core::{AppError, AppResult, ErrorCode};
use farmgate_entity::audit::AuditLogEntry;
use farmgate_entity::grant::AccessGrant;
use farmgate_entity::invitation::{Invitation, InvitationPriority, InvitationStatus};
use farmgate_entity::permission::PermissionSet;
use farmgate_entity::role::FarmRole;

use super::audit::insert_audit;
use super::grant::{insert_grant_row, update_grant_row};
use super::{PgStore, db_error, violated_constraint};
use crate::store::{AcceptInvitation, GrantChange, InvitationStore, InvitationWrite, version_conflict};

const INVITATION_COLUMNS: &str = "id, farm_id, inviter_id, invitee_email, invitee_user_id, \
    proposed_role, custom_permissions, message, priority, status, invitation_code, \
    invitation_link, sent_at, expires_at, responded_at, reminders_sent, last_reminder_at, \
    max_reminders, requires_approval, approved_by, approved_at, delivered_at, opened_at, \
    bulk_invitation_id, archived_at, version, created_at, updated_at";

const LIVE: &str = "status NOT IN ('accepted', 'rejected', 'expired', 'cancelled')";

#[derive(Debug, FromRow)]
struct InvitationRow {
    id: InvitationId,
    farm_id: FarmId,
    inviter_id: UserId,
    invitee_email: String,
    invitee_user_id: Option<UserId>,
    proposed_role: FarmRole,
    custom_permissions: Json<PermissionSet>,
    message: Option<String>,
    priority: InvitationPriority,
    status: InvitationStatus,
    invitation_code: String,
    invitation_link: String,
    sent_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
    reminders_sent: i32,
    last_reminder_at: Option<DateTime<Utc>>,
    max_reminders: i32,
    requires_approval: bool,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    bulk_invitation_id: Option<BulkInvitationId>,
    archived_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<InvitationRow> for Invitation {
    fn from(row: InvitationRow) -> Self {
        Self {
            id: row.id,
            farm_id: row.farm_id,
            inviter_id: row.inviter_id,
            invitee_email: row.invitee_email,
            invitee_user_id: row.invitee_user_id,
            proposed_role: row.proposed_role,
            custom_permissions: row.custom_permissions.0,
            message: row.message,
            priority: row.priority,
            status: row.status,
            invitation_code: row.invitation_code,
            invitation_link: row.invitation_link,
            sent_at: row.sent_at,
            expires_at: row.expires_at,
            responded_at: row.responded_at,
            reminders_sent: row.reminders_sent,
            last_reminder_at: row.last_reminder_at,
            max_reminders: row.max_reminders,
            requires_approval: row.requires_approval,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            delivered_at: row.delivered_at,
            opened_at: row.opened_at,
            bulk_invitation_id: row.bulk_invitation_id,
            archived_at: row.archived_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

async fn update_invitation_row(
    conn: &mut PgConnection,
    inv: &Invitation,
    expected_version: i64,
) -> AppResult<Invitation> {
    let sql = format!(
        "UPDATE invitations SET invitee_user_id = $3, status = $4, sent_at = $5, \
         expires_at = $6, responded_at = $7, reminders_sent = $8, last_reminder_at = $9, \
         approved_by = $10, approved_at = $11, delivered_at = $12, opened_at = $13, \
         archived_at = $14, updated_at = $15, version = version + 1 \
         WHERE id = $1 AND version = $2 RETURNING {INVITATION_COLUMNS}"
    );
    let row = sqlx::query_as::<_, InvitationRow>(&sql)
        .bind(inv.id)
        .bind(expected_version)
        .bind(inv.invitee_user_id)
        .bind(inv.status)
        .bind(inv.sent_at)
        .bind(inv.expires_at)
        .bind(inv.responded_at)
        .bind(inv.reminders_sent)
        .bind(inv.last_reminder_at)
        .bind(inv.approved_by)
        .bind(inv.approved_at)
        .bind(inv.delivered_at)
        .bind(inv.opened_at)
        .bind(inv.archived_at)
        .bind(inv.updated_at)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("Failed to update invitation"))?;
    match row {
        Some(row) => Ok(row.into()),
        None => {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM invitations WHERE id = $1)")
                    .bind(inv.id)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(db_error("Failed to check invitation"))?;
            if exists {
                Err(version_conflict("Invitation", inv.id))
            } else {
                Err(AppError::coded(ErrorCode::InvitationNotFound, "Invitation not found"))
            }
        }
    }
}

#[async_trait]
impl InvitationStore for PgStore {
    async fn insert_invitation(
        &self,
        invitation: Invitation,
        audit: Option<AuditLogEntry>,
    ) -> AppResult<Invitation> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let sql = format!(
            "INSERT INTO invitations ({INVITATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, \
             $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, \
             $25, $26, $27, $28) RETURNING {INVITATION_COLUMNS}"
        );
        let inv = &invitation;
        let result = sqlx::query_as::<_, InvitationRow>(&sql)
            .bind(inv.id)
            .bind(inv.farm_id)
            .bind(inv.inviter_id)
            .bind(&inv.invitee_email)
            .bind(inv.invitee_user_id)
            .bind(inv.proposed_role)
            .bind(Json(&inv.custom_permissions))
            .bind(&inv.message)
            .bind(inv.priority)
            .bind(inv.status)
            .bind(&inv.invitation_code)
            .bind(&inv.invitation_link)
            .bind(inv.sent_at)
            .bind(inv.expires_at)
            .bind(inv.responded_at)
            .bind(inv.reminders_sent)
            .bind(inv.last_reminder_at)
            .bind(inv.max_reminders)
            .bind(inv.requires_approval)
            .bind(inv.approved_by)
            .bind(inv.approved_at)
            .bind(inv.delivered_at)
            .bind(inv.opened_at)
            .bind(inv.bulk_invitation_id)
            .bind(inv.archived_at)
            .bind(inv.version)
            .bind(inv.created_at)
            .bind(inv.updated_at)
            .fetch_one(&mut *tx)
            .await;

        let stored: Invitation = match result {
            Ok(row) => row.into(),
            Err(e) => {
                return Err(match violated_constraint(&e) {
                    Some("invitations_live_email_idx") => AppError::coded(
                        ErrorCode::DuplicateInvitation,
                        format!(
                            "A pending invitation for {} already exists on farm {}",
                            inv.invitee_email, inv.farm_id
                        ),
                    ),
                    Some("invitations_live_code_idx") => {
                        AppError::conflict("Invitation code already in use")
                    }
                    _ => db_error("Failed to insert invitation")(e),
                });
            }
        };

        if let Some(entry) = &audit {
            insert_audit(&mut tx, entry).await?;
        }
        tx.commit()
            .await
            .map_err(db_error("Failed to commit invitation"))?;
        Ok(stored)
    }

    async fn find_invitation(&self, id: InvitationId) -> AppResult<Option<Invitation>> {
        let sql = format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = $1");
        let row = sqlx::query_as::<_, InvitationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find invitation"))?;
        Ok(row.map(Into::into))
    }

    async fn find_invitation_by_code(&self, code: &str) -> AppResult<Option<Invitation>> {
        let sql = format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE invitation_code = $1 \
             ORDER BY ({LIVE}) DESC, created_at DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, InvitationRow>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find invitation by code"))?;
        Ok(row.map(Into::into))
    }

    async fn code_in_use(&self, code: &str) -> AppResult<bool> {
        let sql =
            format!("SELECT EXISTS (SELECT 1 FROM invitations WHERE invitation_code = $1 AND {LIVE})");
        sqlx::query_scalar(&sql)
            .bind(code)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to check invitation code"))
    }

    async fn find_live_invitation(
        &self,
        farm_id: FarmId,
        email: &str,
    ) -> AppResult<Option<Invitation>> {
        let sql = format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations \
             WHERE farm_id = $1 AND invitee_email = $2 AND {LIVE}"
        );
        let row = sqlx::query_as::<_, InvitationRow>(&sql)
            .bind(farm_id)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find pending invitation"))?;
        Ok(row.map(Into::into))
    }

    async fn list_farm_invitations(&self, farm_id: FarmId, status: Option<InvitationStatus>) -> AppResult<Vec<Invitation>> {
        let sql = format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE farm_id = $1 AND ($2::invitation_status IS NULL OR status = $2) \
             ORDER BY created_at DESC");
        let rows = sqlx::query_as::<_, InvitationRow>(&sql)
            .bind(farm_id)
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list farm invitations"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_email_invitations(&self, email: &str) -> AppResult<Vec<Invitation>> {
        let sql = format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE invitee_email = $1 ORDER BY created_at DESC");
        let rows = sqlx::query_as::<_, InvitationRow>(&sql)
            .bind(email)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list invitations for email"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_expirable_invitations(&self, now: DateTime<Utc>) -> AppResult<Vec<Invitation>> {
        let sql = format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE status IN ('sent', 'delivered', 'opened', 'pending_approval') \
             AND expires_at <= $1");
        let rows = sqlx::query_as::<_, InvitationRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list expirable invitations"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_outstanding_invitations(&self, now: DateTime<Utc>) -> AppResult<Vec<Invitation>> {
        let sql = format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE status IN ('sent', 'delivered', 'opened') AND expires_at > $1");
        let rows = sqlx::query_as::<_, InvitationRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list outstanding invitations"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_archivable_invitations(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Invitation>> {
        let sql = format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE status IN ('accepted', 'rejected', 'expired', 'cancelled') \
             AND archived_at IS NULL AND COALESCE(responded_at, updated_at) <= $1");
        let rows = sqlx::query_as::<_, InvitationRow>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list archivable invitations"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_invitation(&self, write: InvitationWrite) -> AppResult<Invitation> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        let stored = update_invitation_row(&mut tx, &write.invitation, write.expected_version).await?;
        if let Some(entry) = &write.audit {
            insert_audit(&mut tx, entry).await?;
        }
        tx.commit()
            .await
            .map_err(db_error("Failed to commit invitation"))?;
        Ok(stored)
    }

    async fn accept_invitation(
        &self,
        accept: AcceptInvitation,
    ) -> AppResult<(Invitation, AccessGrant)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        // The version guard on the invitation row is what makes a second,
        // concurrent acceptance lose.
        let invitation =
            update_invitation_row(&mut tx, &accept.invitation, accept.expected_version).await?;

        let grant = match &accept.grant {
            GrantChange::Insert(grant) => insert_grant_row(&mut tx, grant).await?,
            GrantChange::Update {
                grant,
                expected_version,
            } => update_grant_row(&mut tx, grant, *expected_version).await?,
        };

        for entry in &accept.audit {
            insert_audit(&mut tx, entry).await?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit invitation acceptance"))?;
        Ok((invitation, grant))
    }
}
