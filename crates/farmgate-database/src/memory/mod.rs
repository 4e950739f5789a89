//! In-memory store using a Tokio mutex for single-process deployments and tests.
//!
//! All tables live behind one lock, so every multi-record write is atomic.
//! Fault switches let tests simulate storage outages.

mod directory;

pub use directory::MemoryUserDirectory;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use farmgate_core::types::{
    BulkInvitationId, FarmId, GrantId, InvitationId, PageResponse, PermissionRequestId, UserId,
};
use farmgate_core::{AppError, AppResult, ErrorCode};
use farmgate_entity::analytics::InvitationAnalyticsEvent;
use farmgate_entity::audit::{AuditLogEntry, AuditQuery};
use farmgate_entity::bulk::{BulkInvitation, BulkInvitationItem};
use farmgate_entity::grant::AccessGrant;
use farmgate_entity::invitation::{Invitation, InvitationStatus};
use farmgate_entity::permission_request::{PermissionRequest, PermissionRequestStatus};

use crate::store::{
    AcceptInvitation, AnalyticsStore, AuditStore, BulkInvitationStore, GrantChange, GrantStore,
    GrantWrite, InvitationStore, InvitationWrite, PermissionRequestStore, RequestWrite,
    check_owner_floor, version_conflict,
};

#[derive(Debug, Default)]
struct Tables {
    grants: HashMap<GrantId, AccessGrant>,
    invitations: HashMap<InvitationId, Invitation>,
    audit: Vec<AuditLogEntry>,
    analytics: Vec<InvitationAnalyticsEvent>,
    bulks: HashMap<BulkInvitationId, BulkInvitation>,
    bulk_items: HashMap<BulkInvitationId, Vec<BulkInvitationItem>>,
    requests: HashMap<PermissionRequestId, PermissionRequest>,
}

impl Tables {
    fn active_grant(&self, farm_id: FarmId, user_id: UserId) -> Option<&AccessGrant> {
        self.grants
            .values()
            .find(|g| g.farm_id == farm_id && g.user_id == user_id && g.is_active)
    }

    fn live_owner_count(&self, farm_id: FarmId) -> usize {
        self.grants
            .values()
            .filter(|g| g.farm_id == farm_id && g.holds_owner_floor())
            .count()
    }
}

#[derive(Debug, Default)]
struct Faults {
    storage: AtomicBool,
    audit: AtomicBool,
    analytics: AtomicBool,
    failing_reads: AtomicU32,
    drop_accept_ack: AtomicBool,
}

/// In-memory implementation of every store trait.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StorageUnavailable`.
    pub fn set_storage_outage(&self, down: bool) {
        self.faults.storage.store(down, Ordering::SeqCst);
    }

    /// Make every write that carries audit entries fail.
    pub fn set_audit_outage(&self, down: bool) {
        self.faults.audit.store(down, Ordering::SeqCst);
    }

    /// Make analytics writes fail.
    pub fn set_analytics_outage(&self, down: bool) {
        self.faults.analytics.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` read operations.
    pub fn fail_next_reads(&self, n: u32) {
        self.faults.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Commit the next acceptance but report it as failed, as a lost
    /// connection after commit would.
    pub fn drop_next_accept_ack(&self) {
        self.faults.drop_accept_ack.store(true, Ordering::SeqCst);
    }

    /// Number of audit entries stored.
    pub async fn audit_len(&self) -> usize {
        self.tables.lock().await.audit.len()
    }

    /// Number of grants stored, active or not.
    pub async fn grant_count(&self) -> usize {
        self.tables.lock().await.grants.len()
    }

    fn check_storage(&self) -> AppResult<()> {
        if self.faults.storage.load(Ordering::SeqCst) {
            return Err(AppError::storage_unavailable("In-memory store is offline"));
        }
        Ok(())
    }

    fn check_read(&self) -> AppResult<()> {
        self.check_storage()?;
        let consumed = self
            .faults
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(AppError::storage_unavailable("Simulated read failure"));
        }
        Ok(())
    }

    fn check_audit(&self, entries: usize) -> AppResult<()> {
        self.check_storage()?;
        if entries > 0 && self.faults.audit.load(Ordering::SeqCst) {
            warn!("Rejecting write because the audit table is offline");
            return Err(AppError::storage_unavailable("Audit log is unavailable"));
        }
        Ok(())
    }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|item| std::cmp::Reverse(key(item)));
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn find_active_grant(
        &self,
        farm_id: FarmId,
        user_id: UserId,
    ) -> AppResult<Option<AccessGrant>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables.active_grant(farm_id, user_id).cloned())
    }

    async fn find_grant(&self, id: GrantId) -> AppResult<Option<AccessGrant>> {
        self.check_read()?;
        Ok(self.tables.lock().await.grants.get(&id).cloned())
    }

    async fn list_farm_grants(
        &self,
        farm_id: FarmId,
        include_inactive: bool,
    ) -> AppResult<Vec<AccessGrant>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut grants: Vec<_> = tables
            .grants
            .values()
            .filter(|g| g.farm_id == farm_id && (include_inactive || g.is_active))
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.created_at);
        Ok(grants)
    }

    async fn list_user_grants(&self, user_id: UserId) -> AppResult<Vec<AccessGrant>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut grants: Vec<_> = tables
            .grants
            .values()
            .filter(|g| g.user_id == user_id && g.is_active)
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.created_at);
        Ok(grants)
    }

    async fn insert_grant(
        &self,
        grant: AccessGrant,
        audit: AuditLogEntry,
    ) -> AppResult<AccessGrant> {
        self.check_audit(1)?;
        let mut tables = self.tables.lock().await;
        if tables.active_grant(grant.farm_id, grant.user_id).is_some() {
            return Err(AppError::coded(
                ErrorCode::AlreadyMember,
                format!("User {} already has access to farm {}", grant.user_id, grant.farm_id),
            ));
        }
        tables.grants.insert(grant.id, grant.clone());
        tables.audit.push(audit);
        debug!(grant_id = %grant.id, "Grant inserted");
        Ok(grant)
    }

    async fn insert_first_grant(
        &self,
        grant: AccessGrant,
        audit: AuditLogEntry,
    ) -> AppResult<AccessGrant> {
        self.check_audit(1)?;
        let mut tables = self.tables.lock().await;
        if tables.grants.values().any(|g| g.farm_id == grant.farm_id) {
            return Err(AppError::conflict(format!(
                "Farm {} already has members",
                grant.farm_id
            )));
        }
        tables.grants.insert(grant.id, grant.clone());
        tables.audit.push(audit);
        Ok(grant)
    }

    async fn update_grant(&self, write: GrantWrite) -> AppResult<AccessGrant> {
        self.check_audit(1)?;
        let mut tables = self.tables.lock().await;
        let current = tables
            .grants
            .get(&write.grant.id)
            .cloned()
            .ok_or_else(|| AppError::coded(ErrorCode::GrantNotFound, "Access grant not found"))?;
        if current.version != write.expected_version {
            return Err(version_conflict("Access grant", current.id));
        }
        if write.enforce_owner_floor {
            let live = tables.live_owner_count(current.farm_id);
            check_owner_floor(&current, &write.grant, live)?;
        }
        let mut stored = write.grant;
        stored.version = write.expected_version + 1;
        tables.grants.insert(stored.id, stored.clone());
        tables.audit.push(write.audit);
        Ok(stored)
    }

    async fn touch_grant(&self, id: GrantId, at: DateTime<Utc>) -> AppResult<()> {
        self.check_storage()?;
        let mut tables = self.tables.lock().await;
        if let Some(grant) = tables.grants.get_mut(&id) {
            grant.last_accessed_at = Some(at);
        }
        Ok(())
    }

    async fn list_grants_past_expiry(&self, now: DateTime<Utc>) -> AppResult<Vec<AccessGrant>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .grants
            .values()
            .filter(|g| g.is_active && !g.status.is_terminal() && g.is_past_expiry(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InvitationStore for MemoryStore {
    async fn insert_invitation(
        &self,
        invitation: Invitation,
        audit: Option<AuditLogEntry>,
    ) -> AppResult<Invitation> {
        self.check_audit(usize::from(audit.is_some()))?;
        let mut tables = self.tables.lock().await;
        let live = || tables.invitations.values().filter(|i| !i.status.is_terminal());
        if live().any(|i| i.farm_id == invitation.farm_id && i.invitee_email == invitation.invitee_email)
        {
            return Err(AppError::coded(
                ErrorCode::DuplicateInvitation,
                format!(
                    "A pending invitation for {} already exists on farm {}",
                    invitation.invitee_email, invitation.farm_id
                ),
            ));
        }
        if live().any(|i| i.invitation_code == invitation.invitation_code) {
            return Err(AppError::conflict("Invitation code already in use"));
        }
        tables.invitations.insert(invitation.id, invitation.clone());
        tables.audit.extend(audit);
        Ok(invitation)
    }

    async fn find_invitation(&self, id: InvitationId) -> AppResult<Option<Invitation>> {
        self.check_read()?;
        Ok(self.tables.lock().await.invitations.get(&id).cloned())
    }

    async fn find_invitation_by_code(&self, code: &str) -> AppResult<Option<Invitation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .invitations
            .values()
            .filter(|i| i.invitation_code == code)
            .max_by_key(|i| (!i.status.is_terminal(), i.created_at))
            .cloned())
    }

    async fn code_in_use(&self, code: &str) -> AppResult<bool> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .invitations
            .values()
            .any(|i| i.invitation_code == code && !i.status.is_terminal()))
    }

    async fn find_live_invitation(
        &self,
        farm_id: FarmId,
        email: &str,
    ) -> AppResult<Option<Invitation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .invitations
            .values()
            .find(|i| i.farm_id == farm_id && i.invitee_email == email && !i.status.is_terminal())
            .cloned())
    }

    async fn list_farm_invitations(
        &self,
        farm_id: FarmId,
        status: Option<InvitationStatus>,
    ) -> AppResult<Vec<Invitation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut list: Vec<_> = tables
            .invitations
            .values()
            .filter(|i| i.farm_id == farm_id && status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        newest_first(&mut list, |i| i.created_at);
        Ok(list)
    }

    async fn list_email_invitations(&self, email: &str) -> AppResult<Vec<Invitation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut list: Vec<_> = tables
            .invitations
            .values()
            .filter(|i| i.invitee_email == email)
            .cloned()
            .collect();
        newest_first(&mut list, |i| i.created_at);
        Ok(list)
    }

    async fn list_expirable_invitations(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Invitation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .invitations
            .values()
            .filter(|i| i.status.is_expirable() && i.is_past_expiry(now))
            .cloned()
            .collect())
    }

    async fn list_outstanding_invitations(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Invitation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .invitations
            .values()
            .filter(|i| i.status.is_outstanding() && !i.is_past_expiry(now))
            .cloned()
            .collect())
    }

    async fn list_archivable_invitations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<Invitation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .invitations
            .values()
            .filter(|i| {
                i.status.is_terminal()
                    && i.archived_at.is_none()
                    && i.responded_at.unwrap_or(i.updated_at) <= cutoff
            })
            .cloned()
            .collect())
    }

    async fn update_invitation(&self, write: InvitationWrite) -> AppResult<Invitation> {
        self.check_audit(usize::from(write.audit.is_some()))?;
        let mut tables = self.tables.lock().await;
        let current = tables
            .invitations
            .get(&write.invitation.id)
            .ok_or_else(|| AppError::coded(ErrorCode::InvitationNotFound, "Invitation not found"))?;
        if current.version != write.expected_version {
            return Err(version_conflict("Invitation", current.id));
        }
        let mut stored = write.invitation;
        stored.version = write.expected_version + 1;
        tables.invitations.insert(stored.id, stored.clone());
        tables.audit.extend(write.audit);
        Ok(stored)
    }

    async fn accept_invitation(
        &self,
        accept: AcceptInvitation,
    ) -> AppResult<(Invitation, AccessGrant)> {
        self.check_audit(accept.audit.len())?;
        let mut tables = self.tables.lock().await;

        let current = tables
            .invitations
            .get(&accept.invitation.id)
            .ok_or_else(|| AppError::coded(ErrorCode::InvitationNotFound, "Invitation not found"))?;
        if current.version != accept.expected_version {
            return Err(version_conflict("Invitation", current.id));
        }

        let grant = match accept.grant {
            GrantChange::Insert(grant) => {
                if tables.active_grant(grant.farm_id, grant.user_id).is_some() {
                    return Err(AppError::coded(
                        ErrorCode::AlreadyMember,
                        format!("User {} already has access to farm {}", grant.user_id, grant.farm_id),
                    ));
                }
                grant
            }
            GrantChange::Update {
                mut grant,
                expected_version,
            } => {
                let stored = tables.grants.get(&grant.id).ok_or_else(|| {
                    AppError::coded(ErrorCode::GrantNotFound, "Access grant not found")
                })?;
                if stored.version != expected_version {
                    return Err(version_conflict("Access grant", grant.id));
                }
                grant.version = expected_version + 1;
                grant
            }
        };

        let mut invitation = accept.invitation;
        invitation.version = accept.expected_version + 1;
        tables.invitations.insert(invitation.id, invitation.clone());
        tables.grants.insert(grant.id, grant.clone());
        tables.audit.extend(accept.audit);

        if self.faults.drop_accept_ack.swap(false, Ordering::SeqCst) {
            return Err(AppError::storage_unavailable(
                "Connection lost while committing acceptance",
            ));
        }
        Ok((invitation, grant))
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, entry: AuditLogEntry) -> AppResult<()> {
        self.check_audit(1)?;
        self.tables.lock().await.audit.push(entry);
        Ok(())
    }

    async fn query_audit(&self, query: &AuditQuery) -> AppResult<PageResponse<AuditLogEntry>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut matched: Vec<_> = tables
            .audit
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        newest_first(&mut matched, |e| e.timestamp);
        Ok(PageResponse::from_full(matched, &query.page))
    }

    async fn prune_audit_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        self.check_storage()?;
        let mut tables = self.tables.lock().await;
        let before = tables.audit.len();
        tables.audit.retain(|e| e.timestamp >= cutoff);
        Ok((before - tables.audit.len()) as u64)
    }
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn record_event(&self, event: InvitationAnalyticsEvent) -> AppResult<()> {
        self.check_storage()?;
        if self.faults.analytics.load(Ordering::SeqCst) {
            return Err(AppError::storage_unavailable("Analytics store is unavailable"));
        }
        self.tables.lock().await.analytics.push(event);
        Ok(())
    }

    async fn farm_events(
        &self,
        farm_id: FarmId,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<InvitationAnalyticsEvent>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut events: Vec<_> = tables
            .analytics
            .iter()
            .filter(|e| e.farm_id == farm_id && e.occurred_at >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    async fn invitation_events(
        &self,
        invitation_id: InvitationId,
    ) -> AppResult<Vec<InvitationAnalyticsEvent>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut events: Vec<_> = tables
            .analytics
            .iter()
            .filter(|e| e.invitation_id == invitation_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        self.check_storage()?;
        let mut tables = self.tables.lock().await;
        let before = tables.analytics.len();
        tables.analytics.retain(|e| e.occurred_at >= cutoff);
        Ok((before - tables.analytics.len()) as u64)
    }
}

#[async_trait]
impl BulkInvitationStore for MemoryStore {
    async fn insert_bulk(
        &self,
        bulk: BulkInvitation,
        items: Vec<BulkInvitationItem>,
    ) -> AppResult<BulkInvitation> {
        self.check_storage()?;
        let mut tables = self.tables.lock().await;
        tables.bulk_items.insert(bulk.id, items);
        tables.bulks.insert(bulk.id, bulk.clone());
        Ok(bulk)
    }

    async fn find_bulk(&self, id: BulkInvitationId) -> AppResult<Option<BulkInvitation>> {
        self.check_read()?;
        Ok(self.tables.lock().await.bulks.get(&id).cloned())
    }

    async fn list_farm_bulks(&self, farm_id: FarmId) -> AppResult<Vec<BulkInvitation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut list: Vec<_> = tables
            .bulks
            .values()
            .filter(|b| b.farm_id == farm_id)
            .cloned()
            .collect();
        newest_first(&mut list, |b| b.created_at);
        Ok(list)
    }

    async fn list_bulk_items(&self, id: BulkInvitationId) -> AppResult<Vec<BulkInvitationItem>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut items = tables.bulk_items.get(&id).cloned().unwrap_or_default();
        items.sort_by_key(|i| i.position);
        Ok(items)
    }

    async fn update_bulk(
        &self,
        bulk: BulkInvitation,
        expected_version: i64,
    ) -> AppResult<BulkInvitation> {
        self.check_storage()?;
        let mut tables = self.tables.lock().await;
        let current = tables.bulks.get(&bulk.id).ok_or_else(|| {
            AppError::coded(ErrorCode::BulkInvitationNotFound, "Bulk invitation not found")
        })?;
        if current.version != expected_version {
            return Err(version_conflict("Bulk invitation", bulk.id));
        }
        let mut stored = bulk;
        stored.version = expected_version + 1;
        tables.bulks.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_bulk_item(&self, item: BulkInvitationItem) -> AppResult<()> {
        self.check_storage()?;
        let mut tables = self.tables.lock().await;
        let items = tables
            .bulk_items
            .get_mut(&item.bulk_invitation_id)
            .ok_or_else(|| {
                AppError::coded(ErrorCode::BulkInvitationNotFound, "Bulk invitation not found")
            })?;
        match items.iter_mut().find(|i| i.position == item.position) {
            Some(slot) => *slot = item,
            None => items.push(item),
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionRequestStore for MemoryStore {
    async fn insert_request(&self, request: PermissionRequest) -> AppResult<PermissionRequest> {
        self.check_storage()?;
        let mut tables = self.tables.lock().await;
        tables.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn find_request(
        &self,
        id: PermissionRequestId,
    ) -> AppResult<Option<PermissionRequest>> {
        self.check_read()?;
        Ok(self.tables.lock().await.requests.get(&id).cloned())
    }

    async fn list_farm_requests(
        &self,
        farm_id: FarmId,
        status: Option<PermissionRequestStatus>,
    ) -> AppResult<Vec<PermissionRequest>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut list: Vec<_> = tables
            .requests
            .values()
            .filter(|r| r.farm_id == farm_id && status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        newest_first(&mut list, |r| r.created_at);
        Ok(list)
    }

    async fn list_active_requests(
        &self,
        farm_id: FarmId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<PermissionRequest>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .requests
            .values()
            .filter(|r| r.farm_id == farm_id && r.requester_id == user_id && r.is_active_at(now))
            .cloned()
            .collect())
    }

    async fn list_stale_requests(
        &self,
        now: DateTime<Utc>,
        pending_cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<PermissionRequest>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .requests
            .values()
            .filter(|r| match r.status {
                PermissionRequestStatus::Pending => r.created_at <= pending_cutoff,
                PermissionRequestStatus::Approved => r.expires_at.is_some_and(|at| at <= now),
                _ => false,
            })
            .cloned()
            .collect())
    }

    async fn update_request(&self, write: RequestWrite) -> AppResult<PermissionRequest> {
        self.check_audit(usize::from(write.audit.is_some()))?;
        let mut tables = self.tables.lock().await;
        let current = tables.requests.get(&write.request.id).ok_or_else(|| {
            AppError::coded(
                ErrorCode::PermissionRequestNotFound,
                "Permission request not found",
            )
        })?;
        if current.version != write.expected_version {
            return Err(version_conflict("Permission request", current.id));
        }
        let mut stored = write.request;
        stored.version = write.expected_version + 1;
        tables.requests.insert(stored.id, stored.clone());
        tables.audit.extend(write.audit);
        Ok(stored)
    }
}
