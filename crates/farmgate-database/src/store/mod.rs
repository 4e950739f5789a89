//! Store interfaces the engine is written against.
//!
//! Reads return current snapshots. Every write on a versioned record names
//! the version it was computed from and fails with a `Conflict` when the
//! stored row has moved on; the stored version is then `expected + 1`.
//! Writes that carry audit entries commit them atomically with the change.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

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

/// A compare-and-set update of an access grant.
#[derive(Debug, Clone)]
pub struct GrantWrite {
    /// The new state of the grant.
    pub grant: AccessGrant,
    /// The version the new state was derived from.
    pub expected_version: i64,
    /// Reject the write if it leaves the farm without a managing owner.
    pub enforce_owner_floor: bool,
    /// Entry appended in the same transaction.
    pub audit: AuditLogEntry,
}

/// A compare-and-set update of an invitation.
#[derive(Debug, Clone)]
pub struct InvitationWrite {
    /// The new state of the invitation.
    pub invitation: Invitation,
    /// The version the new state was derived from.
    pub expected_version: i64,
    /// Entry appended in the same transaction, for access-affecting changes.
    pub audit: Option<AuditLogEntry>,
}

/// The grant half of an acceptance.
#[derive(Debug, Clone)]
pub enum GrantChange {
    /// Create a new active grant. Fails if the user already has one.
    Insert(AccessGrant),
    /// Update the user's existing active grant.
    Update {
        /// New state.
        grant: AccessGrant,
        /// Version it was derived from.
        expected_version: i64,
    },
}

impl GrantChange {
    /// The grant as it will be stored (before the version bump).
    pub fn grant(&self) -> &AccessGrant {
        match self {
            Self::Insert(grant) | Self::Update { grant, .. } => grant,
        }
    }
}

/// Everything an acceptance writes, committed as one unit.
#[derive(Debug, Clone)]
pub struct AcceptInvitation {
    /// The invitation in its accepted state.
    pub invitation: Invitation,
    /// The invitation version the acceptance was derived from.
    pub expected_version: i64,
    /// The grant insert or update.
    pub grant: GrantChange,
    /// Audit entries for the acceptance.
    pub audit: Vec<AuditLogEntry>,
}

/// A compare-and-set update of a permission request.
#[derive(Debug, Clone)]
pub struct RequestWrite {
    /// The new state of the request.
    pub request: PermissionRequest,
    /// The version the new state was derived from.
    pub expected_version: i64,
    /// Entry appended in the same transaction.
    pub audit: Option<AuditLogEntry>,
}

/// Access grant persistence.
#[async_trait]
pub trait GrantStore: Send + Sync + std::fmt::Debug {
    /// The user's active grant on a farm.
    async fn find_active_grant(
        &self,
        farm_id: FarmId,
        user_id: UserId,
    ) -> AppResult<Option<AccessGrant>>;

    /// A grant by row id, active or not.
    async fn find_grant(&self, id: GrantId) -> AppResult<Option<AccessGrant>>;

    /// Grants on a farm, oldest first.
    async fn list_farm_grants(
        &self,
        farm_id: FarmId,
        include_inactive: bool,
    ) -> AppResult<Vec<AccessGrant>>;

    /// Active grants held by a user, oldest first.
    async fn list_user_grants(&self, user_id: UserId) -> AppResult<Vec<AccessGrant>>;

    /// Insert a grant. Fails with `AlreadyMember` if the user already holds
    /// an active grant on the farm.
    async fn insert_grant(&self, grant: AccessGrant, audit: AuditLogEntry)
    -> AppResult<AccessGrant>;

    /// Insert the first grant on a farm. Fails with `Conflict` if the farm
    /// has any grant at all.
    async fn insert_first_grant(
        &self,
        grant: AccessGrant,
        audit: AuditLogEntry,
    ) -> AppResult<AccessGrant>;

    /// Compare-and-set update with optional owner-floor check.
    async fn update_grant(&self, write: GrantWrite) -> AppResult<AccessGrant>;

    /// Record a successful access check. Does not bump the version.
    async fn touch_grant(&self, id: GrantId, at: DateTime<Utc>) -> AppResult<()>;

    /// Active, non-terminal grants whose expiry is at or before `now`.
    async fn list_grants_past_expiry(&self, now: DateTime<Utc>) -> AppResult<Vec<AccessGrant>>;
}

/// Invitation persistence.
#[async_trait]
pub trait InvitationStore: Send + Sync + std::fmt::Debug {
    /// Insert an invitation. Fails with `DuplicateInvitation` if a
    /// non-terminal invitation exists for the farm and email, and with an
    /// uncoded `Conflict` if the code is held by a non-terminal invitation.
    async fn insert_invitation(
        &self,
        invitation: Invitation,
        audit: Option<AuditLogEntry>,
    ) -> AppResult<Invitation>;

    /// An invitation by id.
    async fn find_invitation(&self, id: InvitationId) -> AppResult<Option<Invitation>>;

    /// An invitation by code. A non-terminal holder wins over older
    /// terminal ones; among terminal ones the newest wins.
    async fn find_invitation_by_code(&self, code: &str) -> AppResult<Option<Invitation>>;

    /// Whether a non-terminal invitation holds the code.
    async fn code_in_use(&self, code: &str) -> AppResult<bool>;

    /// The non-terminal invitation for a farm and email.
    async fn find_live_invitation(
        &self,
        farm_id: FarmId,
        email: &str,
    ) -> AppResult<Option<Invitation>>;

    /// Invitations for a farm, newest first.
    async fn list_farm_invitations(
        &self,
        farm_id: FarmId,
        status: Option<InvitationStatus>,
    ) -> AppResult<Vec<Invitation>>;

    /// Invitations addressed to an email, newest first.
    async fn list_email_invitations(&self, email: &str) -> AppResult<Vec<Invitation>>;

    /// Sent, delivered, opened, or pending-approval invitations whose expiry
    /// is at or before `now`.
    async fn list_expirable_invitations(&self, now: DateTime<Utc>)
    -> AppResult<Vec<Invitation>>;

    /// Sent, delivered, or opened invitations that have not expired.
    async fn list_outstanding_invitations(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Invitation>>;

    /// Terminal, unarchived invitations that reached their final state at
    /// or before `cutoff`.
    async fn list_archivable_invitations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<Invitation>>;

    /// Compare-and-set update.
    async fn update_invitation(&self, write: InvitationWrite) -> AppResult<Invitation>;

    /// Accept an invitation and create or update the grant, atomically.
    async fn accept_invitation(
        &self,
        accept: AcceptInvitation,
    ) -> AppResult<(Invitation, AccessGrant)>;
}

/// Audit log persistence.
#[async_trait]
pub trait AuditStore: Send + Sync + std::fmt::Debug {
    /// Append one entry.
    async fn append_audit(&self, entry: AuditLogEntry) -> AppResult<()>;

    /// Filtered, paginated read, newest first.
    async fn query_audit(&self, query: &AuditQuery) -> AppResult<PageResponse<AuditLogEntry>>;

    /// Delete entries older than `cutoff`. Returns the number removed.
    async fn prune_audit_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

/// Analytics event persistence.
#[async_trait]
pub trait AnalyticsStore: Send + Sync + std::fmt::Debug {
    /// Append one event.
    async fn record_event(&self, event: InvitationAnalyticsEvent) -> AppResult<()>;

    /// Events for a farm at or after `since`, oldest first.
    async fn farm_events(
        &self,
        farm_id: FarmId,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<InvitationAnalyticsEvent>>;

    /// Events for one invitation, oldest first.
    async fn invitation_events(
        &self,
        invitation_id: InvitationId,
    ) -> AppResult<Vec<InvitationAnalyticsEvent>>;

    /// Delete events older than `cutoff`. Returns the number removed.
    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

/// Bulk invitation persistence.
#[async_trait]
pub trait BulkInvitationStore: Send + Sync + std::fmt::Debug {
    /// Insert the batch with its items.
    async fn insert_bulk(
        &self,
        bulk: BulkInvitation,
        items: Vec<BulkInvitationItem>,
    ) -> AppResult<BulkInvitation>;

    /// A batch by id.
    async fn find_bulk(&self, id: BulkInvitationId) -> AppResult<Option<BulkInvitation>>;

    /// Batches for a farm, newest first.
    async fn list_farm_bulks(&self, farm_id: FarmId) -> AppResult<Vec<BulkInvitation>>;

    /// Items of a batch in submission order.
    async fn list_bulk_items(&self, id: BulkInvitationId) -> AppResult<Vec<BulkInvitationItem>>;

    /// Compare-and-set update of the batch record.
    async fn update_bulk(
        &self,
        bulk: BulkInvitation,
        expected_version: i64,
    ) -> AppResult<BulkInvitation>;

    /// Overwrite one item's outcome.
    async fn update_bulk_item(&self, item: BulkInvitationItem) -> AppResult<()>;
}

/// Permission request persistence.
#[async_trait]
pub trait PermissionRequestStore: Send + Sync + std::fmt::Debug {
    /// Insert a request.
    async fn insert_request(&self, request: PermissionRequest) -> AppResult<PermissionRequest>;

    /// A request by id.
    async fn find_request(&self, id: PermissionRequestId)
    -> AppResult<Option<PermissionRequest>>;

    /// Requests on a farm, newest first.
    async fn list_farm_requests(
        &self,
        farm_id: FarmId,
        status: Option<PermissionRequestStatus>,
    ) -> AppResult<Vec<PermissionRequest>>;

    /// Approved requests for a user whose window is still open.
    async fn list_active_requests(
        &self,
        farm_id: FarmId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<PermissionRequest>>;

    /// Approved requests past their window, and pending requests created
    /// at or before `pending_cutoff`.
    async fn list_stale_requests(
        &self,
        now: DateTime<Utc>,
        pending_cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<PermissionRequest>>;

    /// Compare-and-set update.
    async fn update_request(&self, write: RequestWrite) -> AppResult<PermissionRequest>;
}

/// Handles to every store, usually all backed by the same object.
#[derive(Debug, Clone)]
pub struct Stores {
    /// Access grants.
    pub grants: Arc<dyn GrantStore>,
    /// Invitations.
    pub invitations: Arc<dyn InvitationStore>,
    /// Audit log.
    pub audit: Arc<dyn AuditStore>,
    /// Analytics events.
    pub analytics: Arc<dyn AnalyticsStore>,
    /// Bulk batches.
    pub bulk: Arc<dyn BulkInvitationStore>,
    /// Permission requests.
    pub requests: Arc<dyn PermissionRequestStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: GrantStore
            + InvitationStore
            + AuditStore
            + AnalyticsStore
            + BulkInvitationStore
            + PermissionRequestStore
            + 'static,
    {
        Self {
            grants: backend.clone(),
            invitations: backend.clone(),
            audit: backend.clone(),
            analytics: backend.clone(),
            bulk: backend.clone(),
            requests: backend,
        }
    }
}

/// Fail if replacing `before` with `after` removes the last owner that
/// keeps the farm managed (see [`AccessGrant::holds_owner_floor`]).
/// Demotion, revocation, suspension, a new expiry, or an override without
/// management permissions all count as leaving.
///
/// `live_owners` is the number of stored grants on the farm that hold the
/// floor, including `before` itself.
pub fn check_owner_floor(
    before: &AccessGrant,
    after: &AccessGrant,
    live_owners: usize,
) -> AppResult<()> {
    if before.holds_owner_floor() && !after.holds_owner_floor() && live_owners <= 1 {
        return Err(AppError::coded(
            ErrorCode::LastOwnerConstraintViolated,
            format!("Farm {} must keep at least one owner", before.farm_id),
        ));
    }
    Ok(())
}

/// The error returned when a compare-and-set write loses.
pub fn version_conflict(what: &str, id: impl std::fmt::Display) -> AppError {
    AppError::conflict(format!("{what} {id} was modified concurrently"))
}
