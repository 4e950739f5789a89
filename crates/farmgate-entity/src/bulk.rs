//! Bulk invitation batches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use farmgate_core::types::{BulkInvitationId, FarmId, InvitationId, UserId};

use crate::invitation::InvitationStatus;
use crate::permission::PermissionSet;
use crate::role::FarmRole;

/// Derived progress state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bulk_invitation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BulkInvitationStatus {
    /// Created, nothing processed yet.
    Pending,
    /// Items are being sent or invitations are outstanding.
    InProgress,
    /// Every item has been processed and no invitation is outstanding.
    Completed,
    /// Stopped by a user. Already-sent invitations stay live.
    Cancelled,
}

impl BulkInvitationStatus {
    /// Return the status as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BulkInvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened to one address in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkItemOutcome {
    /// Not processed yet.
    Pending,
    /// An invitation was created and sent.
    Sent {
        /// The invitation created for this address.
        invitation_id: InvitationId,
    },
    /// Creation failed; the batch carried on.
    Failed {
        /// Why it failed.
        reason: String,
    },
    /// Not processed because the batch was cancelled.
    Skipped,
}

impl BulkItemOutcome {
    /// Short label for tables and storage.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent { .. } => "sent",
            Self::Failed { .. } => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// One address in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkInvitationItem {
    /// The batch.
    pub bulk_invitation_id: BulkInvitationId,
    /// Position in the submitted list.
    pub position: i32,
    /// Normalised address.
    pub email: String,
    /// Result.
    pub outcome: BulkItemOutcome,
    /// When the outcome was recorded.
    pub processed_at: Option<DateTime<Utc>>,
}

/// The coordinating record of a batch.
///
/// Counters are disjoint buckets: `sent_count` holds dispatched invitations
/// that are still outstanding and each one moves to exactly one of
/// `accepted_count`, `rejected_count`, or `expired_count` when it resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkInvitation {
    /// Unique batch identifier.
    pub id: BulkInvitationId,
    /// The farm.
    pub farm_id: FarmId,
    /// Who submitted the batch.
    pub created_by: UserId,
    /// Role proposed to every address.
    pub default_role: FarmRole,
    /// Permission override for every address.
    pub custom_permissions: PermissionSet,
    /// Note attached to every invitation.
    pub message: Option<String>,
    /// Addresses in the batch (after de-duplication).
    pub total_invitations: i32,
    /// Outstanding invitations.
    pub sent_count: i32,
    /// Accepted invitations.
    pub accepted_count: i32,
    /// Declined invitations.
    pub rejected_count: i32,
    /// Expired or cancelled invitations.
    pub expired_count: i32,
    /// Addresses that could not be invited.
    pub failed_count: i32,
    /// Derived state.
    pub status: BulkInvitationStatus,
    /// Compare-and-set version, bumped on every write.
    pub version: i64,
    /// When the batch was submitted.
    pub created_at: DateTime<Utc>,
    /// When the batch last changed.
    pub updated_at: DateTime<Utc>,
    /// When the batch completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the batch was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl BulkInvitation {
    /// Build a pending batch.
    pub fn new(
        farm_id: FarmId,
        created_by: UserId,
        default_role: FarmRole,
        custom_permissions: PermissionSet,
        message: Option<String>,
        total_invitations: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BulkInvitationId::new(),
            farm_id,
            created_by,
            default_role,
            custom_permissions,
            message,
            total_invitations,
            sent_count: 0,
            accepted_count: 0,
            rejected_count: 0,
            expired_count: 0,
            failed_count: 0,
            status: BulkInvitationStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// Invitations that were created and sent, resolved or not.
    pub fn dispatched_count(&self) -> i32 {
        self.sent_count + self.accepted_count + self.rejected_count + self.expired_count
    }

    /// Items with a recorded outcome.
    pub fn processed_count(&self) -> i32 {
        self.dispatched_count() + self.failed_count
    }

    /// Share of the batch that was dispatched, clamped to `[0, 100]`.
    pub fn completion_percentage(&self) -> f64 {
        if self.total_invitations <= 0 {
            return 0.0;
        }
        let pct = f64::from(self.dispatched_count()) / f64::from(self.total_invitations) * 100.0;
        pct.clamp(0.0, 100.0)
    }

    /// Accepted over dispatched, 0 when nothing was dispatched.
    pub fn acceptance_rate(&self) -> f64 {
        let dispatched = self.dispatched_count();
        if dispatched == 0 {
            return 0.0;
        }
        f64::from(self.accepted_count) / f64::from(dispatched) * 100.0
    }

    /// Completed, cancelled, or every item processed.
    pub fn is_complete(&self) -> bool {
        matches!(
            self.status,
            BulkInvitationStatus::Completed | BulkInvitationStatus::Cancelled
        ) || self.processed_count() >= self.total_invitations
    }

    /// Hold a `sent` slot for an item that is about to be sent, so a
    /// resolution landing before the send returns still has a slot to move.
    ///
    /// Returns `false` when every item already has a slot.
    pub fn reserve_send(&mut self, now: DateTime<Utc>) -> bool {
        if self.processed_count() >= self.total_invitations {
            return false;
        }
        self.sent_count += 1;
        self.refresh_status(now);
        true
    }

    /// Give back a slot taken by [`reserve_send`](Self::reserve_send) whose
    /// send did not happen. A failed item is counted in `failed`.
    pub fn release_send(&mut self, failed: bool, now: DateTime<Utc>) -> bool {
        if self.sent_count == 0 {
            return false;
        }
        self.sent_count -= 1;
        if failed {
            self.failed_count += 1;
        }
        self.refresh_status(now);
        true
    }

    /// Move one outstanding invitation into its resolution bucket.
    ///
    /// Returns `false` when nothing changed (non-terminal status, or no
    /// outstanding invitation left to move).
    pub fn record_resolution(&mut self, status: InvitationStatus, now: DateTime<Utc>) -> bool {
        if self.sent_count == 0 || !status.is_terminal() {
            return false;
        }
        self.sent_count -= 1;
        match status {
            InvitationStatus::Accepted => self.accepted_count += 1,
            InvitationStatus::Rejected => self.rejected_count += 1,
            _ => self.expired_count += 1,
        }
        self.refresh_status(now);
        true
    }

    /// Stop the batch.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if matches!(
            self.status,
            BulkInvitationStatus::Completed | BulkInvitationStatus::Cancelled
        ) {
            return false;
        }
        self.status = BulkInvitationStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Recompute the derived status. Cancellation is sticky.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        if self.status == BulkInvitationStatus::Cancelled {
            return;
        }
        let next = if self.processed_count() >= self.total_invitations && self.sent_count == 0 {
            BulkInvitationStatus::Completed
        } else if self.processed_count() == 0 {
            BulkInvitationStatus::Pending
        } else {
            BulkInvitationStatus::InProgress
        };
        if next == BulkInvitationStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(total: i32) -> BulkInvitation {
        BulkInvitation::new(
            FarmId::new(),
            UserId::new(),
            FarmRole::Worker,
            PermissionSet::new(),
            None,
            total,
            Utc::now(),
        )
    }

    fn assert_counters_bounded(b: &BulkInvitation) {
        assert!(b.dispatched_count() <= b.total_invitations);
        assert!((0.0..=100.0).contains(&b.completion_percentage()));
    }

    #[test]
    fn test_counters_stay_within_total() {
        let now = Utc::now();
        let mut b = batch(3);
        assert!(b.reserve_send(now));
        assert!(b.reserve_send(now));
        assert!(b.reserve_send(now));
        assert!(b.release_send(true, now));
        assert!(!b.reserve_send(now));
        assert_eq!((b.sent_count, b.failed_count), (2, 1));
        assert_counters_bounded(&b);
        assert_eq!(b.processed_count(), 3);

        assert!(b.record_resolution(InvitationStatus::Accepted, now));
        assert!(b.record_resolution(InvitationStatus::Expired, now));
        assert!(!b.record_resolution(InvitationStatus::Rejected, now));
        assert_counters_bounded(&b);
        assert_eq!(b.status, BulkInvitationStatus::Completed);
        assert!(b.is_complete());
    }

    #[test]
    fn test_rates() {
        let now = Utc::now();
        let mut b = batch(4);
        assert_eq!(b.acceptance_rate(), 0.0);
        assert_eq!(b.completion_percentage(), 0.0);
        b.reserve_send(now);
        b.reserve_send(now);
        assert_eq!(b.completion_percentage(), 50.0);
        b.record_resolution(InvitationStatus::Accepted, now);
        assert_eq!(b.acceptance_rate(), 50.0);
        assert_eq!(b.completion_percentage(), 50.0);
        assert_eq!(b.status, BulkInvitationStatus::InProgress);
    }

    #[test]
    fn test_cancel_is_sticky() {
        let now = Utc::now();
        let mut b = batch(2);
        b.reserve_send(now);
        assert!(b.cancel(now));
        assert!(!b.cancel(now));
        b.record_resolution(InvitationStatus::Accepted, now);
        assert_eq!(b.status, BulkInvitationStatus::Cancelled);
        assert!(b.is_complete());
    }

    #[test]
    fn test_resolution_before_send_returns_is_counted() {
        let now = Utc::now();
        let mut b = batch(2);
        assert!(b.reserve_send(now));
        assert!(b.record_resolution(InvitationStatus::Accepted, now));
        assert!(b.reserve_send(now));
        assert!(b.release_send(false, now));
        assert_eq!(
            (b.sent_count, b.accepted_count, b.failed_count),
            (0, 1, 0)
        );
        assert_eq!(b.processed_count(), 1);
        assert_eq!(b.status, BulkInvitationStatus::InProgress);
    }

    #[test]
    fn test_zero_total() {
        let b = batch(0);
        assert_eq!(b.completion_percentage(), 0.0);
        assert!(b.is_complete());
    }
}
