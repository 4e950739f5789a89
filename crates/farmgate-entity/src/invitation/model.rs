//! Invitation entity model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use farmgate_core::types::{BulkInvitationId, FarmId, InvitationId, UserId};
use farmgate_core::{AppError, AppResult, ErrorCode};

use super::status::{InvitationPriority, InvitationStatus};
use crate::permission::PermissionSet;
use crate::role::FarmRole;
use crate::urgency::UrgencyLevel;

/// A time-boxed, code-bearing offer to join a farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    /// Unique invitation identifier.
    pub id: InvitationId,
    /// The farm being joined.
    pub farm_id: FarmId,
    /// The inviting member.
    pub inviter_id: UserId,
    /// Normalised (trimmed, lowercase) invitee address.
    pub invitee_email: String,
    /// Filled in once the invitee is known to the directory.
    pub invitee_user_id: Option<UserId>,
    /// Role granted on acceptance.
    pub proposed_role: FarmRole,
    /// Permission override granted on acceptance. Empty means role defaults.
    pub custom_permissions: PermissionSet,
    /// Personal note from the inviter.
    pub message: Option<String>,
    /// Inviter-chosen priority.
    pub priority: InvitationPriority,
    /// Lifecycle state.
    pub status: InvitationStatus,
    /// 8-character uppercase alphanumeric code.
    pub invitation_code: String,
    /// Link embedding the code.
    pub invitation_link: String,
    /// When the invitation was (last) sent.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the invitation stops being acceptable.
    pub expires_at: DateTime<Utc>,
    /// When the invitee (or a canceller) moved it to a terminal state.
    pub responded_at: Option<DateTime<Utc>>,
    /// Reminders sent so far.
    pub reminders_sent: i32,
    /// When the last reminder went out.
    pub last_reminder_at: Option<DateTime<Utc>>,
    /// Reminder budget.
    pub max_reminders: i32,
    /// Whether an approver must sign off before the invitation is sent.
    pub requires_approval: bool,
    /// The approver, once approved.
    pub approved_by: Option<UserId>,
    /// When approval happened.
    pub approved_at: Option<DateTime<Utc>>,
    /// Delivery confirmation time.
    pub delivered_at: Option<DateTime<Utc>>,
    /// First open time.
    pub opened_at: Option<DateTime<Utc>>,
    /// The batch this invitation belongs to.
    pub bulk_invitation_id: Option<BulkInvitationId>,
    /// Set by the retention job on old terminal invitations.
    pub archived_at: Option<DateTime<Utc>>,
    /// Compare-and-set version, bumped on every write.
    pub version: i64,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last changed.
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a new invitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvitation {
    /// The farm.
    pub farm_id: FarmId,
    /// The inviting member.
    pub inviter_id: UserId,
    /// Normalised invitee address.
    pub invitee_email: String,
    /// Directory match for the address, if any.
    pub invitee_user_id: Option<UserId>,
    /// Role granted on acceptance.
    pub proposed_role: FarmRole,
    /// Permission override.
    pub custom_permissions: PermissionSet,
    /// Personal note.
    pub message: Option<String>,
    /// Priority.
    pub priority: InvitationPriority,
    /// Generated code.
    pub invitation_code: String,
    /// Generated link.
    pub invitation_link: String,
    /// Whether approval gates sending.
    pub requires_approval: bool,
    /// Reminder budget.
    pub max_reminders: i32,
    /// Parent batch.
    pub bulk_invitation_id: Option<BulkInvitationId>,
}

impl Invitation {
    /// Build a draft. `validity` sets the provisional expiry, which is reset
    /// when the invitation is actually sent.
    pub fn draft(new: NewInvitation, validity: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: InvitationId::new(),
            farm_id: new.farm_id,
            inviter_id: new.inviter_id,
            invitee_email: new.invitee_email,
            invitee_user_id: new.invitee_user_id,
            proposed_role: new.proposed_role,
            custom_permissions: new.custom_permissions,
            message: new.message,
            priority: new.priority,
            status: InvitationStatus::Draft,
            invitation_code: new.invitation_code,
            invitation_link: new.invitation_link,
            sent_at: None,
            expires_at: now + validity,
            responded_at: None,
            reminders_sent: 0,
            last_reminder_at: None,
            max_reminders: new.max_reminders,
            requires_approval: new.requires_approval,
            approved_by: None,
            approved_at: None,
            delivered_at: None,
            opened_at: None,
            bulk_invitation_id: new.bulk_invitation_id,
            archived_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// `status ∈ {sent, delivered, opened} ∧ expires_at > now ∧ (not gated ∨ approved)`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.status.is_outstanding()
            && self.expires_at > now
            && (!self.requires_approval || self.approved_by.is_some())
    }

    /// Check if the expiry instant has been reached.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Check the reminder budget and the minimum interval.
    pub fn can_send_reminder(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        self.is_valid(now)
            && self.reminders_sent < self.max_reminders
            && self.last_reminder_at.is_none_or(|last| now - last > interval)
    }

    /// Whole days left before expiry (negative once expired).
    pub fn days_until_expiration(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }

    /// Critical for urgent invitations, otherwise driven by time left.
    pub fn urgency(&self, now: DateTime<Utc>) -> UrgencyLevel {
        if self.priority == InvitationPriority::Urgent {
            return UrgencyLevel::Critical;
        }
        match self.days_until_expiration(now) {
            d if d <= 1 => UrgencyLevel::High,
            d if d <= 3 => UrgencyLevel::Medium,
            _ => UrgencyLevel::Low,
        }
    }

    /// Permissions granted on acceptance.
    pub fn effective_permissions(&self) -> PermissionSet {
        if self.custom_permissions.is_empty() {
            self.proposed_role.default_permissions()
        } else {
            self.custom_permissions.clone()
        }
    }

    /// Apply a status transition and its timestamps.
    ///
    /// Any move out of a terminal state fails with
    /// [`ErrorCode::InvitationAlreadyResponded`].
    pub fn transition(&mut self, next: InvitationStatus, now: DateTime<Utc>) -> AppResult<()> {
        if self.status.is_terminal() {
            return Err(AppError::coded(
                ErrorCode::InvitationAlreadyResponded,
                format!("Invitation {} is already {}", self.id, self.status),
            ));
        }
        if !self.status.can_transition_to(next) {
            return Err(AppError::invalid_transition(format!(
                "Invitation cannot move from {} to {}",
                self.status, next
            )));
        }
        if next.is_terminal() && self.status.is_expirable() {
            self.responded_at = Some(now);
        }
        match next {
            InvitationStatus::Delivered => self.delivered_at = Some(now),
            InvitationStatus::Opened => {
                self.opened_at.get_or_insert(now);
            }
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Move a draft or an approved invitation to sent, restarting the
    /// validity window.
    pub fn mark_sent(&mut self, validity: Duration, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(InvitationStatus::Sent, now)?;
        self.sent_at = Some(now);
        self.expires_at = now + validity;
        Ok(())
    }

    /// Record the approver and send.
    pub fn approve(
        &mut self,
        approver: UserId,
        validity: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        if self.status != InvitationStatus::PendingApproval && !self.status.is_terminal() {
            return Err(AppError::invalid_transition(format!(
                "Invitation {} is {} and not awaiting approval",
                self.id, self.status
            )));
        }
        // Terminal invitations fail inside the transition.
        self.mark_sent(validity, now)?;
        self.approved_by = Some(approver);
        self.approved_at = Some(now);
        Ok(())
    }

    /// Count a reminder.
    pub fn record_reminder(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if self.reminders_sent >= self.max_reminders {
            return Err(AppError::coded(
                ErrorCode::ReminderThrottled,
                format!("Invitation {} has used all {} reminders", self.id, self.max_reminders),
            ));
        }
        self.reminders_sent += 1;
        self.last_reminder_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Terminal, not yet archived, and terminal for at least `after`.
    pub fn is_archivable(&self, after: Duration, now: DateTime<Utc>) -> bool {
        self.status.is_terminal()
            && self.archived_at.is_none()
            && self.responded_at.unwrap_or(self.updated_at) + after <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_invitation(requires_approval: bool) -> NewInvitation {
        NewInvitation {
            farm_id: FarmId::new(),
            inviter_id: UserId::new(),
            invitee_email: "bob@x.com".into(),
            invitee_user_id: None,
            proposed_role: FarmRole::Manager,
            custom_permissions: PermissionSet::new(),
            message: None,
            priority: InvitationPriority::Normal,
            invitation_code: "ABCD1234".into(),
            invitation_link: "https://farm.test/invite/ABCD1234".into(),
            requires_approval,
            max_reminders: 3,
            bulk_invitation_id: None,
        }
    }

    fn sent(now: DateTime<Utc>) -> Invitation {
        let mut inv = Invitation::draft(new_invitation(false), Duration::days(7), now);
        inv.mark_sent(Duration::days(7), now).unwrap();
        inv
    }

    #[test]
    fn test_send_sets_window() {
        let now = Utc::now();
        let inv = sent(now);
        assert_eq!(inv.status, InvitationStatus::Sent);
        assert_eq!(inv.sent_at, Some(now));
        assert_eq!(inv.expires_at, now + Duration::days(7));
        assert_eq!(inv.reminders_sent, 0);
        assert!(inv.is_valid(now));
        assert!(!inv.is_valid(now + Duration::days(7)));
    }

    #[test]
    fn test_delivery_tracking_keeps_validity() {
        let now = Utc::now();
        let mut inv = sent(now);
        inv.transition(InvitationStatus::Delivered, now).unwrap();
        inv.transition(InvitationStatus::Opened, now).unwrap();
        assert!(inv.is_valid(now));
        assert!(inv.responded_at.is_none());
    }

    #[test]
    fn test_gated_invitation_needs_approver() {
        let now = Utc::now();
        let mut inv = Invitation::draft(new_invitation(true), Duration::days(7), now);
        inv.transition(InvitationStatus::PendingApproval, now).unwrap();
        assert!(!inv.is_valid(now));

        let later = now + Duration::days(2);
        let approver = UserId::new();
        inv.approve(approver, Duration::days(7), later).unwrap();
        assert_eq!(inv.approved_by, Some(approver));
        assert_eq!(inv.expires_at, later + Duration::days(7));
        assert!(inv.is_valid(later));
    }

    #[test]
    fn test_terminal_transition_fails_with_already_responded() {
        let now = Utc::now();
        for terminal in [
            InvitationStatus::Accepted,
            InvitationStatus::Rejected,
            InvitationStatus::Expired,
            InvitationStatus::Cancelled,
        ] {
            let mut inv = sent(now);
            inv.transition(terminal, now).unwrap();
            assert_eq!(inv.responded_at, Some(now));
            for next in InvitationStatus::ALL {
                let err = inv.transition(next, now).unwrap_err();
                assert_eq!(err.kind, farmgate_core::ErrorKind::InvalidStateTransition);
                assert!(err.is(ErrorCode::InvitationAlreadyResponded));
            }
        }
    }

    #[test]
    fn test_reminders_never_exceed_budget() {
        let mut now = Utc::now();
        let mut inv = sent(now);
        let interval = Duration::hours(24);
        assert!(inv.can_send_reminder(now, interval));
        inv.record_reminder(now).unwrap();
        assert!(!inv.can_send_reminder(now + Duration::hours(23), interval));

        for _ in 1..inv.max_reminders {
            now += Duration::hours(25);
            assert!(inv.can_send_reminder(now, interval));
            inv.record_reminder(now).unwrap();
        }
        assert_eq!(inv.reminders_sent, inv.max_reminders);
        assert!(!inv.can_send_reminder(now + Duration::hours(48), interval));
        assert!(inv.record_reminder(now).unwrap_err().is(ErrorCode::ReminderThrottled));
        assert_eq!(inv.reminders_sent, inv.max_reminders);
    }

    #[test]
    fn test_urgency() {
        let now = Utc::now();
        let mut inv = sent(now);
        assert_eq!(inv.urgency(now), UrgencyLevel::Low);
        assert_eq!(inv.urgency(now + Duration::days(4)), UrgencyLevel::Medium);
        assert_eq!(inv.urgency(now + Duration::days(6)), UrgencyLevel::High);
        inv.priority = InvitationPriority::Urgent;
        assert_eq!(inv.urgency(now), UrgencyLevel::Critical);
    }

    #[test]
    fn test_effective_permissions() {
        let now = Utc::now();
        let mut inv = sent(now);
        assert_eq!(inv.effective_permissions(), FarmRole::Manager.default_permissions());
        inv.custom_permissions =
            PermissionSet::from([crate::permission::Permission::ViewFarm]);
        assert_eq!(inv.effective_permissions().len(), 1);
    }

    #[test]
    fn test_archivable_after_window() {
        let now = Utc::now();
        let mut inv = sent(now);
        assert!(!inv.is_archivable(Duration::days(90), now + Duration::days(365)));
        inv.transition(InvitationStatus::Rejected, now).unwrap();
        assert!(!inv.is_archivable(Duration::days(90), now + Duration::days(89)));
        assert!(inv.is_archivable(Duration::days(90), now + Duration::days(90)));
    }
}
