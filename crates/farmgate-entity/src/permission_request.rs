//! Temporary elevated permission requests.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use farmgate_core::types::{FarmId, PermissionRequestId, UserId};
use farmgate_core::{AppError, AppResult};

use crate::permission::PermissionSet;
use crate::urgency::UrgencyLevel;

/// Lifecycle state of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "permission_request_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PermissionRequestStatus {
    /// Waiting for a reviewer.
    Pending,
    /// Granted for a limited time.
    Approved,
    /// Declined by a reviewer.
    Rejected,
    /// The review or the granted window elapsed.
    Expired,
    /// Withdrawn after approval.
    Revoked,
}

impl PermissionRequestStatus {
    /// Check if the request has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Expired | Self::Revoked)
    }

    /// Check if the edge `self -> next` exists.
    pub fn can_transition_to(&self, next: PermissionRequestStatus) -> bool {
        use PermissionRequestStatus::*;
        matches!(
            (self, next),
            (Pending, Approved | Rejected | Expired) | (Approved, Expired | Revoked)
        )
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for PermissionRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PermissionRequestStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            _ => Err(AppError::validation(format!(
                "Invalid permission request status: '{s}'"
            ))),
        }
    }
}

/// A member's ask for temporary extra permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Unique request identifier.
    pub id: PermissionRequestId,
    /// The farm.
    pub farm_id: FarmId,
    /// The asking member.
    pub requester_id: UserId,
    /// What they want.
    pub requested_permissions: PermissionSet,
    /// Why they want it.
    pub reason: String,
    /// How soon they need it.
    pub urgency_level: UrgencyLevel,
    /// How long the permissions last once approved.
    pub duration_hours: i64,
    /// Lifecycle state.
    pub status: PermissionRequestStatus,
    /// The reviewer.
    pub reviewed_by: Option<UserId>,
    /// When it was reviewed.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Reviewer's note.
    pub review_note: Option<String>,
    /// End of the granted window, set on approval.
    pub expires_at: Option<DateTime<Utc>>,
    /// Compare-and-set version, bumped on every write.
    pub version: i64,
    /// When the request was made.
    pub created_at: DateTime<Utc>,
    /// When the request last changed.
    pub updated_at: DateTime<Utc>,
}

impl PermissionRequest {
    /// Build a pending request.
    pub fn new(
        farm_id: FarmId,
        requester_id: UserId,
        requested_permissions: PermissionSet,
        reason: String,
        urgency_level: UrgencyLevel,
        duration_hours: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PermissionRequestId::new(),
            farm_id,
            requester_id,
            requested_permissions,
            reason,
            urgency_level,
            duration_hours,
            status: PermissionRequestStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
            expires_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Approved and inside its window.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PermissionRequestStatus::Approved
            && self.expires_at.is_some_and(|at| at > now)
    }

    /// Whether the sweep should expire this request.
    pub fn is_stale(&self, pending_ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.status {
            PermissionRequestStatus::Pending => self.created_at + pending_ttl <= now,
            PermissionRequestStatus::Approved => self.expires_at.is_some_and(|at| at <= now),
            _ => false,
        }
    }

    /// Apply a status transition.
    pub fn transition(&mut self, next: PermissionRequestStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::invalid_transition(format!(
                "Permission request cannot move from {} to {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Approve and open the granted window.
    pub fn approve(&mut self, reviewer: UserId, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(PermissionRequestStatus::Approved, now)?;
        self.reviewed_by = Some(reviewer);
        self.reviewed_at = Some(now);
        self.expires_at = Some(now + Duration::hours(self.duration_hours));
        Ok(())
    }

    /// Decline.
    pub fn reject(
        &mut self,
        reviewer: UserId,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.transition(PermissionRequestStatus::Rejected, now)?;
        self.reviewed_by = Some(reviewer);
        self.reviewed_at = Some(now);
        self.review_note = note;
        Ok(())
    }
}
