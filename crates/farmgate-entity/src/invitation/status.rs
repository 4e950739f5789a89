//! Invitation status, priority, and response enumerations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use farmgate_core::AppError;

/// Lifecycle state of an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invitation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    /// Created but not yet sent.
    Draft,
    /// Sent to the invitee.
    Sent,
    /// The delivery transport confirmed delivery.
    Delivered,
    /// The invitee opened the message.
    Opened,
    /// The invitee accepted.
    Accepted,
    /// The invitee declined.
    Rejected,
    /// The invitation passed its expiry.
    Expired,
    /// Withdrawn by the inviter, a manager, or an approver.
    Cancelled,
    /// Waiting for an approver before it is sent.
    PendingApproval,
}

impl InvitationStatus {
    /// Every status.
    pub const ALL: [InvitationStatus; 9] = [
        Self::Draft,
        Self::Sent,
        Self::Delivered,
        Self::Opened,
        Self::Accepted,
        Self::Rejected,
        Self::Expired,
        Self::Cancelled,
        Self::PendingApproval,
    ];

    /// Check if the invitation has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Rejected | Self::Expired | Self::Cancelled
        )
    }

    /// Sent, delivered, or opened. Delivery tracking is advisory, so all
    /// three count as "sent" for validity checks.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Opened)
    }

    /// States the expiration sweep considers.
    pub fn is_expirable(&self) -> bool {
        self.is_outstanding() || *self == Self::PendingApproval
    }

    /// Check if the edge `self -> next` exists.
    pub fn can_transition_to(&self, next: InvitationStatus) -> bool {
        use InvitationStatus::*;
        match self {
            Draft => matches!(next, Sent | PendingApproval | Cancelled),
            PendingApproval => matches!(next, Sent | Cancelled | Expired),
            Sent => matches!(
                next,
                Delivered | Opened | Accepted | Rejected | Expired | Cancelled
            ),
            Delivered => matches!(next, Opened | Accepted | Rejected | Expired | Cancelled),
            Opened => matches!(next, Accepted | Rejected | Expired | Cancelled),
            Accepted | Rejected | Expired | Cancelled => false,
        }
    }

    /// Return the status as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::PendingApproval => "pending_approval",
        }
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| AppError::validation(format!("Invalid invitation status: '{s}'")))
    }
}

/// Priority chosen by the inviter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invitation_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvitationPriority {
    /// Low priority.
    Low,
    /// Normal priority (default).
    #[default]
    Normal,
    /// High priority.
    High,
    /// Always rendered as critical.
    Urgent,
}

impl InvitationPriority {
    /// Return the priority as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for InvitationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InvitationPriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(AppError::validation(format!("Invalid invitation priority: '{s}'"))),
        }
    }
}

/// The invitee's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationResponse {
    /// Join the farm.
    Accept,
    /// Decline.
    Reject,
}

impl InvitationResponse {
    /// The status an invitation moves to for this response.
    pub fn target_status(&self) -> InvitationStatus {
        match self {
            Self::Accept => InvitationStatus::Accepted,
            Self::Reject => InvitationStatus::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_edges() {
        for from in InvitationStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in InvitationStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_canonical_edges() {
        use InvitationStatus::*;
        assert!(Draft.can_transition_to(Sent));
        assert!(Draft.can_transition_to(PendingApproval));
        assert!(PendingApproval.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Opened));
        assert!(Opened.can_transition_to(Accepted));
        assert!(!Draft.can_transition_to(Accepted));
        assert!(!PendingApproval.can_transition_to(Accepted));
        assert!(!Opened.can_transition_to(Delivered));
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "pending_approval".parse::<InvitationStatus>().unwrap(),
            InvitationStatus::PendingApproval
        );
        assert!("lost".parse::<InvitationStatus>().is_err());
        assert_eq!(
            "URGENT".parse::<InvitationPriority>().unwrap(),
            InvitationPriority::Urgent
        );
    }
}
