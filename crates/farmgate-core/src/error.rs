//! Unified application error types for Farmgate.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator. Authorization and state-machine
//! violations always carry a specific [`ErrorCode`] or [`ErrorKind`] so the
//! calling application can render an actionable message.

use std::fmt;
use thiserror::Error;

/// Top-level error kind categorization used across the entire engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// A grant, invitation, permission request, or bulk record is absent.
    NotFound,
    /// The acting user lacks the required authority.
    PermissionDenied,
    /// A terminal-state mutation or a skipped-state transition was attempted.
    InvalidStateTransition,
    /// An invitation or temporary permission has elapsed.
    Expired,
    /// A concurrent modification or an invariant conflict occurred.
    Conflict,
    /// A rate limit was exceeded.
    Throttled,
    /// Input validation failed.
    Validation,
    /// The persistent store could not be reached or failed mid-operation.
    StorageUnavailable,
    /// A configuration error occurred.
    Configuration,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// An internal error occurred.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::PermissionDenied => write!(f, "PERMISSION_DENIED"),
            Self::InvalidStateTransition => write!(f, "INVALID_STATE_TRANSITION"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::Throttled => write!(f, "THROTTLED"),
            Self::Validation => write!(f, "VALIDATION"),
            Self::StorageUnavailable => write!(f, "STORAGE_UNAVAILABLE"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Specific failure conditions raised by the engine.
///
/// Each code belongs to exactly one [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No access grant exists for the farm/user pair.
    GrantNotFound,
    /// No invitation matches the id or code.
    InvitationNotFound,
    /// No permission request matches the id.
    PermissionRequestNotFound,
    /// No bulk invitation matches the id.
    BulkInvitationNotFound,
    /// The invitation has passed its expiry.
    InvitationExpired,
    /// The invitation was already accepted, rejected, or cancelled.
    InvitationAlreadyResponded,
    /// The invitation is waiting for an approver.
    ApprovalRequired,
    /// A reminder was sent too recently or the reminder budget is spent.
    ReminderThrottled,
    /// The mutation would leave the farm without an active owner.
    LastOwnerConstraintViolated,
    /// The temporary permission grant has elapsed.
    PermissionRequestExpired,
    /// A live invitation already exists for this farm and email.
    DuplicateInvitation,
    /// The invitee already holds an active grant on the farm.
    AlreadyMember,
    /// The approver is the inviter or the requester.
    SelfApproval,
}

impl ErrorCode {
    /// Return the error kind this code belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::GrantNotFound
            | Self::InvitationNotFound
            | Self::PermissionRequestNotFound
            | Self::BulkInvitationNotFound => ErrorKind::NotFound,
            Self::InvitationExpired | Self::PermissionRequestExpired => ErrorKind::Expired,
            Self::InvitationAlreadyResponded | Self::ApprovalRequired => {
                ErrorKind::InvalidStateTransition
            }
            Self::ReminderThrottled => ErrorKind::Throttled,
            Self::LastOwnerConstraintViolated | Self::DuplicateInvitation | Self::AlreadyMember => {
                ErrorKind::Conflict
            }
            Self::SelfApproval => ErrorKind::PermissionDenied,
        }
    }

    /// Return a message suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::GrantNotFound => "This user does not have access to the farm.",
            Self::InvitationNotFound => "This invitation could not be found.",
            Self::PermissionRequestNotFound => "This permission request could not be found.",
            Self::BulkInvitationNotFound => "This batch of invitations could not be found.",
            Self::InvitationExpired => "This invitation has expired.",
            Self::InvitationAlreadyResponded => "This invitation has already been responded to.",
            Self::ApprovalRequired => "This invitation is waiting for approval.",
            Self::ReminderThrottled => "A reminder cannot be sent for this invitation right now.",
            Self::LastOwnerConstraintViolated => "A farm must always keep at least one owner.",
            Self::PermissionRequestExpired => "The temporary permissions have expired.",
            Self::DuplicateInvitation => "This person already has a pending invitation.",
            Self::AlreadyMember => "This person is already a member of the farm.",
            Self::SelfApproval => "You cannot approve your own request.",
        }
    }

    /// Return the code as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GrantNotFound => "grant_not_found",
            Self::InvitationNotFound => "invitation_not_found",
            Self::PermissionRequestNotFound => "permission_request_not_found",
            Self::BulkInvitationNotFound => "bulk_invitation_not_found",
            Self::InvitationExpired => "invitation_expired",
            Self::InvitationAlreadyResponded => "invitation_already_responded",
            Self::ApprovalRequired => "approval_required",
            Self::ReminderThrottled => "reminder_throttled",
            Self::LastOwnerConstraintViolated => "last_owner_constraint_violated",
            Self::PermissionRequestExpired => "permission_request_expired",
            Self::DuplicateInvitation => "duplicate_invitation",
            Self::AlreadyMember => "already_member",
            Self::SelfApproval => "self_approval",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unified application error used throughout Farmgate.
///
/// All crate-specific errors are mapped into `AppError` using `From` impls
/// or explicit `.map_err()` calls.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// The specific failure condition, when one applies.
    pub code: Option<ErrorCode>,
    /// A human-readable error message.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Create an error for a specific failure condition.
    pub fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: code.kind(),
            code: Some(code),
            message: message.into(),
            source: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a permission-denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    /// Create an invalid-state-transition error.
    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidStateTransition, message)
    }

    /// Create an expired error.
    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Expired, message)
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Create a throttled error.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Throttled, message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a storage-unavailable error.
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Check whether this error carries the given code.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == Some(code)
    }

    /// Whether the failed operation may be retried as-is.
    ///
    /// Only store outages qualify, and only read operations should be
    /// retried blindly.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::StorageUnavailable
    }

    /// Return a message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self.code {
            Some(code) => code.user_message().to_string(),
            None => match self.kind {
                ErrorKind::PermissionDenied => {
                    "You don't have permission to perform this action.".to_string()
                }
                ErrorKind::StorageUnavailable => {
                    "The service is temporarily unavailable. Please try again.".to_string()
                }
                ErrorKind::Internal | ErrorKind::Configuration | ErrorKind::Serialization => {
                    "Something went wrong.".to_string()
                }
                _ => self.message.clone(),
            },
        }
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            code: self.code,
            message: self.message.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::with_source(
            ErrorKind::Validation,
            format!("Validation failed: {err}"),
            err,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coded_error_takes_kind_from_code() {
        let err = AppError::coded(ErrorCode::LastOwnerConstraintViolated, "sole owner");
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.is(ErrorCode::LastOwnerConstraintViolated));
        assert_eq!(err.user_message(), "A farm must always keep at least one owner.");
    }

    #[test]
    fn test_already_responded_is_a_state_error() {
        assert_eq!(
            ErrorCode::InvitationAlreadyResponded.kind(),
            ErrorKind::InvalidStateTransition
        );
        assert_eq!(ErrorCode::InvitationExpired.kind(), ErrorKind::Expired);
    }

    #[test]
    fn test_only_storage_errors_are_retryable() {
        assert!(AppError::storage_unavailable("down").is_retryable());
        assert!(!AppError::conflict("moved").is_retryable());
    }

    #[test]
    fn test_clone_keeps_code() {
        let err = AppError::coded(ErrorCode::ReminderThrottled, "too soon");
        let cloned = err.clone();
        assert_eq!(cloned.code, Some(ErrorCode::ReminderThrottled));
        assert_eq!(cloned.kind, ErrorKind::Throttled);
    }
}
