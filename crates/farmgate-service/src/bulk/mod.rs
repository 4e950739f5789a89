//! Bulk invitations.

pub mod coordinator;
pub mod progress;

pub use coordinator::{BulkInvitationCoordinator, BulkInvitationReport, BulkInvitationRequest};
pub use progress::BulkProgress;
