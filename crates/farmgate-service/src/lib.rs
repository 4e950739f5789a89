//! # farmgate-service
//!
//! The Farmgate engine. Services take a [`RequestContext`] naming the
//! acting user, read through the store traits, and write with
//! compare-and-set so concurrent callers never clobber each other.
//! Notifications and analytics are best-effort and run only after the
//! triggering write has committed.

pub mod access;
pub mod analytics;
pub mod audit;
pub mod bulk;
pub mod context;
pub mod deps;
pub mod engine;
pub mod invitation;
pub mod notification;
pub mod permission_request;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

pub use access::AccessService;
pub use analytics::AnalyticsRecorder;
pub use audit::AuditTrail;
pub use bulk::{BulkInvitationCoordinator, BulkInvitationReport, BulkInvitationRequest};
pub use context::RequestContext;
pub use deps::EngineDeps;
pub use engine::AccessEngine;
pub use invitation::{CreateInvitationRequest, InvitationOutcome, InvitationService};
pub use notification::{ChannelDispatcher, NoopDispatcher, Notifier, TracingDispatcher};
pub use permission_request::{PermissionRequestService, RequestPermissionsInput};
pub use sweep::{ExpirationSweeper, RetentionReport, RetentionService, SweepReport};
