//! # farmgate-entity
//!
//! Domain entities for Farmgate. Every struct in this crate is either a
//! persisted record (grants, invitations, audit entries, permission
//! requests, bulk batches, analytics events) or a static catalog (roles and
//! permissions). Lifecycle rules live next to the records they govern and
//! take the current time as a parameter so callers control the clock.

pub mod analytics;
pub mod audit;
pub mod bulk;
pub mod grant;
pub mod invitation;
pub mod permission;
pub mod permission_request;
pub mod role;
pub mod urgency;

pub use analytics::{AnalyticsEventType, FunnelRollup, InvitationAnalyticsEvent};
pub use audit::{AuditAction, AuditLogEntry, AuditQuery, CreateAuditLogEntry};
pub use bulk::{BulkInvitation, BulkInvitationItem, BulkInvitationStatus, BulkItemOutcome};
pub use grant::{AccessGrant, GrantStatus};
pub use invitation::{Invitation, NewInvitation, InvitationPriority, InvitationResponse, InvitationStatus};
pub use permission::{Permission, PermissionCatalog, PermissionCategory, PermissionSet, RiskLevel};
pub use permission_request::{PermissionRequest, PermissionRequestStatus};
pub use role::{FarmRole, RoleCatalog};
pub use urgency::UrgencyLevel;
