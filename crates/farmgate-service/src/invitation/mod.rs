//! Invitation lifecycle.

pub mod request;
pub mod service;

pub use request::{CreateInvitationRequest, InvitationOutcome};
pub use service::InvitationService;
