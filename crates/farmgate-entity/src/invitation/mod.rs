//! Invitation entities.

pub mod model;
pub mod status;

pub use model::{Invitation, NewInvitation};
pub use status::{InvitationPriority, InvitationResponse, InvitationStatus};
