//! Invitation code generation, link building, and invitee email handling.

pub mod code;
pub mod email;

pub use code::{CodeGenerator, InvitationLinkBuilder, RandomCodeGenerator, normalize_code};
pub use email::normalize_email;
