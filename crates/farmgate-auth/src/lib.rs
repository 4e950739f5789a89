//! # farmgate-auth
//!
//! Authorization and invitation primitives for Farmgate.
//!
//! ## Modules
//!
//! - `rbac`: grant validity, permission checks, role management authority
//!   and delegation limits
//! - `invitation`: invitation code generation, link building, and email
//!   normalisation

pub mod invitation;
pub mod rbac;

pub use invitation::{
    CodeGenerator, InvitationLinkBuilder, RandomCodeGenerator, normalize_code, normalize_email,
};
pub use rbac::{AccessEnforcer, ActorAuthority};
