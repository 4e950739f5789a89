//! Role-based access enforcement over farm grants.

pub mod enforcer;

pub use enforcer::{AccessEnforcer, ActorAuthority};
