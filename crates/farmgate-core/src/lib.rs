//! # farmgate-core
//!
//! Core crate for Farmgate, the farm access-control and invitation engine.
//! Contains the unified error system, configuration schemas, typed
//! identifiers, pagination types, notification payloads, and the traits
//! for the external collaborators the engine consumes (clock, user
//! directory, notification dispatcher).
//!
//! This crate has **no** internal dependencies on other Farmgate crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod traits;
pub mod types;

pub use error::{AppError, ErrorCode, ErrorKind};
pub use result::AppResult;
