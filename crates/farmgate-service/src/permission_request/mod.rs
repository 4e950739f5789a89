//! Temporary permission requests.

pub mod service;

pub use service::{PermissionRequestService, RequestPermissionsInput};
