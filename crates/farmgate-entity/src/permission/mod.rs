//! Permission catalog entities.

pub mod catalog;
pub mod model;
pub mod set;

pub use catalog::PermissionCatalog;
pub use model::{Permission, PermissionCategory, RiskLevel};
pub use set::PermissionSet;
