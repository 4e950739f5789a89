//! Audit trail queries and retention.

pub mod trail;

pub use trail::AuditTrail;
