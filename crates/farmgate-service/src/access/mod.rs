//! Farm membership management.

pub mod service;

pub use service::AccessService;
