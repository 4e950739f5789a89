//! Background maintenance runs.

pub mod expiration;
pub mod retention;

pub use expiration::{ExpirationSweeper, SweepReport};
pub use retention::{RetentionReport, RetentionService};
