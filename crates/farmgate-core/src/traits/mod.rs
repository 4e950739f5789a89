//! Traits for the collaborators the engine consumes.
//!
//! Implementations live in other crates (or in the surrounding
//! application); the engine only ever talks to these seams.

pub mod clock;
pub mod directory;
pub mod notifier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::UserDirectory;
pub use notifier::NotificationDispatcher;
