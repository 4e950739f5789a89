//! Notification dispatch.

pub mod dispatcher;
pub mod notifier;

pub use dispatcher::{ChannelDispatcher, NoopDispatcher, TracingDispatcher};
pub use notifier::Notifier;
