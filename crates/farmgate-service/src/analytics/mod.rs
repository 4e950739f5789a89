//! Invitation funnel analytics.

pub mod recorder;

pub use recorder::AnalyticsRecorder;
