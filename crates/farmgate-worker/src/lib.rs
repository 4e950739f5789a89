//! Background tasks for Farmgate.
//!
//! This crate provides:
//! - A task executor that dispatches named tasks to their handlers
//! - A cron scheduler that runs the tasks on their configured schedules
//! - Handlers for the expiration sweep, reminder dispatch, and retention

pub mod executor;
pub mod jobs;
pub mod scheduler;

pub use executor::{TaskExecutionError, TaskExecutor, TaskHandler};
pub use scheduler::CronScheduler;
