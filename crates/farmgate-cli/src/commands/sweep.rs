//! Run background tasks on demand.

use clap::{Args, ValueEnum};
use serde::Serialize;
use tabled::Tabled;

use farmgate_core::AppError;
use farmgate_core::config::AppConfig;
use farmgate_worker::TaskExecutor;
use farmgate_worker::jobs::{EXPIRATION_SWEEP, REMINDER_DISPATCH, RETENTION};

use crate::output::{self, OutputFormat};

/// Arguments for the sweep command
#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Which task to run
    #[arg(short, long, value_enum, default_value = "expiration")]
    pub task: SweepTask,
}

/// Tasks that can be run once
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SweepTask {
    /// Expire invitations, grants, and permission requests
    Expiration,
    /// Send due reminders
    Reminders,
    /// Prune old audit and analytics rows, archive resolved invitations
    Retention,
    /// All of the above
    All,
}

impl SweepTask {
    fn task_names(self) -> Vec<&'static str> {
        match self {
            Self::Expiration => vec![EXPIRATION_SWEEP],
            Self::Reminders => vec![REMINDER_DISPATCH],
            Self::Retention => vec![RETENTION],
            Self::All => vec![EXPIRATION_SWEEP, REMINDER_DISPATCH, RETENTION],
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct TaskRow {
    task: String,
    summary: String,
}

/// Execute the sweep command
pub async fn execute(
    args: &SweepArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let engine = super::build_engine(config).await?;
    let executor = TaskExecutor::for_engine(&engine);

    let mut rows = Vec::new();
    for task in args.task.task_names() {
        let summary = executor.execute(task).await?;
        rows.push(TaskRow {
            task: task.to_string(),
            summary: summary.to_string(),
        });
    }

    output::print_list(&rows, format);
    Ok(())
}
