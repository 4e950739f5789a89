//! Cron scheduler for the periodic tasks.

use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{debug, info};

use farmgate_core::config::WorkerConfig;
use farmgate_core::{AppError, AppResult};

use crate::executor::TaskExecutor;
use crate::jobs::{EXPIRATION_SWEEP, REMINDER_DISPATCH, RETENTION};

/// Runs registered tasks on cron schedules.
pub struct CronScheduler {
    scheduler: JobScheduler,
    executor: Arc<TaskExecutor>,
    config: WorkerConfig,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("tasks", &self.executor.registered_tasks())
            .finish()
    }
}

impl CronScheduler {
    /// Create a scheduler over `executor`.
    pub async fn new(executor: Arc<TaskExecutor>, config: WorkerConfig) -> AppResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {e}")))?;
        Ok(Self {
            scheduler,
            executor,
            config,
        })
    }

    /// Schedule the expiration sweep, reminder dispatch, and retention on
    /// their configured schedules.
    pub async fn register_default_tasks(&self) -> AppResult<()> {
        let schedules = [
            (EXPIRATION_SWEEP, self.config.expiration_sweep_cron.clone()),
            (REMINDER_DISPATCH, self.config.reminder_cron.clone()),
            (RETENTION, self.config.retention_cron.clone()),
        ];
        for (task, schedule) in schedules {
            self.register(task, &schedule).await?;
        }
        info!("All scheduled tasks registered");
        Ok(())
    }

    /// Schedule a registered task. Failed runs are logged and the task
    /// stays scheduled.
    pub async fn register(&self, task: &str, schedule: &str) -> AppResult<()> {
        if !self.executor.has_handler(task) {
            return Err(AppError::configuration(format!(
                "Cannot schedule '{task}': no handler registered"
            )));
        }

        let executor = Arc::clone(&self.executor);
        let name = task.to_string();
        let job = CronJob::new_async(schedule, move |_uuid, _lock| {
            let executor = Arc::clone(&executor);
            let name = name.clone();
            Box::pin(async move {
                debug!(task = %name, "Running scheduled task");
                executor.run_logged(&name).await;
            })
        })
        .map_err(|e| {
            AppError::configuration(format!("Invalid schedule '{schedule}' for '{task}': {e}"))
        })?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add schedule for '{task}': {e}")))?;

        info!(task, schedule, "Registered scheduled task");
        Ok(())
    }

    /// Start running scheduled tasks.
    pub async fn start(&self) -> AppResult<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {e}")))?;
        info!("Cron scheduler started");
        Ok(())
    }

    /// Stop the scheduler.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {e}")))?;
        info!("Cron scheduler shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use farmgate_core::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn test_rejects_unknown_task() {
        let scheduler = CronScheduler::new(Arc::new(TaskExecutor::new()), WorkerConfig::default())
            .await
            .unwrap();
        let err = scheduler.register(EXPIRATION_SWEEP, "0 * * * * *").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        let err = scheduler.register_default_tasks().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
