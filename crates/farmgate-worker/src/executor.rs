//! Task executor that dispatches named tasks to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use farmgate_core::AppError;
use farmgate_service::AccessEngine;

use crate::jobs::{ExpirationTaskHandler, ReminderTaskHandler, RetentionTaskHandler};

/// A unit of periodic work.
#[async_trait]
pub trait TaskHandler: Send + Sync + std::fmt::Debug {
    /// Name the task is registered and scheduled under.
    fn task_name(&self) -> &str;

    /// Run the task once and summarise what it did.
    async fn execute(&self) -> Result<Value, TaskExecutionError>;
}

/// Error from running a task.
#[derive(Debug, thiserror::Error)]
pub enum TaskExecutionError {
    /// No handler is registered under the name.
    #[error("No handler registered for task '{0}'")]
    UnknownTask(String),

    /// The backing store was unavailable; the next run may succeed.
    #[error("Transient task failure: {0}")]
    Transient(AppError),

    /// The task failed.
    #[error("Task failed: {0}")]
    Failed(AppError),
}

impl From<AppError> for TaskExecutionError {
    fn from(err: AppError) -> Self {
        if err.is_retryable() {
            Self::Transient(err)
        } else {
            Self::Failed(err)
        }
    }
}

impl From<TaskExecutionError> for AppError {
    fn from(err: TaskExecutionError) -> Self {
        match err {
            TaskExecutionError::UnknownTask(name) => {
                AppError::configuration(format!("No handler registered for task '{name}'"))
            }
            TaskExecutionError::Transient(e) | TaskExecutionError::Failed(e) => e,
        }
    }
}

/// Dispatches tasks to the handler registered under their name.
#[derive(Debug, Default)]
pub struct TaskExecutor {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskExecutor {
    /// Create an executor with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor with the engine's expiration, reminder, and
    /// retention tasks registered.
    pub fn for_engine(engine: &AccessEngine) -> Self {
        let mut executor = Self::new();
        executor.register(Arc::new(ExpirationTaskHandler::new(engine.sweeper.clone())));
        executor.register(Arc::new(ReminderTaskHandler::new(engine.invitations.clone())));
        executor.register(Arc::new(RetentionTaskHandler::new(engine.retention.clone())));
        executor
    }

    /// Register a handler, replacing any previous one with the same name.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let name = handler.task_name().to_string();
        info!(task = %name, "Registered task handler");
        self.handlers.insert(name, handler);
    }

    /// Run a task by name.
    pub async fn execute(&self, task: &str) -> Result<Value, TaskExecutionError> {
        let handler = self
            .handlers
            .get(task)
            .ok_or_else(|| TaskExecutionError::UnknownTask(task.to_string()))?;
        handler.execute().await
    }

    /// Run a task and log the outcome instead of returning it. Used by the
    /// scheduler, where a failed run must not stop later runs.
    pub async fn run_logged(&self, task: &str) {
        let started = Instant::now();
        match self.execute(task).await {
            Ok(summary) => info!(
                task,
                elapsed_ms = started.elapsed().as_millis() as u64,
                summary = %summary,
                "Task completed"
            ),
            Err(e @ TaskExecutionError::Transient(_)) => {
                warn!(task, error = %e, "Task failed, will retry on next schedule")
            }
            Err(e) => error!(task, error = %e, "Task failed"),
        }
    }

    /// Whether a handler is registered under `task`.
    pub fn has_handler(&self, task: &str) -> bool {
        self.handlers.contains_key(task)
    }

    /// Registered task names, sorted.
    pub fn registered_tasks(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use farmgate_core::ErrorKind;
    use serde_json::json;

    use super::*;

    #[derive(Debug)]
    struct Failing(fn() -> AppError);

    #[async_trait]
    impl TaskHandler for Failing {
        fn task_name(&self) -> &str {
            "failing"
        }

        async fn execute(&self) -> Result<Value, TaskExecutionError> {
            Err((self.0)().into())
        }
    }

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        fn task_name(&self) -> &str {
            "echo"
        }

        async fn execute(&self) -> Result<Value, TaskExecutionError> {
            Ok(json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn test_dispatches_by_name() {
        let mut executor = TaskExecutor::new();
        executor.register(Arc::new(Echo));
        assert_eq!(executor.execute("echo").await.unwrap(), json!({"ok": true}));
        assert!(matches!(
            executor.execute("missing").await,
            Err(TaskExecutionError::UnknownTask(name)) if name == "missing"
        ));
        assert_eq!(executor.registered_tasks(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_storage_failures_are_transient() {
        let mut executor = TaskExecutor::new();
        executor.register(Arc::new(Failing(|| AppError::storage_unavailable("db down"))));
        let err = executor.execute("failing").await.unwrap_err();
        assert!(matches!(err, TaskExecutionError::Transient(ref e) if e.kind == ErrorKind::StorageUnavailable));

        let err: TaskExecutionError = AppError::internal("boom").into();
        assert!(matches!(err, TaskExecutionError::Failed(_)));

        // Logged, not propagated.
        executor.run_logged("failing").await;
        executor.run_logged("missing").await;
    }
}
