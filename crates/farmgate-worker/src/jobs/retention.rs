//! Retention task.

use async_trait::async_trait;
use serde_json::{Value, json};

use farmgate_service::RetentionService;

use super::RETENTION;
use crate::executor::{TaskExecutionError, TaskHandler};

/// Prunes old audit and analytics rows and archives resolved invitations.
#[derive(Debug)]
pub struct RetentionTaskHandler {
    retention: RetentionService,
}

impl RetentionTaskHandler {
    /// Create the handler.
    pub fn new(retention: RetentionService) -> Self {
        Self { retention }
    }
}

#[async_trait]
impl TaskHandler for RetentionTaskHandler {
    fn task_name(&self) -> &str {
        RETENTION
    }

    async fn execute(&self) -> Result<Value, TaskExecutionError> {
        let report = self.retention.run().await?;
        Ok(json!({
            "task": RETENTION,
            "audit_pruned": report.audit_pruned,
            "events_pruned": report.events_pruned,
            "invitations_archived": report.invitations_archived,
        }))
    }
}
