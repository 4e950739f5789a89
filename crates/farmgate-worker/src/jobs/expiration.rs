//! Expiration sweep task.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use farmgate_service::ExpirationSweeper;

use super::EXPIRATION_SWEEP;
use crate::executor::{TaskExecutionError, TaskHandler};

/// Expires invitations, grants, and permission requests past their time.
#[derive(Debug)]
pub struct ExpirationTaskHandler {
    sweeper: ExpirationSweeper,
}

impl ExpirationTaskHandler {
    /// Create the handler.
    pub fn new(sweeper: ExpirationSweeper) -> Self {
        Self { sweeper }
    }
}

#[async_trait]
impl TaskHandler for ExpirationTaskHandler {
    fn task_name(&self) -> &str {
        EXPIRATION_SWEEP
    }

    async fn execute(&self) -> Result<Value, TaskExecutionError> {
        let report = self.sweeper.run().await?;
        if report.total() > 0 {
            info!(
                invitations = report.invitations_expired,
                grants = report.grants_expired,
                requests = report.requests_expired,
                "Expiration sweep changed records"
            );
        }
        Ok(json!({
            "task": EXPIRATION_SWEEP,
            "invitations_expired": report.invitations_expired,
            "grants_expired": report.grants_expired,
            "requests_expired": report.requests_expired,
        }))
    }
}
