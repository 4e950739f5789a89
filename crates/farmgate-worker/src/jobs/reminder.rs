//! Reminder dispatch task.

use async_trait::async_trait;
use serde_json::{Value, json};

use farmgate_service::InvitationService;

use super::REMINDER_DISPATCH;
use crate::executor::{TaskExecutionError, TaskHandler};

/// Sends reminders for outstanding invitations that are due one.
#[derive(Debug)]
pub struct ReminderTaskHandler {
    invitations: InvitationService,
}

impl ReminderTaskHandler {
    /// Create the handler.
    pub fn new(invitations: InvitationService) -> Self {
        Self { invitations }
    }
}

#[async_trait]
impl TaskHandler for ReminderTaskHandler {
    fn task_name(&self) -> &str {
        REMINDER_DISPATCH
    }

    async fn execute(&self) -> Result<Value, TaskExecutionError> {
        let sent = self.invitations.send_due_reminders().await?;
        Ok(json!({
            "task": REMINDER_DISPATCH,
            "reminders_sent": sent,
        }))
    }
}
