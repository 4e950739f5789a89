//! Built-in task handlers.

pub mod expiration;
pub mod reminder;
pub mod retention;

pub use expiration::ExpirationTaskHandler;
pub use reminder::ReminderTaskHandler;
pub use retention::RetentionTaskHandler;

/// Task name of the expiration sweep.
pub const EXPIRATION_SWEEP: &str = "expiration_sweep";
/// Task name of the reminder dispatch.
pub const REMINDER_DISPATCH: &str = "reminder_dispatch";
/// Task name of retention and archival.
pub const RETENTION: &str = "retention";

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use farmgate_core::config::AppConfig;
    use farmgate_core::traits::ManualClock;
    use farmgate_core::types::FarmId;
    use farmgate_database::{MemoryStore, MemoryUserDirectory, Stores};
    use farmgate_entity::role::FarmRole;
    use farmgate_service::{
        AccessEngine, CreateInvitationRequest, EngineDeps, NoopDispatcher, RequestContext,
    };

    use super::*;
    use crate::executor::TaskExecutor;

    #[tokio::test]
    async fn test_engine_tasks_run_against_the_store() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).single().unwrap(),
        ));
        let directory = Arc::new(MemoryUserDirectory::new());
        let mut config = AppConfig::default();
        config.analytics.inline = true;
        let engine = AccessEngine::new(EngineDeps::new(
            Stores::from_backend(Arc::new(MemoryStore::new())),
            clock.clone(),
            directory.clone(),
            Arc::new(NoopDispatcher),
            config,
        ));
        let owner = directory.register("owner@farm.test").await;
        let farm = FarmId::new();
        engine.access.provision_owner(farm, owner).await.unwrap();
        engine
            .create_invitation(
                &RequestContext::new(owner),
                CreateInvitationRequest::new(farm, "late@x.com", FarmRole::Worker),
            )
            .await
            .unwrap();

        let executor = TaskExecutor::for_engine(&engine);
        assert_eq!(
            executor.registered_tasks(),
            vec![EXPIRATION_SWEEP, REMINDER_DISPATCH, RETENTION]
        );

        clock.advance(Duration::days(2));
        let summary = executor.execute(REMINDER_DISPATCH).await.unwrap();
        assert_eq!(summary["reminders_sent"], 1);

        clock.advance(Duration::days(6));
        let summary = executor.execute(EXPIRATION_SWEEP).await.unwrap();
        assert_eq!(summary["invitations_expired"], 1);
        let summary = executor.execute(EXPIRATION_SWEEP).await.unwrap();
        assert_eq!(summary["invitations_expired"], 0);

        let summary = executor.execute(RETENTION).await.unwrap();
        assert_eq!(summary["invitations_archived"], 0);
    }
}
