//! Shared collaborators handed to every service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use farmgate_auth::{AccessEnforcer, ActorAuthority};
use farmgate_core::AppResult;
use farmgate_core::config::AppConfig;
use farmgate_core::traits::{Clock, NotificationDispatcher, UserDirectory};
use farmgate_core::types::{FarmId, UserId};
use farmgate_database::{Stores, retry_read};

use crate::analytics::AnalyticsRecorder;
use crate::notification::Notifier;

/// Everything a service needs besides its own state.
#[derive(Debug, Clone)]
pub struct EngineDeps {
    /// Persistence.
    pub stores: Stores,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// User lookup.
    pub directory: Arc<dyn UserDirectory>,
    /// Best-effort notifications.
    pub notifier: Notifier,
    /// Best-effort funnel events.
    pub analytics: AnalyticsRecorder,
    /// Grant checks.
    pub enforcer: AccessEnforcer,
    /// Settings.
    pub config: Arc<AppConfig>,
}

impl EngineDeps {
    /// Wire the collaborators together.
    pub fn new(
        stores: Stores,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn UserDirectory>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: AppConfig,
    ) -> Self {
        let analytics = AnalyticsRecorder::new(stores.analytics.clone(), config.analytics.inline);
        Self {
            stores,
            clock,
            directory,
            notifier: Notifier::new(dispatcher),
            analytics,
            enforcer: AccessEnforcer::new(),
            config: Arc::new(config),
        }
    }

    /// Current time from the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a read with the configured retry policy.
    pub async fn read<T, F, Fut>(&self, op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let db = &self.config.database;
        retry_read(
            db.read_retry_attempts,
            Duration::from_millis(db.read_retry_backoff_ms),
            op,
        )
        .await
    }

    /// Resolve the authority `actor` holds on `farm_id` right now,
    /// including approved temporary permissions.
    pub async fn authority(&self, farm_id: FarmId, actor: UserId) -> AppResult<ActorAuthority> {
        let now = self.now();
        let grants = &self.stores.grants;
        let grant = self
            .read(|| async move { grants.find_active_grant(farm_id, actor).await })
            .await?;
        let requests = &self.stores.requests;
        let temporary = self
            .read(|| async move { requests.list_active_requests(farm_id, actor, now).await })
            .await?;
        self.enforcer.authority(grant, &temporary, now)
    }
}
