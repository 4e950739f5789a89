//! Shared fixtures for the integration suite.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc::UnboundedReceiver;

use farmgate_core::config::AppConfig;
use farmgate_core::events::Notification;
use farmgate_core::traits::{Clock, ManualClock};
use farmgate_core::types::{FarmId, UserId};
use farmgate_database::{MemoryStore, MemoryUserDirectory, Stores};
use farmgate_entity::invitation::{Invitation, InvitationResponse};
use farmgate_entity::role::FarmRole;
use farmgate_service::{
    AccessEngine, ChannelDispatcher, CreateInvitationRequest, EngineDeps, RequestContext,
};

/// An engine over in-memory collaborators with one farm and its owner.
pub struct TestEngine {
    /// The engine under test
    pub engine: AccessEngine,
    /// Backing store, for fault injection and counts
    pub store: Arc<MemoryStore>,
    /// Registered users
    pub directory: Arc<MemoryUserDirectory>,
    /// Controlled time
    pub clock: Arc<ManualClock>,
    /// Everything the engine sent
    pub notifications: UnboundedReceiver<Notification>,
    /// The farm
    pub farm_id: FarmId,
    /// The farm's owner
    pub owner: UserId,
}

/// Fixed start of every test.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Default configuration with deterministic analytics and fast retries.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.analytics.inline = true;
    config.database.read_retry_backoff_ms = 1;
    config
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryUserDirectory::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (dispatcher, notifications) = ChannelDispatcher::new();
        let engine = AccessEngine::new(EngineDeps::new(
            Stores::from_backend(store.clone()),
            clock.clone(),
            directory.clone(),
            Arc::new(dispatcher),
            config,
        ));

        let owner = directory.register("alice@farm.test").await;
        let farm_id = FarmId::new();
        engine
            .access
            .provision_owner(farm_id, owner)
            .await
            .expect("provision owner");

        Self {
            engine,
            store,
            directory,
            clock,
            notifications,
            farm_id,
            owner,
        }
    }

    pub fn owner_ctx(&self) -> RequestContext {
        RequestContext::new(self.owner)
    }

    pub async fn register(&self, email: &str) -> UserId {
        self.directory.register(email).await
    }

    /// Invite `email` as `role` on behalf of the owner.
    pub async fn invite(&self, email: &str, role: FarmRole) -> Invitation {
        self.engine
            .create_invitation(
                &self.owner_ctx(),
                CreateInvitationRequest::new(self.farm_id, email, role),
            )
            .await
            .expect("create invitation")
    }

    /// Register, invite, and accept.
    pub async fn add_member(&self, email: &str, role: FarmRole) -> UserId {
        let user = self.register(email).await;
        let invitation = self.invite(email, role).await;
        self.engine
            .respond_to_invitation(
                &RequestContext::new(user),
                &invitation.invitation_code,
                InvitationResponse::Accept,
            )
            .await
            .expect("accept invitation");
        user
    }

    /// Owners with a currently valid grant.
    pub async fn active_owner_count(&self) -> usize {
        let now = self.clock.now();
        self.engine
            .access
            .list_farm_members(self.farm_id)
            .await
            .expect("list members")
            .iter()
            .filter(|g| g.role == FarmRole::Owner && g.is_valid_access(now))
            .count()
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }
}
