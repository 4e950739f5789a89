//! Engine wiring over in-memory collaborators for unit tests.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc::UnboundedReceiver;

use farmgate_core::config::AppConfig;
use farmgate_core::events::Notification;
use farmgate_core::traits::ManualClock;
use farmgate_core::types::{FarmId, UserId};
use farmgate_database::{MemoryStore, MemoryUserDirectory, Stores};
use farmgate_entity::role::FarmRole;

use crate::context::RequestContext;
use crate::deps::EngineDeps;
use crate::engine::AccessEngine;
use crate::invitation::CreateInvitationRequest;
use crate::notification::ChannelDispatcher;

pub(crate) struct Harness {
    pub engine: AccessEngine,
    pub store: Arc<MemoryStore>,
    pub directory: Arc<MemoryUserDirectory>,
    pub clock: Arc<ManualClock>,
    pub notifications: UnboundedReceiver<Notification>,
    pub farm_id: FarmId,
    pub owner: UserId,
}

impl Harness {
    pub async fn new() -> Self {
        let mut config = AppConfig::default();
        config.analytics.inline = true;
        config.database.read_retry_backoff_ms = 1;
        Self::with_config(config).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryUserDirectory::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap_or_else(Utc::now),
        ));
        let (dispatcher, notifications) = ChannelDispatcher::new();
        let deps = EngineDeps::new(
            Stores::from_backend(store.clone()),
            clock.clone(),
            directory.clone(),
            Arc::new(dispatcher),
            config,
        );
        let engine = AccessEngine::new(deps);

        let owner = directory.register("owner@farm.test").await;
        let farm_id = FarmId::new();
        engine.access.provision_owner(farm_id, owner).await.unwrap();

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

    /// Invite `email` as `role` from the owner and accept it.
    pub async fn add_member(&self, email: &str, role: FarmRole) -> UserId {
        let user = self.directory.register(email).await;
        let invitation = self
            .engine
            .create_invitation(
                &self.owner_ctx(),
                CreateInvitationRequest::new(self.farm_id, email, role),
            )
            .await
            .unwrap();
        self.engine
            .respond_to_invitation(
                &RequestContext::new(user),
                &invitation.invitation_code,
                farmgate_entity::invitation::InvitationResponse::Accept,
            )
            .await
            .unwrap();
        user
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }
}
