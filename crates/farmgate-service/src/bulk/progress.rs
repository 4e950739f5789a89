//! Counter maintenance on bulk batches.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use farmgate_core::types::BulkInvitationId;
use farmgate_core::{AppResult, ErrorKind};
use farmgate_entity::bulk::BulkInvitation;
use farmgate_entity::invitation::InvitationStatus;

use crate::deps::EngineDeps;

const MAX_COUNTER_ATTEMPTS: usize = 5;

/// Applies counter changes to a batch with compare-and-set retries.
#[derive(Debug, Clone)]
pub struct BulkProgress {
    deps: EngineDeps,
}

impl BulkProgress {
    /// Creates a progress tracker.
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    /// Take a `sent` slot before an item's invitation is created. Returns
    /// `false` when the batch is gone or has no slot left.
    pub async fn reserve_send(&self, bulk_id: BulkInvitationId, now: DateTime<Utc>) -> AppResult<bool> {
        let mut reserved = false;
        self.apply(bulk_id, |bulk| {
            reserved = bulk.reserve_send(now);
            reserved
        })
        .await?;
        Ok(reserved)
    }

    /// Return a reserved slot for an item that was not sent.
    pub async fn release_send(
        &self,
        bulk_id: BulkInvitationId,
        failed: bool,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.apply(bulk_id, |bulk| bulk.release_send(failed, now))
            .await
            .map(|_| ())
    }

    /// Move one invitation of the batch into its resolution bucket.
    /// Failures are logged; the invitation has already resolved.
    pub async fn record_resolution(
        &self,
        bulk_id: BulkInvitationId,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self
            .apply(bulk_id, |bulk| bulk.record_resolution(status, now))
            .await
        {
            warn!(bulk_id = %bulk_id, %status, error = %e, "Failed to update bulk counters");
        }
    }

    /// Load, mutate, and store the batch, retrying when another writer got
    /// there first. `change` answers whether anything changed.
    async fn apply<F>(&self, bulk_id: BulkInvitationId, mut change: F) -> AppResult<Option<BulkInvitation>>
    where
        F: FnMut(&mut BulkInvitation) -> bool,
    {
        let store = &self.deps.stores.bulk;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(mut bulk) = self
                .deps
                .read(|| async move { store.find_bulk(bulk_id).await })
                .await?
            else {
                return Ok(None);
            };
            let expected = bulk.version;
            if !change(&mut bulk) {
                return Ok(Some(bulk));
            }
            match store.update_bulk(bulk, expected).await {
                Ok(stored) => return Ok(Some(stored)),
                Err(e) if e.kind == ErrorKind::Conflict && attempt < MAX_COUNTER_ATTEMPTS => {
                    debug!(bulk_id = %bulk_id, attempt, "Bulk counter update raced, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use farmgate_entity::bulk::BulkInvitationStatus;
    use farmgate_entity::permission::PermissionSet;
    use farmgate_entity::role::FarmRole;

    use super::*;
    use crate::bulk::BulkInvitationRequest;
    use crate::testing::Harness;

    #[tokio::test]
    async fn test_answer_racing_creation_is_counted() {
        let h = Harness::new().await;
        let request = BulkInvitationRequest {
            farm_id: h.farm_id,
            emails: vec!["a@x.com".into(), "b@x.com".into()],
            default_role: FarmRole::Worker,
            custom_permissions: PermissionSet::new(),
            message: None,
        };
        let bulk = h
            .engine
            .bulk
            .prepare_bulk_invitation(&h.owner_ctx(), request)
            .await
            .unwrap();
        let progress = BulkProgress::new(h.engine.deps().clone());
        let now = h.engine.deps().now();

        assert!(progress.reserve_send(bulk.id, now).await.unwrap());
        progress
            .record_resolution(bulk.id, InvitationStatus::Accepted, now)
            .await;
        assert!(progress.reserve_send(bulk.id, now).await.unwrap());
        progress.release_send(bulk.id, true, now).await.unwrap();
        assert!(!progress.reserve_send(bulk.id, now).await.unwrap());

        let stored = h.engine.bulk.get_bulk_invitation(bulk.id).await.unwrap();
        assert_eq!(
            (stored.sent_count, stored.accepted_count, stored.failed_count),
            (0, 1, 1)
        );
        assert_eq!(stored.status, BulkInvitationStatus::Completed);
    }
}
