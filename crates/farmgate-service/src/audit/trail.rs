//! Read side of the append-only audit log.
//!
//! Entries are written by the mutating services inside the same store
//! transaction as the change they describe; this service only reads and
//! prunes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use farmgate_core::AppResult;
use farmgate_core::types::{FarmId, PageRequest, PageResponse};
use farmgate_database::AuditStore;
use farmgate_entity::audit::{AuditLogEntry, AuditQuery};

/// Queries and prunes the audit log.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
}

impl AuditTrail {
    /// Creates an audit trail over a store.
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Run a filtered query, newest first.
    pub async fn query(&self, query: &AuditQuery) -> AppResult<PageResponse<AuditLogEntry>> {
        self.store.query_audit(query).await
    }

    /// Revocations, suspensions, role changes, and permission changes on a farm.
    pub async fn security_events(
        &self,
        farm_id: FarmId,
        page: PageRequest,
    ) -> AppResult<PageResponse<AuditLogEntry>> {
        let query = AuditQuery {
            security_only: true,
            page,
            ..AuditQuery::for_farm(farm_id)
        };
        self.store.query_audit(&query).await
    }

    /// Delete entries older than `cutoff`.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let removed = self.store.prune_audit_before(cutoff).await?;
        info!(removed, %cutoff, "Pruned audit log");
        Ok(removed)
    }
}
