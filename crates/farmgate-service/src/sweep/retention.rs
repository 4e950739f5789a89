//! Retention: audit pruning, analytics pruning, invitation archival.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use farmgate_core::AppResult;

use crate::audit::AuditTrail;
use crate::deps::EngineDeps;
use crate::invitation::InvitationService;

/// Counts from one retention run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    /// Audit entries deleted.
    pub audit_pruned: u64,
    /// Analytics events deleted.
    pub events_pruned: u64,
    /// Invitations stamped as archived.
    pub invitations_archived: u64,
}

/// Applies the configured retention windows.
#[derive(Debug, Clone)]
pub struct RetentionService {
    deps: EngineDeps,
    audit: AuditTrail,
    invitations: InvitationService,
}

impl RetentionService {
    /// Creates a retention service.
    pub fn new(deps: EngineDeps, audit: AuditTrail, invitations: InvitationService) -> Self {
        Self {
            deps,
            audit,
            invitations,
        }
    }

    /// Run every retention step.
    pub async fn run(&self) -> AppResult<RetentionReport> {
        let now = self.deps.now();
        let audit_cutoff = now - Duration::days(self.deps.config.audit.retention_days);
        let events_cutoff = now - Duration::days(self.deps.config.analytics.retention_days);

        let report = RetentionReport {
            audit_pruned: self.audit.prune_before(audit_cutoff).await?,
            events_pruned: self.deps.analytics.prune_before(events_cutoff).await?,
            invitations_archived: self.invitations.archive_invitations().await?,
        };
        info!(
            audit = report.audit_pruned,
            events = report.events_pruned,
            archived = report.invitations_archived,
            "Retention run finished"
        );
        Ok(report)
    }
}
