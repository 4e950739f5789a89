//! The periodic expiration sweep.

use serde::{Deserialize, Serialize};
use tracing::info;

use farmgate_core::AppResult;

use crate::access::AccessService;
use crate::invitation::InvitationService;
use crate::permission_request::PermissionRequestService;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Invitations moved to expired.
    pub invitations_expired: u64,
    /// Grants moved to expired.
    pub grants_expired: u64,
    /// Permission requests moved to expired.
    pub requests_expired: u64,
}

impl SweepReport {
    /// Total records changed.
    pub fn total(&self) -> u64 {
        self.invitations_expired + self.grants_expired + self.requests_expired
    }
}

/// Expires invitations, grants, and permission requests whose time is up.
///
/// Every step is a compare-and-set per record, so concurrent sweeps never
/// double-transition anything and re-running is a no-op.
#[derive(Debug, Clone)]
pub struct ExpirationSweeper {
    invitations: InvitationService,
    access: AccessService,
    requests: PermissionRequestService,
}

impl ExpirationSweeper {
    /// Creates a sweeper.
    pub fn new(
        invitations: InvitationService,
        access: AccessService,
        requests: PermissionRequestService,
    ) -> Self {
        Self {
            invitations,
            access,
            requests,
        }
    }

    /// Run one sweep.
    pub async fn run(&self) -> AppResult<SweepReport> {
        let report = SweepReport {
            invitations_expired: self.invitations.expire_invitations().await?,
            grants_expired: self.access.expire_grants().await?,
            requests_expired: self.requests.expire_stale().await?,
        };
        info!(
            invitations = report.invitations_expired,
            grants = report.grants_expired,
            requests = report.requests_expired,
            "Expiration sweep finished"
        );
        Ok(report)
    }
}
