//! Farm roles and the role catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use farmgate_core::AppError;

use crate::permission::{Permission, PermissionSet};

/// Positions in the fixed farm seniority hierarchy.
///
/// Roles are ordered by rank: Owner (1) > Manager (2) > Supervisor (3) >
/// Worker (4) > Viewer (5). A lower rank is more senior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "farm_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FarmRole {
    /// Full control over the farm, including deletion and settings.
    Owner,
    /// Runs the farm day to day and manages people below them.
    Manager,
    /// Oversees workers and operational data.
    Supervisor,
    /// Records daily work and completes tasks.
    Worker,
    /// Read-only access to the basics.
    Viewer,
}

const MANAGER_PERMISSIONS: &[Permission] = &[
    Permission::ViewFarm,
    Permission::EditFarm,
    Permission::ViewFlocks,
    Permission::ManageFlocks,
    Permission::ViewFowl,
    Permission::ManageFowl,
    Permission::TransferFowl,
    Permission::ViewRecords,
    Permission::CreateRecords,
    Permission::EditRecords,
    Permission::DeleteRecords,
    Permission::ViewAnalytics,
    Permission::ExportData,
    Permission::ViewFacilities,
    Permission::ManageFacilities,
    Permission::ViewMembers,
    Permission::InviteMembers,
    Permission::ManageAccess,
    Permission::ManageRoles,
    Permission::ViewTasks,
    Permission::AssignTasks,
    Permission::CompleteTasks,
    Permission::ViewListings,
    Permission::ManageListings,
    Permission::ViewFinancials,
    Permission::ManageFinancials,
    Permission::ViewAuditLog,
];

const SUPERVISOR_PERMISSIONS: &[Permission] = &[
    Permission::ViewFarm,
    Permission::ViewFlocks,
    Permission::ManageFlocks,
    Permission::ViewFowl,
    Permission::ManageFowl,
    Permission::ViewRecords,
    Permission::CreateRecords,
    Permission::EditRecords,
    Permission::ViewAnalytics,
    Permission::ViewFacilities,
    Permission::ManageFacilities,
    Permission::ViewMembers,
    Permission::ViewTasks,
    Permission::AssignTasks,
    Permission::CompleteTasks,
    Permission::ViewListings,
];

const WORKER_PERMISSIONS: &[Permission] = &[
    Permission::ViewFarm,
    Permission::ViewFlocks,
    Permission::ViewFowl,
    Permission::ViewRecords,
    Permission::CreateRecords,
    Permission::ViewFacilities,
    Permission::ViewTasks,
    Permission::CompleteTasks,
];

const VIEWER_PERMISSIONS: &[Permission] = &[
    Permission::ViewFarm,
    Permission::ViewFlocks,
    Permission::ViewFowl,
    Permission::ViewRecords,
];

impl FarmRole {
    /// Every role, most senior first.
    pub const ALL: [FarmRole; 5] = [
        Self::Owner,
        Self::Manager,
        Self::Supervisor,
        Self::Worker,
        Self::Viewer,
    ];

    /// Return the rank (lower = more senior).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Owner => 1,
            Self::Manager => 2,
            Self::Supervisor => 3,
            Self::Worker => 4,
            Self::Viewer => 5,
        }
    }

    /// Check if this role strictly outranks `other`.
    pub fn can_manage(&self, other: &FarmRole) -> bool {
        self.rank() < other.rank()
    }

    /// Check if this role is the owner role.
    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner)
    }

    /// Return the permissions this role holds when no override is set.
    pub fn default_permissions(&self) -> PermissionSet {
        match self {
            Self::Owner => PermissionSet::all(),
            Self::Manager => MANAGER_PERMISSIONS.iter().copied().collect(),
            Self::Supervisor => SUPERVISOR_PERMISSIONS.iter().copied().collect(),
            Self::Worker => WORKER_PERMISSIONS.iter().copied().collect(),
            Self::Viewer => VIEWER_PERMISSIONS.iter().copied().collect(),
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Owner => "Owner",
            Self::Manager => "Manager",
            Self::Supervisor => "Supervisor",
            Self::Worker => "Worker",
            Self::Viewer => "Viewer",
        }
    }

    /// One-line description for invitation screens.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Owner => "Full control of the farm, its settings, and its members",
            Self::Manager => "Runs daily operations and manages members below manager",
            Self::Supervisor => "Oversees flocks, facilities, records, and task assignment",
            Self::Worker => "Records daily work and completes assigned tasks",
            Self::Viewer => "Read-only access to the farm, flocks, and records",
        }
    }

    /// Return the role as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Manager => "manager",
            Self::Supervisor => "supervisor",
            Self::Worker => "worker",
            Self::Viewer => "viewer",
        }
    }
}

impl fmt::Display for FarmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FarmRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "manager" => Ok(Self::Manager),
            "supervisor" => Ok(Self::Supervisor),
            "worker" => Ok(Self::Worker),
            "viewer" => Ok(Self::Viewer),
            _ => Err(AppError::validation(format!(
                "Invalid farm role: '{s}'. Expected one of: owner, manager, supervisor, worker, viewer"
            ))),
        }
    }
}

/// Stateless queries over the role hierarchy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleCatalog;

impl RoleCatalog {
    /// Default permissions of a role.
    pub fn default_permissions(role: FarmRole) -> PermissionSet {
        role.default_permissions()
    }

    /// `rank(a) < rank(b)`.
    pub fn can_manage(a: FarmRole, b: FarmRole) -> bool {
        a.can_manage(&b)
    }

    /// Roles that `role` can manage, most senior first.
    pub fn manageable_roles(role: FarmRole) -> Vec<FarmRole> {
        FarmRole::ALL
            .into_iter()
            .filter(|other| role.can_manage(other))
            .collect()
    }

    /// Roles that can manage `role`, most senior first.
    pub fn managed_by_roles(role: FarmRole) -> Vec<FarmRole> {
        FarmRole::ALL
            .into_iter()
            .filter(|other| other.can_manage(&role))
            .collect()
    }
}
