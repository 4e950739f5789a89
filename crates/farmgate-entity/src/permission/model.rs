//! Atomic permissions, their categories, and risk levels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use farmgate_core::AppError;

/// Functional area a permission belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionCategory {
    /// Farm profile and lifecycle.
    Farm,
    /// Flock management.
    Flock,
    /// Individual birds.
    Fowl,
    /// Production and health records.
    Records,
    /// Dashboards and exports.
    Analytics,
    /// Coops, pens, and equipment.
    Facilities,
    /// Members, invitations, and roles.
    UserManagement,
    /// Work assignments.
    Tasks,
    /// Marketplace listings.
    Marketplace,
    /// Money.
    Financial,
    /// Settings and the audit log.
    System,
}

impl PermissionCategory {
    /// Return the category as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Farm => "farm",
            Self::Flock => "flock",
            Self::Fowl => "fowl",
            Self::Records => "records",
            Self::Analytics => "analytics",
            Self::Facilities => "facilities",
            Self::UserManagement => "user_management",
            Self::Tasks => "tasks",
            Self::Marketplace => "marketplace",
            Self::Financial => "financial",
            Self::System => "system",
        }
    }
}

impl fmt::Display for PermissionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How much damage misuse of a permission can do.
///
/// Ordered from least to most dangerous, so `RiskLevel::High >= RiskLevel::Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or routine.
    Low,
    /// Changes operational data.
    Medium,
    /// Changes access or moves assets.
    High,
    /// Irreversible or farm-wide.
    Critical,
}

impl RiskLevel {
    /// Return the risk level as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An atomic capability on a farm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// See the farm profile.
    ViewFarm,
    /// Edit the farm profile.
    EditFarm,
    /// Delete the farm.
    DeleteFarm,
    /// See flocks.
    ViewFlocks,
    /// Create, edit, and retire flocks.
    ManageFlocks,
    /// See individual birds.
    ViewFowl,
    /// Add and edit birds.
    ManageFowl,
    /// Move birds to another farm or owner.
    TransferFowl,
    /// Read records.
    ViewRecords,
    /// Add records.
    CreateRecords,
    /// Edit records.
    EditRecords,
    /// Delete records.
    DeleteRecords,
    /// See dashboards.
    ViewAnalytics,
    /// Export data.
    ExportData,
    /// See facilities.
    ViewFacilities,
    /// Manage facilities.
    ManageFacilities,
    /// See the member list.
    ViewMembers,
    /// Invite new members.
    InviteMembers,
    /// Revoke, suspend, and restore access; edit permission overrides.
    ManageAccess,
    /// Change member roles.
    ManageRoles,
    /// See tasks.
    ViewTasks,
    /// Assign tasks to members.
    AssignTasks,
    /// Mark tasks as done.
    CompleteTasks,
    /// See marketplace listings.
    ViewListings,
    /// Create and edit listings.
    ManageListings,
    /// See financial data.
    ViewFinancials,
    /// Edit financial data.
    ManageFinancials,
    /// Read the audit log.
    ViewAuditLog,
    /// Change farm settings.
    ManageSettings,
}

impl Permission {
    /// Every permission in catalog order.
    pub const ALL: [Permission; 29] = [
        Self::ViewFarm,
        Self::EditFarm,
        Self::DeleteFarm,
        Self::ViewFlocks,
        Self::ManageFlocks,
        Self::ViewFowl,
        Self::ManageFowl,
        Self::TransferFowl,
        Self::ViewRecords,
        Self::CreateRecords,
        Self::EditRecords,
        Self::DeleteRecords,
        Self::ViewAnalytics,
        Self::ExportData,
        Self::ViewFacilities,
        Self::ManageFacilities,
        Self::ViewMembers,
        Self::InviteMembers,
        Self::ManageAccess,
        Self::ManageRoles,
        Self::ViewTasks,
        Self::AssignTasks,
        Self::CompleteTasks,
        Self::ViewListings,
        Self::ManageListings,
        Self::ViewFinancials,
        Self::ManageFinancials,
        Self::ViewAuditLog,
        Self::ManageSettings,
    ];

    /// Return the category this permission belongs to.
    pub fn category(&self) -> PermissionCategory {
        use PermissionCategory as C;
        match self {
            Self::ViewFarm | Self::EditFarm | Self::DeleteFarm => C::Farm,
            Self::ViewFlocks | Self::ManageFlocks => C::Flock,
            Self::ViewFowl | Self::ManageFowl | Self::TransferFowl => C::Fowl,
            Self::ViewRecords | Self::CreateRecords | Self::EditRecords | Self::DeleteRecords => {
                C::Records
            }
            Self::ViewAnalytics | Self::ExportData => C::Analytics,
            Self::ViewFacilities | Self::ManageFacilities => C::Facilities,
            Self::ViewMembers | Self::InviteMembers | Self::ManageAccess | Self::ManageRoles => {
                C::UserManagement
            }
            Self::ViewTasks | Self::AssignTasks | Self::CompleteTasks => C::Tasks,
            Self::ViewListings | Self::ManageListings => C::Marketplace,
            Self::ViewFinancials | Self::ManageFinancials => C::Financial,
            Self::ViewAuditLog | Self::ManageSettings => C::System,
        }
    }

    /// Return the risk level of this permission.
    pub fn risk_level(&self) -> RiskLevel {
        use RiskLevel as R;
        match self {
            Self::ViewFarm
            | Self::ViewFlocks
            | Self::ViewFowl
            | Self::ViewRecords
            | Self::CreateRecords
            | Self::ViewAnalytics
            | Self::ViewFacilities
            | Self::ViewMembers
            | Self::ViewTasks
            | Self::CompleteTasks
            | Self::ViewListings => R::Low,
            Self::EditFarm
            | Self::ManageFlocks
            | Self::ManageFowl
            | Self::EditRecords
            | Self::ExportData
            | Self::ManageFacilities
            | Self::InviteMembers
            | Self::AssignTasks
            | Self::ManageListings
            | Self::ViewFinancials
            | Self::ViewAuditLog => R::Medium,
            Self::TransferFowl
            | Self::DeleteRecords
            | Self::ManageAccess
            | Self::ManageFinancials
            | Self::ManageSettings => R::High,
            Self::DeleteFarm | Self::ManageRoles => R::Critical,
        }
    }

    /// Return the permission as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewFarm => "view_farm",
            Self::EditFarm => "edit_farm",
            Self::DeleteFarm => "delete_farm",
            Self::ViewFlocks => "view_flocks",
            Self::ManageFlocks => "manage_flocks",
            Self::ViewFowl => "view_fowl",
            Self::ManageFowl => "manage_fowl",
            Self::TransferFowl => "transfer_fowl",
            Self::ViewRecords => "view_records",
            Self::CreateRecords => "create_records",
            Self::EditRecords => "edit_records",
            Self::DeleteRecords => "delete_records",
            Self::ViewAnalytics => "view_analytics",
            Self::ExportData => "export_data",
            Self::ViewFacilities => "view_facilities",
            Self::ManageFacilities => "manage_facilities",
            Self::ViewMembers => "view_members",
            Self::InviteMembers => "invite_members",
            Self::ManageAccess => "manage_access",
            Self::ManageRoles => "manage_roles",
            Self::ViewTasks => "view_tasks",
            Self::AssignTasks => "assign_tasks",
            Self::CompleteTasks => "complete_tasks",
            Self::ViewListings => "view_listings",
            Self::ManageListings => "manage_listings",
            Self::ViewFinancials => "view_financials",
            Self::ManageFinancials => "manage_financials",
            Self::ViewAuditLog => "view_audit_log",
            Self::ManageSettings => "manage_settings",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| AppError::validation(format!("Invalid permission: '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_is_unique_and_complete() {
        let mut seen = std::collections::BTreeSet::new();
        for p in Permission::ALL {
            assert!(seen.insert(p), "duplicate {p}");
        }
        assert_eq!(seen.len(), Permission::ALL.len());
    }

    #[test]
    fn test_from_str_round_trips_names() {
        for p in Permission::ALL {
            assert_eq!(p.as_str().parse::<Permission>().unwrap(), p);
        }
        assert_eq!("MANAGE_ACCESS".parse::<Permission>().unwrap(), Permission::ManageAccess);
        assert!("fly".parse::<Permission>().is_err());
    }

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert_eq!(Permission::ManageRoles.risk_level(), RiskLevel::Critical);
        assert_eq!(Permission::ViewFarm.category(), PermissionCategory::Farm);
    }
}
