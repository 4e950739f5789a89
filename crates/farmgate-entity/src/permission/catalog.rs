//! Read-only queries over the permission catalog.

use super::model::{Permission, PermissionCategory, RiskLevel};
use super::set::PermissionSet;

/// Static lookup over every known permission.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionCatalog;

impl PermissionCatalog {
    /// Every permission.
    pub fn all() -> PermissionSet {
        PermissionSet::all()
    }

    /// Permissions in one category.
    pub fn by_category(category: PermissionCategory) -> PermissionSet {
        Permission::ALL
            .into_iter()
            .filter(|p| p.category() == category)
            .collect()
    }

    /// Permissions with exactly the given risk level.
    pub fn by_risk(level: RiskLevel) -> PermissionSet {
        Permission::ALL
            .into_iter()
            .filter(|p| p.risk_level() == level)
            .collect()
    }

    /// Permissions rated high or critical.
    pub fn high_risk() -> PermissionSet {
        PermissionSet::all().at_least_risk(RiskLevel::High)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_permission_has_one_category() {
        let total: usize = [
            PermissionCategory::Farm,
            PermissionCategory::Flock,
            PermissionCategory::Fowl,
            PermissionCategory::Records,
            PermissionCategory::Analytics,
            PermissionCategory::Facilities,
            PermissionCategory::UserManagement,
            PermissionCategory::Tasks,
            PermissionCategory::Marketplace,
            PermissionCategory::Financial,
            PermissionCategory::System,
        ]
        .into_iter()
        .map(|c| PermissionCatalog::by_category(c).len())
        .sum();
        assert_eq!(total, Permission::ALL.len());
    }

    #[test]
    fn test_high_risk_contains_access_management() {
        let high = PermissionCatalog::high_risk();
        assert!(high.contains(Permission::ManageAccess));
        assert!(high.contains(Permission::ManageRoles));
        assert!(!high.contains(Permission::ViewFarm));
    }
}
