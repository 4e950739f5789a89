//! Typed permission collections.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::model::{Permission, PermissionCategory, RiskLevel};

/// An ordered set of permissions.
///
/// Serializes as a plain JSON array of permission names, which is also the
/// shape stored in the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    /// An empty set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Every permission in the catalog.
    pub fn all() -> Self {
        Permission::ALL.into_iter().collect()
    }

    /// Check membership.
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// Add a permission. Returns `true` if it was not present.
    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    /// Remove a permission. Returns `true` if it was present.
    pub fn remove(&mut self, permission: Permission) -> bool {
        self.0.remove(&permission)
    }

    /// Number of permissions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    /// Permissions in either set.
    pub fn union(&self, other: &PermissionSet) -> PermissionSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Permissions in both sets.
    pub fn intersection(&self, other: &PermissionSet) -> PermissionSet {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    /// Permissions in `self` but not in `other`.
    pub fn difference(&self, other: &PermissionSet) -> PermissionSet {
        Self(self.0.difference(&other.0).copied().collect())
    }

    /// Whether every permission in `self` is also in `other`.
    pub fn is_subset(&self, other: &PermissionSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Keep only permissions in the given category.
    pub fn in_category(&self, category: PermissionCategory) -> PermissionSet {
        self.iter().filter(|p| p.category() == category).collect()
    }

    /// Keep only permissions at or above the given risk level.
    pub fn at_least_risk(&self, level: RiskLevel) -> PermissionSet {
        self.iter().filter(|p| p.risk_level() >= level).collect()
    }

    /// Names of the permissions, for logs and audit payloads.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(|p| p.as_str()).collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Permission; N]> for PermissionSet {
    fn from(perms: [Permission; N]) -> Self {
        perms.into_iter().collect()
    }
}

impl IntoIterator for PermissionSet {
    type Item = Permission;
    type IntoIter = std::collections::btree_set::IntoIter<Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<Permission> for PermissionSet {
    fn extend<I: IntoIterator<Item = Permission>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_operations() {
        let a = PermissionSet::from([Permission::ViewFarm, Permission::EditFarm]);
        let b = PermissionSet::from([Permission::EditFarm, Permission::DeleteFarm]);

        assert_eq!(a.union(&b).len(), 3);
        assert_eq!(a.intersection(&b), PermissionSet::from([Permission::EditFarm]));
        assert_eq!(a.difference(&b), PermissionSet::from([Permission::ViewFarm]));
        assert!(PermissionSet::from([Permission::EditFarm]).is_subset(&a));
        assert!(!b.is_subset(&a));
        assert!(PermissionSet::new().is_subset(&a));
    }

    #[test]
    fn test_filters() {
        let all = PermissionSet::all();
        assert_eq!(all.len(), Permission::ALL.len());
        assert!(
            all.in_category(PermissionCategory::Farm)
                .iter()
                .all(|p| p.category() == PermissionCategory::Farm)
        );
        let critical = all.at_least_risk(RiskLevel::Critical);
        assert_eq!(
            critical,
            PermissionSet::from([Permission::DeleteFarm, Permission::ManageRoles])
        );
    }

    #[test]
    fn test_serializes_as_array() {
        let set = PermissionSet::from([Permission::ViewFowl, Permission::ViewFarm]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["view_farm","view_fowl"]"#);
        let back: PermissionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
