//! Read-only view of organization data consulted while resolving approvers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::organization::{
    Membership, OrgUnit, OrgUnitId, PermissionGrant, TenantId, User, UserId,
};

/// Where system-permission holders are searched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    #[default]
    Tenant,
    Global,
}

impl PermissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Global => "global",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tenant" => Some(Self::Tenant),
            "global" => Some(Self::Global),
            _ => None,
        }
    }
}

pub trait OrganizationDirectory {
    fn user(&self, user_id: &UserId) -> Option<&User>;

    fn unit(&self, unit_id: &OrgUnitId) -> Option<&OrgUnit>;

    /// Memberships of one user in the order they were granted.
    fn memberships_of(&self, user_id: &UserId) -> Vec<&Membership>;

    fn members_of(&self, unit_id: &OrgUnitId) -> Vec<&Membership>;

    fn permission_holders(&self, tenant_id: &TenantId, permission: &str) -> Vec<UserId>;
}

/// Organization data for one tenant, loaded once per engine call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrganizationSnapshot {
    pub permission_scope: PermissionScope,
    users: BTreeMap<UserId, User>,
    units: BTreeMap<OrgUnitId, OrgUnit>,
    memberships: Vec<Membership>,
    grants: Vec<PermissionGrant>,
}

impl OrganizationSnapshot {
    pub fn new(permission_scope: PermissionScope) -> Self {
        Self { permission_scope, ..Self::default() }
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.add_user(user);
        self
    }

    pub fn with_unit(mut self, unit: OrgUnit) -> Self {
        self.add_unit(unit);
        self
    }

    pub fn with_membership(mut self, membership: Membership) -> Self {
        self.add_membership(membership);
        self
    }

    pub fn with_grant(mut self, grant: PermissionGrant) -> Self {
        self.add_grant(grant);
        self
    }

    pub fn add_user(&mut self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn add_unit(&mut self, unit: OrgUnit) {
        self.units.insert(unit.id.clone(), unit);
    }

    pub fn add_membership(&mut self, membership: Membership) {
        self.memberships.push(membership);
    }

    pub fn add_grant(&mut self, grant: PermissionGrant) {
        self.grants.push(grant);
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl OrganizationDirectory for OrganizationSnapshot {
    fn user(&self, user_id: &UserId) -> Option<&User> {
        self.users.get(user_id)
    }

    fn unit(&self, unit_id: &OrgUnitId) -> Option<&OrgUnit> {
        self.units.get(unit_id)
    }

    fn memberships_of(&self, user_id: &UserId) -> Vec<&Membership> {
        self.memberships.iter().filter(|membership| &membership.user_id == user_id).collect()
    }

    fn members_of(&self, unit_id: &OrgUnitId) -> Vec<&Membership> {
        self.memberships.iter().filter(|membership| &membership.unit_id == unit_id).collect()
    }

    fn permission_holders(&self, tenant_id: &TenantId, permission: &str) -> Vec<UserId> {
        let permission = permission.trim();
        self.grants
            .iter()
            .filter(|grant| grant.permission.trim().eq_ignore_ascii_case(permission))
            .filter(|grant| match self.permission_scope {
                PermissionScope::Tenant => &grant.tenant_id == tenant_id,
                PermissionScope::Global => true,
            })
            .map(|grant| grant.user_id.clone())
            .collect()
    }
}
