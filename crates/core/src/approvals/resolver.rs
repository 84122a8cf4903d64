use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::directory::OrganizationDirectory;
use crate::domain::expense::Expense;
use crate::domain::organization::{Membership, OrgUnitId, UserId};
use crate::domain::workflow::{
    ApproverKind, StepApproverSpec, StepId, WorkflowStep, PARENT_UNIT_ROLE,
};

/// Concrete users produced by resolving approver specs, plus anything that
/// made the set smaller than configured.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub users: BTreeSet<UserId>,
    pub warnings: Vec<ResolutionWarning>,
}

impl Resolution {
    fn empty(warning: ResolutionWarning) -> Self {
        Self { users: BTreeSet::new(), warnings: vec![warning] }
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.contains(user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionWarning {
    UserNotFound { user_id: UserId },
    UserInactive { user_id: UserId },
    MissingCreator,
    NoPrimaryUnit { user_id: UserId },
    UnitNotFound { unit_id: OrgUnitId },
    NoParentUnit { unit_id: OrgUnitId },
    NoPermissionHolders { permission: String },
    NoEligibleApprovers { step_id: StepId },
}

impl ResolutionWarning {
    pub fn describe(&self) -> String {
        match self {
            Self::UserNotFound { user_id } => {
                format!("approver user `{}` does not exist", user_id.0)
            }
            Self::UserInactive { user_id } => format!("approver user `{}` is inactive", user_id.0),
            Self::MissingCreator => "expense has no creator to anchor unit roles".to_string(),
            Self::NoPrimaryUnit { user_id } => {
                format!("creator `{}` has no active unit membership", user_id.0)
            }
            Self::UnitNotFound { unit_id } => format!("unit `{}` does not exist", unit_id.0),
            Self::NoParentUnit { unit_id } => format!("unit `{}` has no parent unit", unit_id.0),
            Self::NoPermissionHolders { permission } => {
                format!("no active user holds permission `{permission}`")
            }
            Self::NoEligibleApprovers { step_id } => {
                format!("step `{}` resolved to no eligible approvers", step_id.0)
            }
        }
    }
}

/// Turns approver specs into user ids as of a point in time.
#[derive(Clone, Copy, Debug)]
pub struct ApproverResolver {
    as_of: DateTime<Utc>,
}

impl Default for ApproverResolver {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

impl ApproverResolver {
    pub fn at(as_of: DateTime<Utc>) -> Self {
        Self { as_of }
    }

    pub fn resolve(
        &self,
        spec: &StepApproverSpec,
        expense: &Expense,
        directory: &dyn OrganizationDirectory,
    ) -> Resolution {
        match &spec.approver {
            ApproverKind::User(user_id) => self.resolve_user(user_id, directory),
            ApproverKind::UnitRole(role) => {
                self.resolve_unit_role(role, spec.org_unit_id.as_ref(), expense, directory)
            }
            ApproverKind::SystemPermission(permission) => {
                self.resolve_permission(permission, expense, directory)
            }
        }
    }

    /// Union of all spec resolutions for a step. Warnings are logged with the
    /// expense and step they belong to.
    pub fn resolve_step(
        &self,
        step: &WorkflowStep,
        expense: &Expense,
        directory: &dyn OrganizationDirectory,
    ) -> Resolution {
        let mut resolution = Resolution::default();
        for spec in &step.approvers {
            let partial = self.resolve(spec, expense, directory);
            resolution.users.extend(partial.users);
            resolution.warnings.extend(partial.warnings);
        }

        if resolution.users.is_empty() {
            resolution.warnings.push(ResolutionWarning::NoEligibleApprovers {
                step_id: step.id.clone(),
            });
        }

        for warning in &resolution.warnings {
            tracing::warn!(
                event_name = "approval.resolution_warning",
                tenant_id = %expense.tenant_id.0,
                expense_id = %expense.id.0,
                step_id = %step.id.0,
                warning = %warning.describe(),
                "approver resolution degraded"
            );
        }

        resolution
    }

    fn resolve_user(&self, user_id: &UserId, directory: &dyn OrganizationDirectory) -> Resolution {
        match directory.user(user_id) {
            None => Resolution::empty(ResolutionWarning::UserNotFound { user_id: user_id.clone() }),
            Some(user) if !user.active => {
                Resolution::empty(ResolutionWarning::UserInactive { user_id: user_id.clone() })
            }
            Some(user) => Resolution { users: BTreeSet::from([user.id.clone()]), warnings: vec![] },
        }
    }

    fn resolve_unit_role(
        &self,
        role: &str,
        unit_override: Option<&OrgUnitId>,
        expense: &Expense,
        directory: &dyn OrganizationDirectory,
    ) -> Resolution {
        let base_unit = match unit_override {
            Some(unit_id) => {
                if directory.unit(unit_id).is_none() {
                    return Resolution::empty(ResolutionWarning::UnitNotFound {
                        unit_id: unit_id.clone(),
                    });
                }
                unit_id.clone()
            }
            None => {
                let Some(creator) = expense.created_by.as_ref() else {
                    return Resolution::empty(ResolutionWarning::MissingCreator);
                };
                match self.primary_unit(creator, directory) {
                    Some(unit_id) => unit_id,
                    None => {
                        return Resolution::empty(ResolutionWarning::NoPrimaryUnit {
                            user_id: creator.clone(),
                        })
                    }
                }
            }
        };

        if role.trim().eq_ignore_ascii_case(PARENT_UNIT_ROLE) {
            let parent = directory.unit(&base_unit).and_then(|unit| unit.parent_id.clone());
            let Some(parent_id) = parent else {
                return Resolution::empty(ResolutionWarning::NoParentUnit { unit_id: base_unit });
            };
            if directory.unit(&parent_id).is_none() {
                return Resolution::empty(ResolutionWarning::UnitNotFound { unit_id: parent_id });
            }
            return self.collect_members(&parent_id, None, directory);
        }

        self.collect_members(&base_unit, Some(role), directory)
    }

    fn resolve_permission(
        &self,
        permission: &str,
        expense: &Expense,
        directory: &dyn OrganizationDirectory,
    ) -> Resolution {
        let users: BTreeSet<UserId> = directory
            .permission_holders(&expense.tenant_id, permission)
            .into_iter()
            .filter(|user_id| directory.user(user_id).is_some_and(|user| user.active))
            .collect();

        if users.is_empty() {
            return Resolution::empty(ResolutionWarning::NoPermissionHolders {
                permission: permission.to_string(),
            });
        }

        Resolution { users, warnings: Vec::new() }
    }

    /// Explicit primary membership if still active, else the first active one.
    pub fn primary_unit(
        &self,
        user_id: &UserId,
        directory: &dyn OrganizationDirectory,
    ) -> Option<OrgUnitId> {
        let memberships: Vec<&Membership> = directory
            .memberships_of(user_id)
            .into_iter()
            .filter(|membership| membership.is_active_at(self.as_of))
            .collect();

        memberships
            .iter()
            .find(|membership| membership.is_primary)
            .or_else(|| memberships.first())
            .map(|membership| membership.unit_id.clone())
    }

    fn collect_members(
        &self,
        unit_id: &OrgUnitId,
        role: Option<&str>,
        directory: &dyn OrganizationDirectory,
    ) -> Resolution {
        let users = directory
            .members_of(unit_id)
            .into_iter()
            .filter(|membership| membership.is_active_at(self.as_of))
            .filter(|membership| role.map_or(true, |role| membership.has_role(role)))
            .filter(|membership| directory.user(&membership.user_id).is_some_and(|u| u.active))
            .map(|membership| membership.user_id.clone())
            .collect();

        Resolution { users, warnings: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{ApproverResolver, ResolutionWarning};
    use crate::approvals::directory::{OrganizationSnapshot, PermissionScope};
    use crate::domain::expense::{Expense, ExpenseApprovalStatus, ExpenseId};
    use crate::domain::organization::{
        Membership, OrgUnit, OrgUnitId, PermissionGrant, TenantId, User, UserId,
    };
    use crate::domain::workflow::{StepApproverSpec, StepId, WorkflowStep, PARENT_UNIT_ROLE};

    fn user(id: &str, active: bool) -> User {
        User {
            id: UserId(id.to_string()),
            tenant_id: TenantId("t-1".to_string()),
            display_name: id.to_string(),
            active,
        }
    }

    fn unit(id: &str, parent: Option<&str>) -> OrgUnit {
        OrgUnit {
            id: OrgUnitId(id.to_string()),
            tenant_id: TenantId("t-1".to_string()),
            name: id.to_string(),
            parent_id: parent.map(|parent| OrgUnitId(parent.to_string())),
        }
    }

    fn member(user: &str, unit: &str, role: &str, primary: bool) -> Membership {
        Membership {
            user_id: UserId(user.to_string()),
            unit_id: OrgUnitId(unit.to_string()),
            role: role.to_string(),
            is_primary: primary,
            ends_at: None,
        }
    }

    fn ids(items: &[&str]) -> BTreeSet<UserId> {
        items.iter().map(|item| UserId(item.to_string())).collect()
    }

    /// finance > sales; creator `u-rep` sits in sales.
    fn directory() -> OrganizationSnapshot {
        OrganizationSnapshot::new(PermissionScope::Tenant)
            .with_user(user("u-rep", true))
            .with_user(user("u-mgr", true))
            .with_user(user("u-mgr-2", true))
            .with_user(user("u-gone", false))
            .with_user(user("u-cfo", true))
            .with_user(user("u-controller", true))
            .with_unit(unit("finance", None))
            .with_unit(unit("sales", Some("finance")))
            .with_membership(member("u-rep", "sales", "member", true))
            .with_membership(member("u-mgr", "sales", "Manager", false))
            .with_membership(member("u-mgr-2", "sales", "manager", false))
            .with_membership(member("u-gone", "sales", "manager", false))
            .with_membership(member("u-cfo", "finance", "cfo", true))
            .with_membership(member("u-controller", "finance", "controller", true))
            .with_grant(PermissionGrant {
                user_id: UserId("u-controller".to_string()),
                tenant_id: TenantId("t-1".to_string()),
                permission: "expenses.approve_any".to_string(),
            })
            .with_grant(PermissionGrant {
                user_id: UserId("u-gone".to_string()),
                tenant_id: TenantId("t-1".to_string()),
                permission: "expenses.approve_any".to_string(),
            })
    }

    fn expense(creator: Option<&str>) -> Expense {
        Expense {
            id: ExpenseId("EXP-1".to_string()),
            tenant_id: TenantId("t-1".to_string()),
            total_amount: Decimal::new(100, 0),
            created_by: creator.map(|creator| UserId(creator.to_string())),
            dimensions: Vec::new(),
            approval_status: ExpenseApprovalStatus::Pending,
        }
    }

    fn resolver() -> ApproverResolver {
        ApproverResolver::at(Utc::now())
    }

    #[test]
    fn explicit_user_resolves_only_when_active() {
        let directory = directory();
        let expense = expense(Some("u-rep"));

        let active = resolver().resolve(&StepApproverSpec::user("u-cfo"), &expense, &directory);
        assert_eq!(active.users, ids(&["u-cfo"]));
        assert!(active.warnings.is_empty());

        let inactive = resolver().resolve(&StepApproverSpec::user("u-gone"), &expense, &directory);
        assert!(inactive.is_empty());
        assert_eq!(
            inactive.warnings,
            vec![ResolutionWarning::UserInactive { user_id: UserId("u-gone".to_string()) }]
        );

        let missing = resolver().resolve(&StepApproverSpec::user("u-nobody"), &expense, &directory);
        assert!(matches!(missing.warnings[0], ResolutionWarning::UserNotFound { .. }));
    }

    #[test]
    fn unit_role_uses_creator_primary_unit_and_skips_inactive_users() {
        let resolution = resolver().resolve(
            &StepApproverSpec::unit_role("manager"),
            &expense(Some("u-rep")),
            &directory(),
        );

        assert_eq!(resolution.users, ids(&["u-mgr", "u-mgr-2"]));
    }

    #[test]
    fn unit_override_replaces_creator_unit() {
        let resolution = resolver().resolve(
            &StepApproverSpec::unit_role("cfo").in_unit("finance"),
            &expense(None),
            &directory(),
        );
        assert_eq!(resolution.users, ids(&["u-cfo"]));

        let missing = resolver().resolve(
            &StepApproverSpec::unit_role("cfo").in_unit("legal"),
            &expense(Some("u-rep")),
            &directory(),
        );
        assert_eq!(
            missing.warnings,
            vec![ResolutionWarning::UnitNotFound { unit_id: OrgUnitId("legal".to_string()) }]
        );
    }

    #[test]
    fn parent_unit_collects_every_active_member_of_parent() {
        let resolution = resolver().resolve(
            &StepApproverSpec::unit_role(PARENT_UNIT_ROLE),
            &expense(Some("u-rep")),
            &directory(),
        );
        assert_eq!(resolution.users, ids(&["u-cfo", "u-controller"]));

        let top_level = resolver().resolve(
            &StepApproverSpec::unit_role(PARENT_UNIT_ROLE),
            &expense(Some("u-cfo")),
            &directory(),
        );
        assert_eq!(
            top_level.warnings,
            vec![ResolutionWarning::NoParentUnit { unit_id: OrgUnitId("finance".to_string()) }]
        );
    }

    #[test]
    fn missing_creator_or_unit_yields_warning() {
        let directory = directory();
        let no_creator =
            resolver().resolve(&StepApproverSpec::unit_role("manager"), &expense(None), &directory);
        assert_eq!(no_creator.warnings, vec![ResolutionWarning::MissingCreator]);

        let no_unit = resolver().resolve(
            &StepApproverSpec::unit_role("manager"),
            &expense(Some("u-stranger")),
            &directory,
        );
        assert_eq!(
            no_unit.warnings,
            vec![ResolutionWarning::NoPrimaryUnit { user_id: UserId("u-stranger".to_string()) }]
        );
    }

    #[test]
    fn primary_unit_falls_back_to_first_open_membership() {
        let now = Utc::now();
        let mut expired_primary = member("u-rep", "finance", "member", true);
        expired_primary.ends_at = Some(now - Duration::days(1));
        let mut future_end = member("u-rep", "sales", "member", false);
        future_end.ends_at = Some(now + Duration::days(30));

        let directory = OrganizationSnapshot::new(PermissionScope::Tenant)
            .with_user(user("u-rep", true))
            .with_unit(unit("finance", None))
            .with_unit(unit("sales", Some("finance")))
            .with_membership(expired_primary)
            .with_membership(future_end);

        assert_eq!(
            ApproverResolver::at(now).primary_unit(&UserId("u-rep".to_string()), &directory),
            Some(OrgUnitId("sales".to_string()))
        );
    }

    #[test]
    fn permission_resolves_to_active_holders() {
        let resolution = resolver().resolve(
            &StepApproverSpec::permission("expenses.approve_any"),
            &expense(Some("u-rep")),
            &directory(),
        );
        assert_eq!(resolution.users, ids(&["u-controller"]));

        let nobody = resolver().resolve(
            &StepApproverSpec::permission("expenses.audit"),
            &expense(Some("u-rep")),
            &directory(),
        );
        assert!(matches!(nobody.warnings[0], ResolutionWarning::NoPermissionHolders { .. }));
    }

    #[test]
    fn step_resolution_unions_specs_and_flags_empty_sets() {
        let directory = directory();
        let expense = expense(Some("u-rep"));
        let step = WorkflowStep {
            id: StepId("s-1".to_string()),
            order: 1,
            name: "Managers and finance".to_string(),
            require_all_approvers: false,
            min_approvers: 1,
            approvers: vec![
                StepApproverSpec::unit_role("manager"),
                StepApproverSpec::user("u-mgr"),
                StepApproverSpec::permission("expenses.approve_any"),
            ],
        };

        let resolution = resolver().resolve_step(&step, &expense, &directory);
        assert_eq!(resolution.users, ids(&["u-controller", "u-mgr", "u-mgr-2"]));
        assert!(resolution.warnings.is_empty());

        let empty_step = WorkflowStep {
            approvers: vec![StepApproverSpec::user("u-gone")],
            ..step
        };
        let resolution = resolver().resolve_step(&empty_step, &expense, &directory);
        assert!(resolution.is_empty());
        assert_eq!(resolution.warnings.len(), 2);
        assert_eq!(
            resolution.warnings[1],
            ResolutionWarning::NoEligibleApprovers { step_id: StepId("s-1".to_string()) }
        );
    }
}
