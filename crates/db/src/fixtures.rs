use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use spendgate_core::domain::expense::{
    DimensionRef, DimensionType, Expense, ExpenseApprovalStatus, ExpenseId,
};
use spendgate_core::domain::organization::{
    Membership, OrgUnit, OrgUnitId, PermissionGrant, TenantId, User, UserId,
};
use spendgate_core::domain::workflow::{
    ConditionOperand, ConditionOperator, MatchCondition, StepApproverSpec, StepId,
    WorkflowDefinition, WorkflowId, WorkflowStep, PARENT_UNIT_ROLE,
};

use crate::repositories::{
    ExpenseRepository, OrganizationRepository, RepositoryError, WorkflowRepository,
};

pub const DEMO_TENANT: &str = "demo";
pub const FINANCE_PERMISSION: &str = "expenses.approve_all";

/// Deterministic demo tenant: a three-unit organization, three workflows
/// covering auto-approval, a conditional single step and a multi-step chain,
/// and one unsubmitted expense for each path.
pub struct DemoDataset;

impl DemoDataset {
    pub fn tenant_id() -> TenantId {
        TenantId(DEMO_TENANT.to_string())
    }

    pub fn units() -> Vec<OrgUnit> {
        vec![
            unit("ou-demo-hq", "Headquarters", None),
            unit("ou-demo-eng", "Engineering", Some("ou-demo-hq")),
            unit("ou-demo-ops", "Operations", Some("ou-demo-hq")),
        ]
    }

    pub fn users() -> Vec<User> {
        [
            ("u-demo-ceo", "Casey Chief"),
            ("u-demo-eng-lead", "Riley Lead"),
            ("u-demo-eng-dev", "Jordan Dev"),
            ("u-demo-ops-lead", "Morgan Ops"),
            ("u-demo-controller", "Avery Controller"),
        ]
        .into_iter()
        .map(|(id, name)| User {
            id: UserId(id.to_string()),
            tenant_id: Self::tenant_id(),
            display_name: name.to_string(),
            active: true,
        })
        .collect()
    }

    pub fn memberships() -> Vec<Membership> {
        vec![
            seat("u-demo-ceo", "ou-demo-hq", "MANAGER"),
            seat("u-demo-eng-lead", "ou-demo-eng", "MANAGER"),
            seat("u-demo-eng-dev", "ou-demo-eng", "MEMBER"),
            seat("u-demo-ops-lead", "ou-demo-ops", "MANAGER"),
            seat("u-demo-controller", "ou-demo-hq", "MEMBER"),
        ]
    }

    pub fn grants() -> Vec<PermissionGrant> {
        vec![PermissionGrant {
            user_id: UserId("u-demo-controller".to_string()),
            tenant_id: Self::tenant_id(),
            permission: FINANCE_PERMISSION.to_string(),
        }]
    }

    pub fn workflows() -> Vec<WorkflowDefinition> {
        let created_at = demo_epoch();
        vec![
            WorkflowDefinition {
                id: WorkflowId("wf-demo-large-spend".to_string()),
                tenant_id: Self::tenant_id(),
                name: "Large spend".to_string(),
                active: true,
                priority: 100,
                amount_min: Some(Decimal::new(10_000, 0)),
                amount_max: None,
                conditions: Vec::new(),
                steps: vec![
                    step("st-demo-large-1", 1, "Unit manager", vec![StepApproverSpec::unit_role(
                        "MANAGER",
                    )]),
                    step("st-demo-large-2", 2, "Parent unit", vec![StepApproverSpec::unit_role(
                        PARENT_UNIT_ROLE,
                    )]),
                    step("st-demo-large-3", 3, "Finance", vec![StepApproverSpec::permission(
                        FINANCE_PERMISSION,
                    )]),
                ],
                created_at,
            },
            WorkflowDefinition {
                id: WorkflowId("wf-demo-eng-travel".to_string()),
                tenant_id: Self::tenant_id(),
                name: "Engineering travel".to_string(),
                active: true,
                priority: 50,
                amount_min: Some(Decimal::new(250, 0)),
                amount_max: Some(Decimal::new(9_999_99, 2)),
                conditions: vec![
                    MatchCondition::new(
                        DimensionType::CostCenter,
                        ConditionOperator::In,
                        ConditionOperand::Values(vec!["CC-ENG".to_string()]),
                    ),
                    MatchCondition::new(
                        DimensionType::Category,
                        ConditionOperator::Equals,
                        ConditionOperand::Value("travel".to_string()),
                    ),
                ],
                steps: vec![step(
                    "st-demo-travel-1",
                    1,
                    "Engineering manager",
                    vec![StepApproverSpec::unit_role("MANAGER").in_unit("ou-demo-eng")],
                )],
                created_at,
            },
            WorkflowDefinition {
                id: WorkflowId("wf-demo-default".to_string()),
                tenant_id: Self::tenant_id(),
                name: "Default review".to_string(),
                active: true,
                priority: 0,
                amount_min: Some(Decimal::new(500, 0)),
                amount_max: None,
                conditions: Vec::new(),
                steps: vec![step(
                    "st-demo-default-1",
                    1,
                    "Manager or finance",
                    vec![
                        StepApproverSpec::unit_role("MANAGER"),
                        StepApproverSpec::permission(FINANCE_PERMISSION),
                    ],
                )],
                created_at,
            },
        ]
    }

    pub fn expenses() -> Vec<Expense> {
        vec![
            expense("EXP-DEMO-001", Decimal::new(4_250, 2), "u-demo-eng-dev", vec![
                DimensionRef::new(DimensionType::CostCenter, "CC-ENG"),
                DimensionRef::new(DimensionType::Category, "meals"),
            ]),
            expense("EXP-DEMO-002", Decimal::new(1_180_00, 2), "u-demo-eng-dev", vec![
                DimensionRef::new(DimensionType::CostCenter, "CC-ENG"),
                DimensionRef::new(DimensionType::Category, "travel"),
            ]),
            expense("EXP-DEMO-003", Decimal::new(24_500, 0), "u-demo-eng-lead", vec![
                DimensionRef::new(DimensionType::CostCenter, "CC-ENG"),
                DimensionRef::new(DimensionType::Category, "hardware"),
            ]),
        ]
    }

    /// Writes the dataset through the repository contracts. Existing expenses
    /// are left untouched so a re-seed never rewinds an approval in flight.
    pub async fn load(
        workflows: &dyn WorkflowRepository,
        expenses: &dyn ExpenseRepository,
        organization: &dyn OrganizationRepository,
    ) -> Result<SeedSummary, RepositoryError> {
        let units = Self::units();
        let users = Self::users();
        let memberships = Self::memberships();
        let grants = Self::grants();
        let definitions = Self::workflows();

        let mut summary = SeedSummary {
            tenant_id: DEMO_TENANT.to_string(),
            units: units.len(),
            users: users.len(),
            memberships: memberships.len(),
            workflows: definitions.iter().map(|workflow| workflow.id.0.clone()).collect(),
            expenses: Self::expenses().iter().map(|expense| expense.id.0.clone()).collect(),
            expenses_skipped: Vec::new(),
        };

        // Parents before children for the unit foreign key.
        for unit in units {
            organization.save_unit(unit).await?;
        }
        for user in users {
            organization.save_user(user).await?;
        }
        for membership in memberships {
            organization.add_membership(membership).await?;
        }
        for grant in grants {
            organization.add_grant(grant).await?;
        }
        for workflow in definitions {
            workflows.save(workflow).await?;
        }

        for expense in Self::expenses() {
            if expenses.find_by_id(&expense.id).await?.is_some() {
                summary.expenses_skipped.push(expense.id.0.clone());
                continue;
            }
            expenses.save(expense).await?;
        }

        tracing::info!(
            event_name = "db.demo_seeded",
            tenant_id = DEMO_TENANT,
            workflows = summary.workflows.len(),
            expenses_skipped = summary.expenses_skipped.len(),
            "demo tenant seeded"
        );

        Ok(summary)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub tenant_id: String,
    pub units: usize,
    pub users: usize,
    pub memberships: usize,
    pub workflows: Vec<String>,
    pub expenses: Vec<String>,
    pub expenses_skipped: Vec<String>,
}

fn demo_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn unit(id: &str, name: &str, parent: Option<&str>) -> OrgUnit {
    OrgUnit {
        id: OrgUnitId(id.to_string()),
        tenant_id: DemoDataset::tenant_id(),
        name: name.to_string(),
        parent_id: parent.map(|parent| OrgUnitId(parent.to_string())),
    }
}

fn seat(user: &str, unit: &str, role: &str) -> Membership {
    Membership {
        user_id: UserId(user.to_string()),
        unit_id: OrgUnitId(unit.to_string()),
        role: role.to_string(),
        is_primary: true,
        ends_at: None,
    }
}

fn step(id: &str, order: u32, name: &str, approvers: Vec<StepApproverSpec>) -> WorkflowStep {
    WorkflowStep {
        id: StepId(id.to_string()),
        order,
        name: name.to_string(),
        require_all_approvers: false,
        min_approvers: 1,
        approvers,
    }
}

fn expense(id: &str, amount: Decimal, creator: &str, dimensions: Vec<DimensionRef>) -> Expense {
    Expense {
        id: ExpenseId(id.to_string()),
        tenant_id: DemoDataset::tenant_id(),
        total_amount: amount,
        created_by: Some(UserId(creator.to_string())),
        dimensions,
        approval_status: ExpenseApprovalStatus::NotSubmitted,
    }
}

#[cfg(test)]
mod tests {
    use spendgate_core::approvals::WorkflowMatcher;

    use super::DemoDataset;

    #[test]
    fn demo_workflows_are_free_of_configuration_defects() {
        for workflow in DemoDataset::workflows() {
            assert!(workflow.validate().is_empty(), "{} has defects", workflow.id.0);
        }
    }

    #[test]
    fn each_demo_expense_exercises_a_different_path() {
        let workflows = DemoDataset::workflows();
        let selected: Vec<Option<String>> = DemoDataset::expenses()
            .iter()
            .map(|expense| {
                WorkflowMatcher::find_matching_workflow(expense, &workflows)
                    .map(|workflow| workflow.id.0.clone())
            })
            .collect();

        assert_eq!(selected, vec![
            None,
            Some("wf-demo-eng-travel".to_string()),
            Some("wf-demo-large-spend".to_string()),
        ]);
    }
}
