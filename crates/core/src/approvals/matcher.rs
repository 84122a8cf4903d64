use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::approvals::criteria::CriteriaEvaluator;
use crate::domain::expense::{DimensionType, Expense, ExpenseId};
use crate::domain::organization::TenantId;
use crate::domain::workflow::{ConditionOperand, WorkflowDefinition, WorkflowId};

/// Selects the workflow that governs an expense.
pub struct WorkflowMatcher;

impl WorkflowMatcher {
    /// Active workflows of the expense's tenant in matching order.
    pub fn candidates<'a>(
        tenant_id: &TenantId,
        workflows: &'a [WorkflowDefinition],
    ) -> Vec<&'a WorkflowDefinition> {
        let mut candidates: Vec<&WorkflowDefinition> = workflows
            .iter()
            .filter(|workflow| workflow.active && &workflow.tenant_id == tenant_id)
            .collect();
        candidates.sort_by(|left, right| WorkflowDefinition::precedence(left, right));
        candidates
    }

    /// First workflow whose amount range and every condition hold. `None`
    /// means the expense needs no approval.
    pub fn find_matching_workflow<'a>(
        expense: &Expense,
        workflows: &'a [WorkflowDefinition],
    ) -> Option<&'a WorkflowDefinition> {
        Self::candidates(&expense.tenant_id, workflows)
            .into_iter()
            .find(|workflow| Self::matches(expense, workflow))
    }

    pub fn matches(expense: &Expense, workflow: &WorkflowDefinition) -> bool {
        CriteriaEvaluator::amount_in_range(
            expense.total_amount,
            workflow.amount_min,
            workflow.amount_max,
        ) && workflow
            .conditions
            .iter()
            .all(|condition| CriteriaEvaluator::evaluate_for_expense(condition, expense))
    }

    /// Evaluates every criterion of every candidate without short-circuiting.
    pub fn evaluate_all(expense: &Expense, workflows: &[WorkflowDefinition]) -> MatchReport {
        let evaluations: Vec<WorkflowEvaluation> = Self::candidates(&expense.tenant_id, workflows)
            .into_iter()
            .map(|workflow| evaluate_workflow(expense, workflow))
            .collect();

        let selected_workflow_id =
            evaluations.iter().find(|evaluation| evaluation.matched).map(|e| e.workflow_id.clone());

        MatchReport {
            tenant_id: expense.tenant_id.clone(),
            expense_id: expense.id.clone(),
            amount: expense.total_amount,
            selected_workflow_id,
            workflows: evaluations,
        }
    }
}

fn evaluate_workflow(expense: &Expense, workflow: &WorkflowDefinition) -> WorkflowEvaluation {
    let amount = AmountCheck {
        min: workflow.amount_min,
        max: workflow.amount_max,
        passed: CriteriaEvaluator::amount_in_range(
            expense.total_amount,
            workflow.amount_min,
            workflow.amount_max,
        ),
    };

    let conditions: Vec<ConditionCheck> = workflow
        .conditions
        .iter()
        .enumerate()
        .map(|(index, condition)| {
            let observed = CriteriaEvaluator::observed_values(condition, expense);
            let outcome = CriteriaEvaluator::check(condition, &observed);
            if let Err(defect) = &outcome {
                tracing::warn!(
                    event_name = "approval.configuration_defect",
                    workflow_id = %workflow.id.0,
                    condition_index = index,
                    defect = %defect.describe(),
                    "match condition cannot be evaluated"
                );
            }
            ConditionCheck {
                index,
                dimension_type: condition.dimension_type,
                operator: condition.operator.as_str().to_string(),
                operand: condition.operand.clone(),
                observed: observed.into_iter().collect(),
                passed: matches!(outcome, Ok(true)),
                defect: outcome.err().map(|defect| defect.describe()),
            }
        })
        .collect();

    let matched = amount.passed && conditions.iter().all(|check| check.passed);

    WorkflowEvaluation {
        workflow_id: workflow.id.clone(),
        name: workflow.name.clone(),
        priority: workflow.priority,
        matched,
        amount,
        conditions,
        defects: workflow.validate().iter().map(|defect| defect.describe()).collect(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReport {
    pub tenant_id: TenantId,
    pub expense_id: ExpenseId,
    pub amount: Decimal,
    pub selected_workflow_id: Option<WorkflowId>,
    pub workflows: Vec<WorkflowEvaluation>,
}

impl MatchReport {
    pub fn auto_approved(&self) -> bool {
        self.selected_workflow_id.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEvaluation {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub priority: i32,
    pub matched: bool,
    pub amount: AmountCheck,
    pub conditions: Vec<ConditionCheck>,
    pub defects: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountCheck {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    pub passed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionCheck {
    pub index: usize,
    pub dimension_type: Option<DimensionType>,
    pub operator: String,
    pub operand: ConditionOperand,
    pub observed: Vec<String>,
    pub passed: bool,
    pub defect: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use super::WorkflowMatcher;
    use crate::domain::expense::{
        DimensionRef, DimensionType, Expense, ExpenseApprovalStatus, ExpenseId,
    };
    use crate::domain::organization::{TenantId, UserId};
    use crate::domain::workflow::{
        ConditionOperand, ConditionOperator, MatchCondition, StepApproverSpec, StepId,
        WorkflowDefinition, WorkflowId, WorkflowStep,
    };

    fn expense(amount: Decimal, dimensions: Vec<DimensionRef>) -> Expense {
        Expense {
            id: ExpenseId("EXP-1".to_string()),
            tenant_id: TenantId("t-1".to_string()),
            total_amount: amount,
            created_by: Some(UserId("u-1".to_string())),
            dimensions,
            approval_status: ExpenseApprovalStatus::NotSubmitted,
        }
    }

    fn workflow(id: &str, priority: i32) -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId(id.to_string()),
            tenant_id: TenantId("t-1".to_string()),
            name: id.to_string(),
            active: true,
            priority,
            amount_min: None,
            amount_max: None,
            conditions: Vec::new(),
            steps: vec![WorkflowStep {
                id: StepId(format!("{id}-s1")),
                order: 1,
                name: "Review".to_string(),
                require_all_approvers: false,
                min_approvers: 1,
                approvers: vec![StepApproverSpec::user("u-approver")],
            }],
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now),
        }
    }

    #[test]
    fn highest_priority_match_wins() {
        let mut low = workflow("wf-low", 1);
        low.amount_min = Some(Decimal::new(100, 0));
        let mut high = workflow("wf-high", 10);
        high.amount_min = Some(Decimal::new(1000, 0));
        let workflows = vec![low, high];

        let big = expense(Decimal::new(5000, 0), Vec::new());
        let small = expense(Decimal::new(500, 0), Vec::new());

        assert_eq!(
            WorkflowMatcher::find_matching_workflow(&big, &workflows).map(|w| w.id.0.as_str()),
            Some("wf-high")
        );
        assert_eq!(
            WorkflowMatcher::find_matching_workflow(&small, &workflows).map(|w| w.id.0.as_str()),
            Some("wf-low")
        );
    }

    #[test]
    fn amount_bounds_are_inclusive() {
        let mut bounded = workflow("wf", 1);
        bounded.amount_min = Some(Decimal::new(1000, 0));
        bounded.amount_max = Some(Decimal::new(5000, 0));
        let workflows = vec![bounded];

        for (amount, expected) in [
            (Decimal::new(1000, 0), true),
            (Decimal::new(5000, 0), true),
            (Decimal::new(99999, 2), false),
            (Decimal::new(500001, 2), false),
        ] {
            let expense = expense(amount, Vec::new());
            assert_eq!(
                WorkflowMatcher::find_matching_workflow(&expense, &workflows).is_some(),
                expected,
                "amount {amount}"
            );
        }
    }

    #[test]
    fn workflow_without_conditions_matches_vacuously() {
        let workflows = vec![workflow("wf", 1)];
        let expense = expense(Decimal::new(1, 0), Vec::new());
        assert!(WorkflowMatcher::find_matching_workflow(&expense, &workflows).is_some());
    }

    #[test]
    fn inactive_and_foreign_tenant_workflows_are_ignored() {
        let mut inactive = workflow("wf-inactive", 50);
        inactive.active = false;
        let mut foreign = workflow("wf-foreign", 40);
        foreign.tenant_id = TenantId("t-2".to_string());
        let workflows = vec![inactive, foreign];

        let expense = expense(Decimal::new(10, 0), Vec::new());
        assert!(WorkflowMatcher::find_matching_workflow(&expense, &workflows).is_none());
        assert!(WorkflowMatcher::evaluate_all(&expense, &workflows).auto_approved());
    }

    #[test]
    fn equal_priority_prefers_older_workflow() {
        let mut newer = workflow("wf-a", 5);
        newer.created_at += Duration::days(1);
        let older = workflow("wf-b", 5);
        let workflows = vec![newer, older];

        let expense = expense(Decimal::new(10, 0), Vec::new());
        assert_eq!(
            WorkflowMatcher::find_matching_workflow(&expense, &workflows).map(|w| w.id.0.as_str()),
            Some("wf-b")
        );
    }

    #[test]
    fn diagnostic_report_explains_each_criterion() {
        let mut projects = workflow("wf-projects", 10);
        projects.conditions = vec![
            MatchCondition::new(
                DimensionType::Project,
                ConditionOperator::In,
                ConditionOperand::Values(vec!["P-7".to_string()]),
            ),
            MatchCondition::new(
                DimensionType::CostCenter,
                ConditionOperator::HasAny,
                ConditionOperand::None,
            ),
        ];
        let fallback = workflow("wf-fallback", 1);
        let workflows = vec![fallback, projects];

        let expense = expense(
            Decimal::new(250, 0),
            vec![
                DimensionRef::new(DimensionType::Project, "P-1"),
                DimensionRef::new(DimensionType::CostCenter, "CC-1"),
            ],
        );

        let report = WorkflowMatcher::evaluate_all(&expense, &workflows);
        assert_eq!(report.workflows.len(), 2);
        assert_eq!(report.workflows[0].workflow_id.0, "wf-projects");
        assert!(!report.workflows[0].matched);
        assert_eq!(report.workflows[0].conditions.len(), 2);
        assert!(!report.workflows[0].conditions[0].passed);
        assert_eq!(report.workflows[0].conditions[0].observed, vec!["P-1".to_string()]);
        assert!(report.workflows[0].conditions[1].passed);
        assert_eq!(report.selected_workflow_id, Some(WorkflowId("wf-fallback".to_string())));
    }

    #[test]
    fn diagnostic_report_surfaces_defects() {
        let mut broken = workflow("wf-broken", 1);
        broken.conditions.push(MatchCondition {
            dimension_type: Some(DimensionType::Category),
            operator: ConditionOperator::Unrecognized("fuzzy".to_string()),
            operand: ConditionOperand::None,
        });
        let workflows = vec![broken];
        let expense = expense(Decimal::new(10, 0), Vec::new());

        let report = WorkflowMatcher::evaluate_all(&expense, &workflows);
        let condition = &report.workflows[0].conditions[0];
        assert!(!condition.passed);
        assert!(condition.defect.as_deref().is_some_and(|defect| defect.contains("fuzzy")));
        assert!(!report.workflows[0].defects.is_empty());
        assert!(report.auto_approved());
    }

    fn dimension_strategy() -> impl Strategy<Value = DimensionRef> {
        (0usize..3, 0usize..4).prop_map(|(kind, id)| {
            let dimension_type =
                [DimensionType::Project, DimensionType::CostCenter, DimensionType::Category][kind];
            DimensionRef::new(dimension_type, format!("D-{id}"))
        })
    }

    fn condition_strategy() -> impl Strategy<Value = MatchCondition> {
        let operator = prop_oneof![
            Just(ConditionOperator::HasAny),
            Just(ConditionOperator::HasNone),
            Just(ConditionOperator::Equals),
            Just(ConditionOperator::NotEquals),
            Just(ConditionOperator::In),
            Just(ConditionOperator::NotIn),
            Just(ConditionOperator::CountGte),
            Just(ConditionOperator::CountLte),
            Just(ConditionOperator::CountEquals),
            Just(ConditionOperator::Unrecognized("bogus".to_string())),
        ];
        let operand = prop_oneof![
            Just(ConditionOperand::None),
            (0usize..4).prop_map(|id| ConditionOperand::Value(format!("D-{id}"))),
            prop::collection::vec((0usize..4).prop_map(|id| format!("D-{id}")), 0..3)
                .prop_map(ConditionOperand::Values),
            (0u32..4).prop_map(ConditionOperand::Count),
        ];
        let dimension = prop_oneof![
            Just(None),
            Just(Some(DimensionType::Project)),
            Just(Some(DimensionType::CostCenter)),
            Just(Some(DimensionType::Category)),
        ];

        (dimension, operator, operand).prop_map(|(dimension_type, operator, operand)| {
            MatchCondition { dimension_type, operator, operand }
        })
    }

    fn workflow_strategy() -> impl Strategy<Value = WorkflowDefinition> {
        (
            0usize..1000,
            -3i32..4,
            proptest::option::of(0i64..200),
            proptest::option::of(0i64..200),
            prop::collection::vec(condition_strategy(), 0..3),
            any::<bool>(),
            0i64..5,
        )
            .prop_map(|(id, priority, min, max, conditions, active, age)| {
                let mut workflow = workflow(&format!("wf-{id}"), priority);
                workflow.amount_min = min.map(|value| Decimal::new(value, 0));
                workflow.amount_max = max.map(|value| Decimal::new(value, 0));
                workflow.conditions = conditions;
                workflow.active = active;
                workflow.created_at += Duration::hours(age);
                workflow
            })
    }

    proptest! {
        #[test]
        fn diagnostic_selection_agrees_with_fast_path(
            amount in 0i64..200,
            dimensions in prop::collection::vec(dimension_strategy(), 0..5),
            workflows in prop::collection::vec(workflow_strategy(), 0..6),
        ) {
            let expense = expense(Decimal::new(amount, 0), dimensions);

            let fast = WorkflowMatcher::find_matching_workflow(&expense, &workflows)
                .map(|workflow| workflow.id.clone());
            let report = WorkflowMatcher::evaluate_all(&expense, &workflows);

            prop_assert_eq!(fast, report.selected_workflow_id);
        }

        #[test]
        fn selected_workflow_is_active_and_outranks_other_matches(
            amount in 0i64..200,
            dimensions in prop::collection::vec(dimension_strategy(), 0..5),
            workflows in prop::collection::vec(workflow_strategy(), 0..6),
        ) {
            let expense = expense(Decimal::new(amount, 0), dimensions);

            if let Some(selected) = WorkflowMatcher::find_matching_workflow(&expense, &workflows) {
                prop_assert!(selected.active);
                let rivals = workflows
                    .iter()
                    .filter(|other| other.active && WorkflowMatcher::matches(&expense, other));
                for other in rivals {
                    prop_assert!(other.priority <= selected.priority);
                }
            }
        }
    }
}
