use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::expense::DimensionType;
use crate::domain::organization::{OrgUnitId, TenantId, UserId};

/// Unit-role operand that targets the parent of the resolved unit.
pub const PARENT_UNIT_ROLE: &str = "PARENT_UNIT";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub String);

/// Match-condition operator. Values that cannot be parsed from storage are
/// kept verbatim in `Unrecognized` and never match.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionOperator {
    HasAny,
    HasNone,
    Equals,
    NotEquals,
    In,
    NotIn,
    CountGte,
    CountLte,
    CountEquals,
    Unrecognized(String),
}

impl ConditionOperator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::HasAny => "has_any",
            Self::HasNone => "has_none",
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::CountGte => "count_gte",
            Self::CountLte => "count_lte",
            Self::CountEquals => "count_equals",
            Self::Unrecognized(raw) => raw.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "has_any" => Self::HasAny,
            "has_none" => Self::HasNone,
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "count_gte" => Self::CountGte,
            "count_lte" => Self::CountLte,
            "count_equals" => Self::CountEquals,
            _ => Self::Unrecognized(value.to_string()),
        }
    }
}

impl From<String> for ConditionOperator {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ConditionOperator> for String {
    fn from(value: ConditionOperator) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ConditionOperand {
    #[default]
    None,
    Value(String),
    Values(Vec<String>),
    Count(u32),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCondition {
    pub dimension_type: Option<DimensionType>,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub operand: ConditionOperand,
}

impl MatchCondition {
    pub fn new(
        dimension_type: DimensionType,
        operator: ConditionOperator,
        operand: ConditionOperand,
    ) -> Self {
        Self { dimension_type: Some(dimension_type), operator, operand }
    }

    pub fn label(&self) -> String {
        let dimension = self.dimension_type.map(|value| value.as_str()).unwrap_or("<missing>");
        format!("{dimension} {}", self.operator.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ApproverKind {
    User(UserId),
    UnitRole(String),
    SystemPermission(String),
}

impl ApproverKind {
    pub fn type_str(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::UnitRole(_) => "unit_role",
            Self::SystemPermission(_) => "system_permission",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::User(user_id) => &user_id.0,
            Self::UnitRole(role) => role,
            Self::SystemPermission(permission) => permission,
        }
    }

    pub fn from_parts(approver_type: &str, value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        match approver_type.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User(UserId(value))),
            "unit_role" => Some(Self::UnitRole(value)),
            "system_permission" => Some(Self::SystemPermission(value)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepApproverSpec {
    pub approver: ApproverKind,
    pub org_unit_id: Option<OrgUnitId>,
    /// Stored for administrators; the decision logic does not consult it.
    pub can_delegate: bool,
}

impl StepApproverSpec {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::from_kind(ApproverKind::User(UserId(user_id.into())))
    }

    pub fn unit_role(role: impl Into<String>) -> Self {
        Self::from_kind(ApproverKind::UnitRole(role.into()))
    }

    pub fn permission(permission: impl Into<String>) -> Self {
        Self::from_kind(ApproverKind::SystemPermission(permission.into()))
    }

    pub fn in_unit(mut self, unit_id: impl Into<String>) -> Self {
        self.org_unit_id = Some(OrgUnitId(unit_id.into()));
        self
    }

    fn from_kind(approver: ApproverKind) -> Self {
        Self { approver, org_unit_id: None, can_delegate: false }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub order: u32,
    pub name: String,
    pub require_all_approvers: bool,
    pub min_approvers: u32,
    pub approvers: Vec<StepApproverSpec>,
}

impl WorkflowStep {
    /// Approvals needed under the minimum-count rule; never below one.
    pub fn required_approvals(&self) -> usize {
        self.min_approvers.max(1) as usize
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub tenant_id: TenantId,
    pub name: String,
    pub active: bool,
    pub priority: i32,
    pub amount_min: Option<Decimal>,
    pub amount_max: Option<Decimal>,
    pub conditions: Vec<MatchCondition>,
    pub steps: Vec<WorkflowStep>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Matching order: priority descending, then creation time, then id.
    pub fn precedence(left: &Self, right: &Self) -> Ordering {
        right
            .priority
            .cmp(&left.priority)
            .then_with(|| left.created_at.cmp(&right.created_at))
            .then_with(|| left.id.cmp(&right.id))
    }

    /// Steps sorted by their order.
    pub fn ordered_steps(&self) -> Vec<WorkflowStep> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|step| step.order);
        steps
    }

    pub fn first_step(&self) -> Option<&WorkflowStep> {
        self.steps.iter().min_by_key(|step| step.order)
    }

    pub fn validate(&self) -> Vec<WorkflowDefect> {
        let mut defects = Vec::new();

        if self.steps.is_empty() {
            defects.push(WorkflowDefect::NoSteps);
        }

        if let (Some(min), Some(max)) = (self.amount_min, self.amount_max) {
            if min > max {
                defects.push(WorkflowDefect::InvertedAmountRange { min, max });
            }
        }

        for (index, condition) in self.conditions.iter().enumerate() {
            if condition.dimension_type.is_none() {
                defects.push(WorkflowDefect::ConditionMissingDimension { index });
            }
            if let ConditionOperator::Unrecognized(operator) = &condition.operator {
                defects.push(WorkflowDefect::UnrecognizedOperator {
                    index,
                    operator: operator.clone(),
                });
            }
        }

        let mut seen_orders = BTreeSet::new();
        for step in &self.steps {
            if !seen_orders.insert(step.order) {
                defects.push(WorkflowDefect::DuplicateStepOrder { order: step.order });
            }
            if !step.require_all_approvers && step.min_approvers == 0 {
                defects.push(WorkflowDefect::ZeroMinimumApprovers { step_id: step.id.clone() });
            }
            if step.approvers.is_empty() {
                defects.push(WorkflowDefect::StepWithoutApprovers { step_id: step.id.clone() });
            }
        }

        defects
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowDefect {
    NoSteps,
    InvertedAmountRange { min: Decimal, max: Decimal },
    ConditionMissingDimension { index: usize },
    UnrecognizedOperator { index: usize, operator: String },
    DuplicateStepOrder { order: u32 },
    ZeroMinimumApprovers { step_id: StepId },
    StepWithoutApprovers { step_id: StepId },
}

impl WorkflowDefect {
    pub fn describe(&self) -> String {
        match self {
            Self::NoSteps => "workflow has no steps".to_string(),
            Self::InvertedAmountRange { min, max } => {
                format!("amount_min {min} is greater than amount_max {max}")
            }
            Self::ConditionMissingDimension { index } => {
                format!("condition #{index} has no dimension type")
            }
            Self::UnrecognizedOperator { index, operator } => {
                format!("condition #{index} uses unrecognized operator `{operator}`")
            }
            Self::DuplicateStepOrder { order } => format!("step order {order} is used twice"),
            Self::ZeroMinimumApprovers { step_id } => {
                format!("step `{}` requires zero approvers", step_id.0)
            }
            Self::StepWithoutApprovers { step_id } => {
                format!("step `{}` has no approver specs", step_id.0)
            }
        }
    }
}
