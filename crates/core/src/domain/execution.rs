use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::expense::ExpenseId;
use crate::domain::organization::{TenantId, UserId};
use crate::domain::workflow::{StepId, WorkflowId, WorkflowStep};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecisionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Approved,
    Rejected,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Outcome submitted by an approver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One approval run for one expense. Steps are copied from the workflow when
/// the run starts so later edits to the definition do not leak in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalExecution {
    pub id: ExecutionId,
    pub tenant_id: TenantId,
    pub expense_id: ExpenseId,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub steps: Vec<WorkflowStep>,
    pub current_step_id: Option<StepId>,
    pub status: ExecutionStatus,
    pub initiated_by: UserId,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub state_version: u32,
}

impl ApprovalExecution {
    pub fn is_pending(&self) -> bool {
        self.status == ExecutionStatus::Pending
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_approved(&self) -> bool {
        self.status == ExecutionStatus::Approved
    }

    pub fn is_rejected(&self) -> bool {
        self.status == ExecutionStatus::Rejected
    }

    /// Wall-clock seconds from start to completion; `None` while pending.
    pub fn duration_seconds(&self) -> Option<i64> {
        self.completed_at.map(|completed_at| (completed_at - self.started_at).num_seconds())
    }

    pub fn step(&self, step_id: &StepId) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| &step.id == step_id)
    }

    pub fn current_step(&self) -> Result<&WorkflowStep, DomainError> {
        let step_id = self.current_step_id.as_ref().ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "execution {} has no current step",
                self.id.0
            ))
        })?;

        self.step(step_id).ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "current step {} is missing from execution {} snapshot",
                step_id.0, self.id.0
            ))
        })
    }

    /// The step with the smallest order strictly greater than `order`.
    pub fn next_step_after(&self, order: u32) -> Option<&WorkflowStep> {
        self.steps.iter().filter(|step| step.order > order).min_by_key(|step| step.order)
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        match (self.status.is_terminal(), &self.current_step_id, self.completed_at) {
            (false, Some(_), None) => self.current_step().map(|_| ()),
            (true, None, Some(_)) => Ok(()),
            (true, Some(step_id), _) => Err(DomainError::InvariantViolation(format!(
                "terminal execution {} still points at step {}",
                self.id.0, step_id.0
            ))),
            _ => Err(DomainError::InvariantViolation(format!(
                "execution {} has inconsistent status {} and completion state",
                self.id.0,
                self.status.as_str()
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub id: DecisionId,
    pub execution_id: ExecutionId,
    pub step_id: StepId,
    pub approver_id: UserId,
    pub verdict: Verdict,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    ExecutionStarted,
    DecisionRecorded,
    StepAdvanced,
    ExecutionApproved,
    ExecutionRejected,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionStarted => "execution_started",
            Self::DecisionRecorded => "decision_recorded",
            Self::StepAdvanced => "step_advanced",
            Self::ExecutionApproved => "execution_approved",
            Self::ExecutionRejected => "execution_rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "execution_started" => Some(Self::ExecutionStarted),
            "decision_recorded" => Some(Self::DecisionRecorded),
            "step_advanced" => Some(Self::StepAdvanced),
            "execution_approved" => Some(Self::ExecutionApproved),
            "execution_rejected" => Some(Self::ExecutionRejected),
            _ => None,
        }
    }
}

/// Append-only record of one execution state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTransition {
    pub id: TransitionId,
    pub execution_id: ExecutionId,
    pub expense_id: ExpenseId,
    pub from_status: Option<ExecutionStatus>,
    pub to_status: ExecutionStatus,
    pub from_step_id: Option<StepId>,
    pub to_step_id: Option<StepId>,
    pub reason: TransitionReason,
    pub actor_id: UserId,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}
