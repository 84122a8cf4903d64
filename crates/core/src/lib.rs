pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{
    ApprovalError, ApprovalExecutionEngine, ApproverResolver, CriteriaEvaluator, DecisionOutcome,
    DecisionRequest, MatchReport, OrganizationDirectory, OrganizationSnapshot, PermissionScope,
    Resolution, ResolutionWarning, StartOutcome, WorkflowMatcher,
};
pub use domain::execution::{
    ApprovalDecision, ApprovalExecution, ExecutionId, ExecutionStatus, ExecutionTransition,
    TransitionReason, Verdict,
};
pub use domain::expense::{
    DimensionRef, DimensionType, Expense, ExpenseApprovalStatus, ExpenseId,
};
pub use domain::organization::{OrgUnitId, TenantId, UserId};
pub use domain::workflow::{
    ApproverKind, ConditionOperand, ConditionOperator, MatchCondition, StepApproverSpec, StepId,
    WorkflowDefinition, WorkflowId, WorkflowStep,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
