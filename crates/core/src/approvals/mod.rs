//! Expense approval workflow engine: criteria evaluation, workflow matching,
//! approver resolution and execution state.

pub mod criteria;
pub mod directory;
pub mod engine;
pub mod matcher;
pub mod resolver;

pub use criteria::{ConditionDefect, CriteriaEvaluator};
pub use directory::{OrganizationDirectory, OrganizationSnapshot, PermissionScope};
pub use engine::{
    ApprovalError, ApprovalExecutionEngine, DecisionOutcome, DecisionRequest, StartOutcome,
};
pub use matcher::{AmountCheck, ConditionCheck, MatchReport, WorkflowEvaluation, WorkflowMatcher};
pub use resolver::{ApproverResolver, Resolution, ResolutionWarning};
