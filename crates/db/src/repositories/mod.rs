use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use spendgate_core::approvals::{OrganizationSnapshot, PermissionScope};
use spendgate_core::domain::execution::{
    ApprovalDecision, ApprovalExecution, ExecutionId, ExecutionTransition,
};
use spendgate_core::domain::expense::{Expense, ExpenseApprovalStatus, ExpenseId};
use spendgate_core::domain::organization::{
    Membership, OrgUnit, PermissionGrant, TenantId, User,
};
use spendgate_core::domain::workflow::{WorkflowDefinition, WorkflowId};
use spendgate_core::errors::ApplicationError;

pub mod execution;
pub mod expense;
pub mod memory;
pub mod organization;
pub mod workflow;

pub use execution::SqlExecutionRepository;
pub use expense::SqlExpenseRepository;
pub use memory::InMemoryApprovalStore;
pub use organization::SqlOrganizationRepository;
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(error)) => error.is_unique_violation(),
            Self::Conflict(_) => true,
            _ => false,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict(message) => ApplicationError::Concurrency(message),
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Active workflows of one tenant, highest precedence first.
    async fn list_active_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError>;

    async fn find_by_id(&self, id: &WorkflowId)
        -> Result<Option<WorkflowDefinition>, RepositoryError>;

    async fn save(&self, workflow: WorkflowDefinition) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError>;

    async fn save(&self, expense: Expense) -> Result<(), RepositoryError>;

    async fn update_status(
        &self,
        id: &ExpenseId,
        status: ExpenseApprovalStatus,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    /// Users, units, memberships and grants visible to approvals in `tenant_id`.
    /// With [`PermissionScope::Global`] grants from every tenant are loaded.
    async fn load_snapshot(
        &self,
        tenant_id: &TenantId,
        scope: PermissionScope,
    ) -> Result<OrganizationSnapshot, RepositoryError>;

    async fn save_user(&self, user: User) -> Result<(), RepositoryError>;

    async fn save_unit(&self, unit: OrgUnit) -> Result<(), RepositoryError>;

    async fn add_membership(&self, membership: Membership) -> Result<(), RepositoryError>;

    async fn add_grant(&self, grant: PermissionGrant) -> Result<(), RepositoryError>;
}

/// A freshly started execution plus the side effects committed with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartCommit {
    pub execution: ApprovalExecution,
    pub transition: ExecutionTransition,
    pub expense_status: ExpenseApprovalStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartCommitResult {
    Committed,
    /// Another caller started a run for the expense first.
    AlreadyPending(ApprovalExecution),
}

/// One applied decision. `execution` is the next state; the commit only
/// lands if the stored execution still has `expected_version`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionCommit {
    pub decision: ApprovalDecision,
    pub execution: ApprovalExecution,
    pub expected_version: u32,
    pub transition: ExecutionTransition,
    pub expense_status: ExpenseApprovalStatus,
    pub committed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionCommitResult {
    Committed,
    /// The approver already has a decision on this step; nothing was written.
    Duplicate(ApprovalDecision),
    /// The execution moved past `expected_version`; nothing was written.
    StaleVersion,
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn find_by_id(&self, id: &ExecutionId)
        -> Result<Option<ApprovalExecution>, RepositoryError>;

    async fn find_pending_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Option<ApprovalExecution>, RepositoryError>;

    /// Every run of an expense, oldest first.
    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalExecution>, RepositoryError>;

    async fn list_decisions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ApprovalDecision>, RepositoryError>;

    async fn list_transitions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ExecutionTransition>, RepositoryError>;

    async fn commit_start(&self, commit: StartCommit)
        -> Result<StartCommitResult, RepositoryError>;

    async fn commit_decision(
        &self,
        commit: DecisionCommit,
    ) -> Result<DecisionCommitResult, RepositoryError>;
}

pub(crate) fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_decimal(
    column: &str,
    value: &str,
) -> Result<rust_decimal::Decimal, RepositoryError> {
    value.parse::<rust_decimal::Decimal>().map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}
