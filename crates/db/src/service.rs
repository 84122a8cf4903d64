//! Approval workflow service.
//!
//! Wires the pure [`ApprovalExecutionEngine`] to storage: loads expense,
//! workflows, decisions and an organization snapshot, runs the engine, and
//! commits its result. Decision commits are guarded by the execution's state
//! version; a stale commit re-runs the whole cycle against fresh state.

use std::sync::Arc;

use chrono::Utc;

use spendgate_core::approvals::{
    ApprovalError, ApprovalExecutionEngine, DecisionOutcome, DecisionRequest, MatchReport,
    PermissionScope, Resolution, StartOutcome, WorkflowMatcher,
};
use spendgate_core::audit::{
    self, AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink,
};
use spendgate_core::config::ApprovalsConfig;
use spendgate_core::domain::execution::{
    ApprovalDecision, ApprovalExecution, ExecutionId, ExecutionTransition,
};
use spendgate_core::domain::expense::{Expense, ExpenseId};
use spendgate_core::domain::organization::UserId;
use spendgate_core::errors::{ApplicationError, DomainError};

use crate::repositories::{
    DecisionCommit, DecisionCommitResult, ExecutionRepository, ExpenseRepository,
    InMemoryApprovalStore, OrganizationRepository, SqlExecutionRepository, SqlExpenseRepository,
    SqlOrganizationRepository, SqlWorkflowRepository, StartCommit, StartCommitResult,
    WorkflowRepository,
};
use crate::DbPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceSettings {
    pub permission_scope: PermissionScope,
    pub max_commit_attempts: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { permission_scope: PermissionScope::Tenant, max_commit_attempts: 3 }
    }
}

impl From<&ApprovalsConfig> for ServiceSettings {
    fn from(config: &ApprovalsConfig) -> Self {
        Self {
            permission_scope: config.permission_scope,
            max_commit_attempts: config.max_commit_attempts,
        }
    }
}

pub struct ApprovalWorkflowService {
    workflows: Arc<dyn WorkflowRepository>,
    expenses: Arc<dyn ExpenseRepository>,
    organization: Arc<dyn OrganizationRepository>,
    executions: Arc<dyn ExecutionRepository>,
    audit: Arc<dyn AuditSink>,
    engine: ApprovalExecutionEngine,
    settings: ServiceSettings,
}

impl ApprovalWorkflowService {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        expenses: Arc<dyn ExpenseRepository>,
        organization: Arc<dyn OrganizationRepository>,
        executions: Arc<dyn ExecutionRepository>,
        audit: Arc<dyn AuditSink>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            workflows,
            expenses,
            organization,
            executions,
            audit,
            engine: ApprovalExecutionEngine::new(),
            settings,
        }
    }

    pub fn sqlite(pool: DbPool, settings: ServiceSettings) -> Self {
        Self::new(
            Arc::new(SqlWorkflowRepository::new(pool.clone())),
            Arc::new(SqlExpenseRepository::new(pool.clone())),
            Arc::new(SqlOrganizationRepository::new(pool.clone())),
            Arc::new(SqlExecutionRepository::new(pool)),
            Arc::new(TracingAuditSink),
            settings,
        )
    }

    pub fn in_memory(store: Arc<InMemoryApprovalStore>, settings: ServiceSettings) -> Self {
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            Arc::new(TracingAuditSink),
            settings,
        )
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> ServiceSettings {
        self.settings
    }

    /// Starts approval for a submitted expense, or reports that none is
    /// needed. Returns the already pending run unchanged when one exists.
    pub async fn start_approval(
        &self,
        expense_id: &ExpenseId,
        initiated_by: &UserId,
        correlation_id: &str,
    ) -> Result<StartOutcome, ApplicationError> {
        let expense = self.load_expense(expense_id).await?;
        let pending = self.executions.find_pending_for_expense(expense_id).await?;
        let workflows = self.workflows.list_active_for_tenant(&expense.tenant_id).await?;
        let context = AuditContext::new(Some(expense.id.clone()), correlation_id, &initiated_by.0);

        let outcome = self.engine.start(&expense, &workflows, initiated_by, pending.as_ref())?;
        match outcome {
            StartOutcome::AutoApproved { expense_status } => {
                self.expenses.update_status(&expense.id, expense_status).await?;
                self.audit.emit(
                    context
                        .event(audit::AUTO_APPROVED, AuditCategory::Matching, AuditOutcome::Success)
                        .with_metadata("expense_status", expense_status.as_str())
                        .with_metadata("candidates", workflows.len().to_string()),
                );
                Ok(StartOutcome::AutoApproved { expense_status })
            }
            StartOutcome::Started { execution, transition, expense_status } => {
                let commit = StartCommit {
                    execution: execution.clone(),
                    transition: transition.clone(),
                    expense_status,
                };
                match self.executions.commit_start(commit).await? {
                    StartCommitResult::Committed => {
                        self.audit.emit(
                            context
                                .event(
                                    audit::EXECUTION_STARTED,
                                    AuditCategory::Execution,
                                    AuditOutcome::Success,
                                )
                                .with_metadata("execution_id", &execution.id.0)
                                .with_metadata("workflow_id", &execution.workflow_id.0),
                        );
                        tracing::info!(
                            event_name = audit::EXECUTION_STARTED,
                            correlation_id,
                            tenant_id = %execution.tenant_id.0,
                            expense_id = %execution.expense_id.0,
                            execution_id = %execution.id.0,
                            "approval execution committed"
                        );
                        Ok(StartOutcome::Started { execution, transition, expense_status })
                    }
                    StartCommitResult::AlreadyPending(existing) => {
                        tracing::info!(
                            event_name = "approval.start_raced",
                            correlation_id,
                            expense_id = %existing.expense_id.0,
                            execution_id = %existing.id.0,
                            "another caller started this expense first"
                        );
                        Ok(StartOutcome::AlreadyPending { execution: existing })
                    }
                }
            }
            StartOutcome::AlreadyPending { execution } => {
                Ok(StartOutcome::AlreadyPending { execution })
            }
        }
    }

    /// Records one approver's verdict on the execution's current step.
    pub async fn submit_decision(
        &self,
        execution_id: &ExecutionId,
        request: DecisionRequest,
        correlation_id: &str,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let attempts = self.settings.max_commit_attempts.max(1);

        for attempt in 1..=attempts {
            let execution = self.load_execution(execution_id).await?;
            let expense = self.load_expense(&execution.expense_id).await?;
            let decisions = self.executions.list_decisions(&execution.id).await?;
            let directory = self
                .organization
                .load_snapshot(&execution.tenant_id, self.settings.permission_scope)
                .await?;
            let context = AuditContext::new(
                Some(expense.id.clone()),
                correlation_id,
                &request.acting_user.0,
            );

            let outcome = match self.engine.process_decision(
                &execution,
                &expense,
                &decisions,
                &directory,
                &request,
            ) {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.emit_denied(&context, &execution, &error);
                    return Err(error.into());
                }
            };

            if outcome.replayed {
                self.emit_replayed(&context, &outcome.decision);
                return Ok(outcome);
            }

            let transition = outcome.transition.clone().ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "applied decision on execution {} produced no transition",
                    execution.id.0
                ))
            })?;
            let commit = DecisionCommit {
                decision: outcome.decision.clone(),
                execution: outcome.execution.clone(),
                expected_version: outcome.expected_version,
                transition,
                expense_status: outcome.expense_status,
                committed_at: Utc::now(),
            };

            match self.executions.commit_decision(commit).await? {
                DecisionCommitResult::Committed => {
                    self.emit_recorded(&context, &outcome);
                    return Ok(outcome);
                }
                DecisionCommitResult::Duplicate(existing) => {
                    self.emit_replayed(&context, &existing);
                    let execution =
                        self.executions.find_by_id(execution_id).await?.unwrap_or(execution);
                    let expense_status = self
                        .expenses
                        .find_by_id(&expense.id)
                        .await?
                        .map_or(expense.approval_status, |fresh| fresh.approval_status);
                    return Ok(DecisionOutcome {
                        decision: existing,
                        expected_version: execution.state_version,
                        execution,
                        transition: None,
                        expense_status,
                        replayed: true,
                    });
                }
                DecisionCommitResult::StaleVersion => {
                    tracing::warn!(
                        event_name = "approval.commit_conflict",
                        correlation_id,
                        execution_id = %execution_id.0,
                        attempt,
                        max_attempts = attempts,
                        expected_version = outcome.expected_version,
                        "execution changed while deciding; retrying against fresh state"
                    );
                }
            }
        }

        Err(ApplicationError::Concurrency(format!(
            "execution `{}` kept changing; gave up after {attempts} attempts",
            execution_id.0
        )))
    }

    /// Diagnostic match report for an expense. Read-only.
    pub async fn preview(&self, expense_id: &ExpenseId) -> Result<MatchReport, ApplicationError> {
        let expense = self.load_expense(expense_id).await?;
        let workflows = self.workflows.list_active_for_tenant(&expense.tenant_id).await?;
        Ok(WorkflowMatcher::evaluate_all(&expense, &workflows))
    }

    pub async fn can_user_decide(
        &self,
        execution_id: &ExecutionId,
        user_id: &UserId,
    ) -> Result<bool, ApplicationError> {
        Ok(self.reason_cannot_decide(execution_id, user_id).await?.is_none())
    }

    pub async fn reason_cannot_decide(
        &self,
        execution_id: &ExecutionId,
        user_id: &UserId,
    ) -> Result<Option<String>, ApplicationError> {
        let execution = self.load_execution(execution_id).await?;
        let expense = self.load_expense(&execution.expense_id).await?;
        let decisions = self.executions.list_decisions(&execution.id).await?;
        let directory = self
            .organization
            .load_snapshot(&execution.tenant_id, self.settings.permission_scope)
            .await?;

        Ok(self.engine.reason_cannot_decide(&execution, &expense, &decisions, &directory, user_id))
    }

    pub async fn eligible_approvers(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Resolution, ApplicationError> {
        let execution = self.load_execution(execution_id).await?;
        let expense = self.load_expense(&execution.expense_id).await?;
        let directory = self
            .organization
            .load_snapshot(&execution.tenant_id, self.settings.permission_scope)
            .await?;

        Ok(self.engine.eligible_approvers(&execution, &expense, &directory)?)
    }

    pub async fn execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<ApprovalExecution, ApplicationError> {
        self.load_execution(execution_id).await
    }

    pub async fn executions_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalExecution>, ApplicationError> {
        Ok(self.executions.list_for_expense(expense_id).await?)
    }

    pub async fn decision_history(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ApprovalDecision>, ApplicationError> {
        Ok(self.executions.list_decisions(execution_id).await?)
    }

    pub async fn transitions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ExecutionTransition>, ApplicationError> {
        Ok(self.executions.list_transitions(execution_id).await?)
    }

    async fn load_expense(&self, expense_id: &ExpenseId) -> Result<Expense, ApplicationError> {
        self.expenses.find_by_id(expense_id).await?.ok_or_else(|| ApplicationError::NotFound {
            entity: "expense",
            id: expense_id.0.clone(),
        })
    }

    async fn load_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<ApprovalExecution, ApplicationError> {
        self.executions.find_by_id(execution_id).await?.ok_or_else(|| ApplicationError::NotFound {
            entity: "approval execution",
            id: execution_id.0.clone(),
        })
    }

    fn emit_recorded(&self, context: &AuditContext, outcome: &DecisionOutcome) {
        self.audit.emit(
            context
                .event(audit::DECISION_RECORDED, AuditCategory::Decision, AuditOutcome::Success)
                .with_metadata("execution_id", &outcome.execution.id.0)
                .with_metadata("step_id", &outcome.decision.step_id.0)
                .with_metadata("verdict", outcome.decision.verdict.as_str())
                .with_metadata("state_version", outcome.execution.state_version.to_string()),
        );

        if outcome.completed() {
            let result = if outcome.execution.is_approved() {
                AuditOutcome::Success
            } else {
                AuditOutcome::Rejected
            };
            self.audit.emit(
                context
                    .event(audit::EXECUTION_COMPLETED, AuditCategory::Execution, result)
                    .with_metadata("execution_id", &outcome.execution.id.0)
                    .with_metadata("status", outcome.execution.status.as_str())
                    .with_metadata("expense_status", outcome.expense_status.as_str()),
            );
        }
    }

    fn emit_replayed(&self, context: &AuditContext, decision: &ApprovalDecision) {
        self.audit.emit(
            context
                .event(audit::DECISION_REPLAYED, AuditCategory::Decision, AuditOutcome::Success)
                .with_metadata("execution_id", &decision.execution_id.0)
                .with_metadata("decision_id", &decision.id.0),
        );
    }

    fn emit_denied(
        &self,
        context: &AuditContext,
        execution: &ApprovalExecution,
        error: &ApprovalError,
    ) {
        self.audit.emit(
            context
                .event(audit::DECISION_DENIED, AuditCategory::Decision, AuditOutcome::Rejected)
                .with_metadata("execution_id", &execution.id.0)
                .with_metadata("code", error.code())
                .with_metadata("message", error.to_string()),
        );
    }
}
