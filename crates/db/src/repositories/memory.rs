use std::collections::HashMap;

use tokio::sync::RwLock;

use spendgate_core::approvals::{OrganizationSnapshot, PermissionScope};
use spendgate_core::domain::execution::{
    ApprovalDecision, ApprovalExecution, ExecutionId, ExecutionTransition,
};
use spendgate_core::domain::expense::{Expense, ExpenseApprovalStatus, ExpenseId};
use spendgate_core::domain::organization::{
    Membership, OrgUnit, OrgUnitId, PermissionGrant, TenantId, User, UserId,
};
use spendgate_core::domain::workflow::{WorkflowDefinition, WorkflowId};

use super::{
    DecisionCommit, DecisionCommitResult, ExecutionRepository, ExpenseRepository,
    OrganizationRepository, RepositoryError, StartCommit, StartCommitResult, WorkflowRepository,
};

#[derive(Default)]
struct StoreState {
    workflows: HashMap<WorkflowId, WorkflowDefinition>,
    expenses: HashMap<ExpenseId, Expense>,
    users: HashMap<UserId, User>,
    units: HashMap<OrgUnitId, OrgUnit>,
    memberships: Vec<Membership>,
    grants: Vec<PermissionGrant>,
    executions: HashMap<ExecutionId, ApprovalExecution>,
    decisions: Vec<ApprovalDecision>,
    transitions: Vec<ExecutionTransition>,
}

/// Single-lock store backing every repository trait. Commits take the write
/// lock for their whole check-and-apply so they behave like the SQLite
/// transactions.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    state: RwLock<StoreState>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryApprovalStore {
    async fn list_active_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let state = self.state.read().await;
        let mut workflows: Vec<WorkflowDefinition> = state
            .workflows
            .values()
            .filter(|workflow| workflow.active && &workflow.tenant_id == tenant_id)
            .cloned()
            .collect();
        workflows.sort_by(WorkflowDefinition::precedence);
        Ok(workflows)
    }

    async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.state.read().await.workflows.get(id).cloned())
    }

    async fn save(&self, workflow: WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExpenseRepository for InMemoryApprovalStore {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        Ok(self.state.read().await.expenses.get(id).cloned())
    }

    async fn save(&self, expense: Expense) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.expenses.insert(expense.id.clone(), expense);
        Ok(())
    }

    async fn update_status(
        &self,
        id: &ExpenseId,
        status: ExpenseApprovalStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let expense = state
            .expenses
            .get_mut(id)
            .ok_or_else(|| RepositoryError::Decode(format!("expense `{}` does not exist", id.0)))?;
        expense.approval_status = status;
        Ok(())
    }
}

#[async_trait::async_trait]
impl OrganizationRepository for InMemoryApprovalStore {
    async fn load_snapshot(
        &self,
        tenant_id: &TenantId,
        scope: PermissionScope,
    ) -> Result<OrganizationSnapshot, RepositoryError> {
        let state = self.state.read().await;
        let mut snapshot = OrganizationSnapshot::new(scope);

        let grants: Vec<&PermissionGrant> = state
            .grants
            .iter()
            .filter(|grant| scope == PermissionScope::Global || &grant.tenant_id == tenant_id)
            .collect();

        for user in state.users.values() {
            let holds_grant = grants.iter().any(|grant| grant.user_id == user.id);
            if &user.tenant_id == tenant_id || holds_grant {
                snapshot.add_user(user.clone());
            }
        }
        for unit in state.units.values().filter(|unit| &unit.tenant_id == tenant_id) {
            snapshot.add_unit(unit.clone());
        }
        for membership in &state.memberships {
            let in_tenant = state
                .units
                .get(&membership.unit_id)
                .is_some_and(|unit| &unit.tenant_id == tenant_id);
            if in_tenant {
                snapshot.add_membership(membership.clone());
            }
        }
        for grant in grants {
            snapshot.add_grant(grant.clone());
        }

        Ok(snapshot)
    }

    async fn save_user(&self, user: User) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn save_unit(&self, unit: OrgUnit) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.units.insert(unit.id.clone(), unit);
        Ok(())
    }

    async fn add_membership(&self, membership: Membership) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let existing = state.memberships.iter_mut().find(|seat| {
            seat.user_id == membership.user_id
                && seat.unit_id == membership.unit_id
                && seat.role == membership.role
        });
        match existing {
            Some(seat) => *seat = membership,
            None => state.memberships.push(membership),
        }
        Ok(())
    }

    async fn add_grant(&self, grant: PermissionGrant) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if !state.grants.contains(&grant) {
            state.grants.push(grant);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExecutionRepository for InMemoryApprovalStore {
    async fn find_by_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ApprovalExecution>, RepositoryError> {
        Ok(self.state.read().await.executions.get(id).cloned())
    }

    async fn find_pending_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Option<ApprovalExecution>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .values()
            .find(|execution| &execution.expense_id == expense_id && execution.is_pending())
            .cloned())
    }

    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalExecution>, RepositoryError> {
        let state = self.state.read().await;
        let mut executions: Vec<ApprovalExecution> = state
            .executions
            .values()
            .filter(|execution| &execution.expense_id == expense_id)
            .cloned()
            .collect();
        executions.sort_by(|left, right| {
            left.started_at.cmp(&right.started_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(executions)
    }

    async fn list_decisions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ApprovalDecision>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .decisions
            .iter()
            .filter(|decision| &decision.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn list_transitions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ExecutionTransition>, RepositoryError> {
        let state = self.state.read().await;
        let mut transitions: Vec<ExecutionTransition> = state
            .transitions
            .iter()
            .filter(|transition| &transition.execution_id == execution_id)
            .cloned()
            .collect();
        transitions.sort_by_key(|transition| transition.state_version);
        Ok(transitions)
    }

    async fn commit_start(
        &self,
        commit: StartCommit,
    ) -> Result<StartCommitResult, RepositoryError> {
        let mut state = self.state.write().await;
        let StartCommit { execution, transition, expense_status } = commit;

        if let Some(existing) = state.executions.values().find(|candidate| {
            candidate.expense_id == execution.expense_id && candidate.is_pending()
        }) {
            return Ok(StartCommitResult::AlreadyPending(existing.clone()));
        }

        let expense = state.expenses.get_mut(&execution.expense_id).ok_or_else(|| {
            RepositoryError::Decode(format!("expense `{}` does not exist", execution.expense_id.0))
        })?;
        expense.approval_status = expense_status;
        state.transitions.push(transition);
        state.executions.insert(execution.id.clone(), execution);

        Ok(StartCommitResult::Committed)
    }

    async fn commit_decision(
        &self,
        commit: DecisionCommit,
    ) -> Result<DecisionCommitResult, RepositoryError> {
        let mut state = self.state.write().await;
        let DecisionCommit {
            decision, execution, expected_version, transition, expense_status, ..
        } = commit;

        if let Some(existing) = state.decisions.iter().find(|recorded| {
            recorded.execution_id == decision.execution_id
                && recorded.step_id == decision.step_id
                && recorded.approver_id == decision.approver_id
        }) {
            return Ok(DecisionCommitResult::Duplicate(existing.clone()));
        }

        let current_version = state
            .executions
            .get(&execution.id)
            .map(|stored| stored.state_version)
            .ok_or_else(|| {
                RepositoryError::Decode(format!("execution `{}` does not exist", execution.id.0))
            })?;
        if current_version != expected_version {
            return Ok(DecisionCommitResult::StaleVersion);
        }

        if let Some(expense) = state.expenses.get_mut(&execution.expense_id) {
            expense.approval_status = expense_status;
        }
        state.decisions.push(decision);
        state.transitions.push(transition);
        state.executions.insert(execution.id.clone(), execution);

        Ok(DecisionCommitResult::Committed)
    }
}
