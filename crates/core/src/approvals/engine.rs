//! Per-expense approval run: start, decide, quorum, advance, finalize.
//!
//! The engine is pure. Callers load the workflow definitions, the current
//! execution, its decisions and an organization snapshot, and persist what the
//! engine returns. Every applied decision produces exactly one transition and
//! one state-version bump so storage can commit with compare-and-swap.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::approvals::directory::OrganizationDirectory;
use crate::approvals::matcher::WorkflowMatcher;
use crate::approvals::resolver::{ApproverResolver, Resolution};
use crate::domain::execution::{
    ApprovalDecision, ApprovalExecution, DecisionId, ExecutionId, ExecutionStatus,
    ExecutionTransition, TransitionId, TransitionReason, Verdict,
};
use crate::domain::expense::{Expense, ExpenseApprovalStatus};
use crate::domain::organization::UserId;
use crate::domain::workflow::{StepId, WorkflowDefinition, WorkflowStep};
use crate::errors::DomainError;

const NOT_PENDING_MESSAGE: &str = "Execution is not pending";
const UNAUTHORIZED_MESSAGE: &str = "User is not authorized to approve this step";
const ALREADY_DECIDED_MESSAGE: &str = "User has already decided this step";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("approval configuration defect: {0}")]
    Configuration(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ApprovalError {
    pub fn not_pending() -> Self {
        Self::InvalidState(NOT_PENDING_MESSAGE.to_string())
    }

    pub fn unauthorized() -> Self {
        Self::Unauthorized(UNAUTHORIZED_MESSAGE.to_string())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidState(_) => "invalid_state",
            Self::Unauthorized(_) => "unauthorized",
            Self::Configuration(_) => "configuration",
            Self::Domain(_) => "domain",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// No workflow applies; nothing to persist besides the expense status.
    AutoApproved { expense_status: ExpenseApprovalStatus },
    Started {
        execution: ApprovalExecution,
        transition: ExecutionTransition,
        expense_status: ExpenseApprovalStatus,
    },
    /// A run was already pending for the expense and is returned unchanged.
    AlreadyPending { execution: ApprovalExecution },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub acting_user: UserId,
    pub verdict: Verdict,
    pub reason: Option<String>,
}

impl DecisionRequest {
    pub fn approve(acting_user: impl Into<String>) -> Self {
        Self { acting_user: UserId(acting_user.into()), verdict: Verdict::Approved, reason: None }
    }

    pub fn reject(acting_user: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            acting_user: UserId(acting_user.into()),
            verdict: Verdict::Rejected,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub decision: ApprovalDecision,
    pub execution: ApprovalExecution,
    /// `None` when the decision is a replay of an earlier submission.
    pub transition: Option<ExecutionTransition>,
    pub expense_status: ExpenseApprovalStatus,
    /// State version the execution had when the decision was evaluated.
    pub expected_version: u32,
    pub replayed: bool,
}

impl DecisionOutcome {
    pub fn completed(&self) -> bool {
        !self.replayed && self.execution.is_complete()
    }
}

enum DecisionGuard<'a> {
    Replay(&'a ApprovalDecision),
    Eligible { step: &'a WorkflowStep, resolution: Resolution },
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalExecutionEngine;

impl ApprovalExecutionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Begins approval for a submitted expense. `pending` is the expense's
    /// currently pending run, if any.
    pub fn start(
        &self,
        expense: &Expense,
        workflows: &[WorkflowDefinition],
        initiated_by: &UserId,
        pending: Option<&ApprovalExecution>,
    ) -> Result<StartOutcome, ApprovalError> {
        if let Some(execution) = pending {
            if execution.is_pending() && execution.expense_id == expense.id {
                return Ok(StartOutcome::AlreadyPending { execution: execution.clone() });
            }
        }

        let mut expense = expense.clone();
        let Some(workflow) = WorkflowMatcher::find_matching_workflow(&expense, workflows) else {
            expense.transition_to(ExpenseApprovalStatus::NotRequired)?;
            tracing::info!(
                event_name = "approval.auto_approved",
                tenant_id = %expense.tenant_id.0,
                expense_id = %expense.id.0,
                "no workflow matched; approval not required"
            );
            return Ok(StartOutcome::AutoApproved { expense_status: expense.approval_status });
        };

        let Some(first_step) = workflow.first_step() else {
            tracing::warn!(
                event_name = "approval.configuration_defect",
                tenant_id = %expense.tenant_id.0,
                expense_id = %expense.id.0,
                workflow_id = %workflow.id.0,
                "matched workflow has no steps; refusing to start"
            );
            return Err(ApprovalError::Configuration(format!(
                "workflow `{}` has no steps",
                workflow.id.0
            )));
        };

        expense.transition_to(ExpenseApprovalStatus::Pending)?;

        let now = Utc::now();
        let execution = ApprovalExecution {
            id: ExecutionId(Uuid::new_v4().to_string()),
            tenant_id: expense.tenant_id.clone(),
            expense_id: expense.id.clone(),
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            steps: workflow.ordered_steps(),
            current_step_id: Some(first_step.id.clone()),
            status: ExecutionStatus::Pending,
            initiated_by: initiated_by.clone(),
            started_at: now,
            completed_at: None,
            state_version: 1,
        };
        let transition = transition(
            &execution,
            None,
            None,
            TransitionReason::ExecutionStarted,
            initiated_by,
            now,
        );

        tracing::info!(
            event_name = "approval.execution_started",
            tenant_id = %execution.tenant_id.0,
            expense_id = %execution.expense_id.0,
            execution_id = %execution.id.0,
            workflow_id = %execution.workflow_id.0,
            step_id = %first_step.id.0,
            "approval execution started"
        );

        Ok(StartOutcome::Started {
            execution,
            transition,
            expense_status: expense.approval_status,
        })
    }

    /// Applies one approver's verdict. `decisions` are all decisions recorded
    /// for the execution so far.
    pub fn process_decision(
        &self,
        execution: &ApprovalExecution,
        expense: &Expense,
        decisions: &[ApprovalDecision],
        directory: &dyn OrganizationDirectory,
        request: &DecisionRequest,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let now = Utc::now();
        let (step, resolution) =
            match self.guard(execution, expense, decisions, directory, &request.acting_user, now)? {
                DecisionGuard::Replay(existing) => {
                    tracing::debug!(
                        event_name = "approval.decision_replayed",
                        execution_id = %execution.id.0,
                        decision_id = %existing.id.0,
                        "returning previously recorded decision"
                    );
                    return Ok(DecisionOutcome {
                        decision: existing.clone(),
                        execution: execution.clone(),
                        transition: None,
                        expense_status: expense.approval_status,
                        expected_version: execution.state_version,
                        replayed: true,
                    });
                }
                DecisionGuard::Eligible { step, resolution } => (step, resolution),
            };

        let decision = ApprovalDecision {
            id: DecisionId(Uuid::new_v4().to_string()),
            execution_id: execution.id.clone(),
            step_id: step.id.clone(),
            approver_id: request.acting_user.clone(),
            verdict: request.verdict,
            reason: request.reason.clone(),
            decided_at: now,
        };

        let mut next = execution.clone();
        let mut expense = expense.clone();
        next.state_version = execution.state_version + 1;

        let reason = match request.verdict {
            Verdict::Rejected => {
                finalize(&mut next, ExecutionStatus::Rejected, now);
                expense.transition_to(ExpenseApprovalStatus::Rejected)?;
                TransitionReason::ExecutionRejected
            }
            Verdict::Approved => {
                let approvers = approvers_for_step(decisions, &decision);
                if !quorum_reached(step, &resolution, &approvers) {
                    TransitionReason::DecisionRecorded
                } else if let Some(following) = execution.next_step_after(step.order) {
                    next.current_step_id = Some(following.id.clone());
                    TransitionReason::StepAdvanced
                } else {
                    finalize(&mut next, ExecutionStatus::Approved, now);
                    expense.transition_to(ExpenseApprovalStatus::Approved)?;
                    TransitionReason::ExecutionApproved
                }
            }
        };

        next.check_invariants()?;
        let transition = transition(
            &next,
            Some(execution.status),
            Some(step.id.clone()),
            reason,
            &request.acting_user,
            now,
        );

        tracing::info!(
            event_name = "approval.decision_recorded",
            tenant_id = %execution.tenant_id.0,
            expense_id = %execution.expense_id.0,
            execution_id = %execution.id.0,
            step_id = %step.id.0,
            approver_id = %request.acting_user.0,
            verdict = request.verdict.as_str(),
            reason_code = reason.as_str(),
            state_version = next.state_version,
            "approval decision applied"
        );

        Ok(DecisionOutcome {
            decision,
            execution: next,
            transition: Some(transition),
            expense_status: expense.approval_status,
            expected_version: execution.state_version,
            replayed: false,
        })
    }

    pub fn can_user_decide(
        &self,
        execution: &ApprovalExecution,
        expense: &Expense,
        decisions: &[ApprovalDecision],
        directory: &dyn OrganizationDirectory,
        user_id: &UserId,
    ) -> bool {
        self.reason_cannot_decide(execution, expense, decisions, directory, user_id).is_none()
    }

    /// Human-readable reason the user may not decide now, or `None` if they may.
    pub fn reason_cannot_decide(
        &self,
        execution: &ApprovalExecution,
        expense: &Expense,
        decisions: &[ApprovalDecision],
        directory: &dyn OrganizationDirectory,
        user_id: &UserId,
    ) -> Option<String> {
        match self.guard(execution, expense, decisions, directory, user_id, Utc::now()) {
            Ok(DecisionGuard::Eligible { .. }) => None,
            Ok(DecisionGuard::Replay(_)) => Some(ALREADY_DECIDED_MESSAGE.to_string()),
            Err(error) => Some(error.to_string()),
        }
    }

    /// Eligible approvers for the execution's current step.
    pub fn eligible_approvers(
        &self,
        execution: &ApprovalExecution,
        expense: &Expense,
        directory: &dyn OrganizationDirectory,
    ) -> Result<Resolution, ApprovalError> {
        if !execution.is_pending() {
            return Err(ApprovalError::not_pending());
        }
        let step = execution.current_step()?;
        Ok(ApproverResolver::at(Utc::now()).resolve_step(step, expense, directory))
    }

    fn guard<'a>(
        &self,
        execution: &'a ApprovalExecution,
        expense: &Expense,
        decisions: &'a [ApprovalDecision],
        directory: &dyn OrganizationDirectory,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<DecisionGuard<'a>, ApprovalError> {
        if !execution.is_pending() {
            return Err(ApprovalError::not_pending());
        }

        let step = execution.current_step()?;
        if let Some(existing) = decisions.iter().find(|decision| {
            decision.execution_id == execution.id
                && decision.step_id == step.id
                && &decision.approver_id == user_id
        }) {
            return Ok(DecisionGuard::Replay(existing));
        }

        let resolution = ApproverResolver::at(now).resolve_step(step, expense, directory);
        if !resolution.contains(user_id) {
            tracing::debug!(
                event_name = "approval.decision_denied",
                execution_id = %execution.id.0,
                step_id = %step.id.0,
                user_id = %user_id.0,
                eligible = resolution.users.len(),
                "user is not in the eligible set"
            );
            return Err(ApprovalError::unauthorized());
        }

        Ok(DecisionGuard::Eligible { step, resolution })
    }
}

/// Approvals on the current decision's step within the same execution.
fn approvers_for_step(
    decisions: &[ApprovalDecision],
    current: &ApprovalDecision,
) -> BTreeSet<UserId> {
    decisions
        .iter()
        .chain(std::iter::once(current))
        .filter(|decision| {
            decision.execution_id == current.execution_id
                && decision.step_id == current.step_id
                && decision.verdict == Verdict::Approved
        })
        .map(|decision| decision.approver_id.clone())
        .collect()
}

/// Require-all needs every currently eligible user; an empty eligible set
/// never satisfies it. Otherwise the minimum count applies, clamped to one.
fn quorum_reached(
    step: &WorkflowStep,
    resolution: &Resolution,
    approvers: &BTreeSet<UserId>,
) -> bool {
    if step.require_all_approvers {
        return !resolution.users.is_empty() && resolution.users.is_subset(approvers);
    }

    approvers.len() >= step.required_approvals()
}

fn finalize(execution: &mut ApprovalExecution, status: ExecutionStatus, now: DateTime<Utc>) {
    execution.status = status;
    execution.current_step_id = None;
    execution.completed_at = Some(now);
}

fn transition(
    execution: &ApprovalExecution,
    from_status: Option<ExecutionStatus>,
    from_step_id: Option<StepId>,
    reason: TransitionReason,
    actor: &UserId,
    now: DateTime<Utc>,
) -> ExecutionTransition {
    ExecutionTransition {
        id: TransitionId(Uuid::new_v4().to_string()),
        execution_id: execution.id.clone(),
        expense_id: execution.expense_id.clone(),
        from_status,
        to_status: execution.status,
        from_step_id,
        to_step_id: execution.current_step_id.clone(),
        reason,
        actor_id: actor.clone(),
        state_version: execution.state_version,
        occurred_at: now,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{
        ApprovalError, ApprovalExecutionEngine, DecisionOutcome, DecisionRequest, StartOutcome,
    };
    use crate::approvals::directory::{OrganizationSnapshot, PermissionScope};
    use crate::domain::execution::{
        ApprovalDecision, ApprovalExecution, DecisionId, ExecutionId, ExecutionStatus,
        TransitionReason, Verdict,
    };
    use crate::domain::expense::{Expense, ExpenseApprovalStatus, ExpenseId};
    use crate::domain::organization::{Membership, OrgUnit, OrgUnitId, TenantId, User, UserId};
    use crate::domain::workflow::{
        StepApproverSpec, StepId, WorkflowDefinition, WorkflowId, WorkflowStep,
    };

    fn step(id: &str, order: u32, approvers: Vec<StepApproverSpec>) -> WorkflowStep {
        WorkflowStep {
            id: StepId(id.to_string()),
            order,
            name: id.to_string(),
            require_all_approvers: false,
            min_approvers: 1,
            approvers,
        }
    }

    fn workflow(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId("wf-1".to_string()),
            tenant_id: TenantId("t-1".to_string()),
            name: "Standard".to_string(),
            active: true,
            priority: 1,
            amount_min: None,
            amount_max: None,
            conditions: Vec::new(),
            steps,
            created_at: Utc::now() - Duration::days(1),
        }
    }

    fn expense() -> Expense {
        Expense {
            id: ExpenseId("EXP-1".to_string()),
            tenant_id: TenantId("t-1".to_string()),
            total_amount: Decimal::new(4200, 2),
            created_by: Some(UserId("u-rep".to_string())),
            dimensions: Vec::new(),
            approval_status: ExpenseApprovalStatus::NotSubmitted,
        }
    }

    fn directory() -> OrganizationSnapshot {
        let mut snapshot = OrganizationSnapshot::new(PermissionScope::Tenant).with_unit(OrgUnit {
            id: OrgUnitId("ops".to_string()),
            tenant_id: TenantId("t-1".to_string()),
            name: "Operations".to_string(),
            parent_id: None,
        });
        for id in ["u-rep", "u-a", "u-b", "u-c", "u-d"] {
            snapshot.add_user(User {
                id: UserId(id.to_string()),
                tenant_id: TenantId("t-1".to_string()),
                display_name: id.to_string(),
                active: true,
            });
        }
        for (id, role) in [("u-rep", "member"), ("u-a", "lead"), ("u-b", "lead"), ("u-c", "lead")]
        {
            snapshot.add_membership(Membership {
                user_id: UserId(id.to_string()),
                unit_id: OrgUnitId("ops".to_string()),
                role: role.to_string(),
                is_primary: true,
                ends_at: None,
            });
        }
        snapshot
    }

    struct Run {
        engine: ApprovalExecutionEngine,
        directory: OrganizationSnapshot,
        expense: Expense,
        execution: ApprovalExecution,
        decisions: Vec<ApprovalDecision>,
    }

    impl Run {
        fn start(workflow: WorkflowDefinition) -> Self {
            let engine = ApprovalExecutionEngine::new();
            let mut expense = expense();
            let outcome = engine
                .start(&expense, &[workflow], &UserId("u-rep".to_string()), None)
                .expect("start");
            let StartOutcome::Started { execution, transition, expense_status } = outcome else {
                panic!("expected a started execution");
            };
            assert_eq!(transition.reason, TransitionReason::ExecutionStarted);
            expense.approval_status = expense_status;
            Self { engine, directory: directory(), expense, execution, decisions: Vec::new() }
        }

        fn decide(&mut self, request: DecisionRequest) -> Result<DecisionOutcome, ApprovalError> {
            let outcome = self.engine.process_decision(
                &self.execution,
                &self.expense,
                &self.decisions,
                &self.directory,
                &request,
            )?;
            if !outcome.replayed {
                self.decisions.push(outcome.decision.clone());
                self.execution = outcome.execution.clone();
                self.expense.approval_status = outcome.expense_status;
            }
            Ok(outcome)
        }
    }

    #[test]
    fn no_matching_workflow_auto_approves() {
        let engine = ApprovalExecutionEngine::new();
        let outcome =
            engine.start(&expense(), &[], &UserId("u-rep".to_string()), None).expect("start");
        assert_eq!(
            outcome,
            StartOutcome::AutoApproved { expense_status: ExpenseApprovalStatus::NotRequired }
        );
    }

    #[test]
    fn matched_workflow_without_steps_fails_closed() {
        let engine = ApprovalExecutionEngine::new();
        let error = engine
            .start(&expense(), &[workflow(Vec::new())], &UserId("u-rep".to_string()), None)
            .expect_err("no steps");
        assert_eq!(error.code(), "configuration");
    }

    #[test]
    fn start_snapshots_steps_and_points_at_lowest_order() {
        let run = Run::start(workflow(vec![
            step("s-2", 2, vec![StepApproverSpec::user("u-b")]),
            step("s-1", 1, vec![StepApproverSpec::user("u-a")]),
        ]));

        assert_eq!(run.execution.current_step_id, Some(StepId("s-1".to_string())));
        assert_eq!(run.execution.state_version, 1);
        assert_eq!(run.execution.steps.len(), 2);
        assert_eq!(run.execution.steps[0].order, 1);
        assert_eq!(run.expense.approval_status, ExpenseApprovalStatus::Pending);
    }

    #[test]
    fn start_returns_existing_pending_execution() {
        let run = Run::start(workflow(vec![step("s-1", 1, vec![StepApproverSpec::user("u-a")])]));
        let outcome = run
            .engine
            .start(
                &run.expense,
                &[workflow(Vec::new())],
                &UserId("u-rep".to_string()),
                Some(&run.execution),
            )
            .expect("start");
        assert_eq!(outcome, StartOutcome::AlreadyPending { execution: run.execution.clone() });
    }

    #[test]
    fn single_step_approval_completes_execution() {
        let mut run =
            Run::start(workflow(vec![step("s-1", 1, vec![StepApproverSpec::user("u-a")])]));

        let outcome = run.decide(DecisionRequest::approve("u-a")).expect("approve");
        assert!(outcome.completed());
        assert_eq!(outcome.execution.status, ExecutionStatus::Approved);
        assert!(outcome.execution.current_step_id.is_none());
        assert!(outcome.execution.completed_at.is_some());
        assert_eq!(outcome.expense_status, ExpenseApprovalStatus::Approved);
        assert_eq!(outcome.expected_version, 1);
        assert_eq!(outcome.execution.state_version, 2);
        assert_eq!(
            outcome.transition.as_ref().map(|transition| transition.reason),
            Some(TransitionReason::ExecutionApproved)
        );
    }

    #[test]
    fn single_step_rejection_rejects_expense() {
        let mut run =
            Run::start(workflow(vec![step("s-1", 1, vec![StepApproverSpec::user("u-a")])]));

        let outcome =
            run.decide(DecisionRequest::reject("u-a", "missing receipt")).expect("reject");
        assert!(outcome.execution.is_rejected());
        assert_eq!(outcome.expense_status, ExpenseApprovalStatus::Rejected);
        assert_eq!(outcome.decision.reason.as_deref(), Some("missing receipt"));
    }

    #[test]
    fn two_step_workflow_advances_before_completing() {
        let mut run = Run::start(workflow(vec![
            step("s-1", 1, vec![StepApproverSpec::user("u-a")]),
            step("s-2", 2, vec![StepApproverSpec::user("u-b")]),
        ]));

        let first = run.decide(DecisionRequest::approve("u-a")).expect("first");
        assert!(first.execution.is_pending());
        assert_eq!(first.execution.current_step_id, Some(StepId("s-2".to_string())));
        assert_eq!(
            first.transition.as_ref().map(|transition| transition.reason),
            Some(TransitionReason::StepAdvanced)
        );

        let error = run.decide(DecisionRequest::approve("u-a")).expect_err("wrong step");
        assert_eq!(error, ApprovalError::unauthorized());

        let second = run.decide(DecisionRequest::approve("u-b")).expect("second");
        assert!(second.execution.is_approved());
        assert_eq!(second.execution.state_version, 3);
    }

    #[test]
    fn two_of_three_parallel_quorum() {
        let mut parallel = step("s-1", 1, vec![StepApproverSpec::unit_role("lead")]);
        parallel.min_approvers = 2;
        let mut run = Run::start(workflow(vec![parallel]));

        let first = run.decide(DecisionRequest::approve("u-a")).expect("first");
        assert!(first.execution.is_pending());
        assert_eq!(
            first.transition.as_ref().map(|transition| transition.reason),
            Some(TransitionReason::DecisionRecorded)
        );
        assert_eq!(first.execution.state_version, 2);

        let second = run.decide(DecisionRequest::approve("u-c")).expect("second");
        assert!(second.execution.is_approved());
        assert_eq!(second.execution.state_version, 3);
    }

    #[test]
    fn require_all_waits_for_every_eligible_user() {
        let mut all = step("s-1", 1, vec![StepApproverSpec::unit_role("lead")]);
        all.require_all_approvers = true;
        let mut run = Run::start(workflow(vec![all]));

        assert!(run.decide(DecisionRequest::approve("u-a")).expect("a").execution.is_pending());
        assert!(run.decide(DecisionRequest::approve("u-b")).expect("b").execution.is_pending());
        assert!(run.decide(DecisionRequest::approve("u-c")).expect("c").execution.is_approved());
    }

    #[test]
    fn require_all_with_no_eligible_users_never_completes() {
        let mut all = step("s-1", 1, vec![StepApproverSpec::unit_role("auditor")]);
        all.require_all_approvers = true;
        let mut run = Run::start(workflow(vec![all]));

        let error = run.decide(DecisionRequest::approve("u-a")).expect_err("nobody eligible");
        assert_eq!(error, ApprovalError::unauthorized());
        assert!(run.execution.is_pending());
    }

    #[test]
    fn approvals_from_an_earlier_execution_do_not_count_toward_quorum() {
        let mut parallel = step("s-1", 1, vec![StepApproverSpec::unit_role("lead")]);
        parallel.min_approvers = 2;
        let mut run = Run::start(workflow(vec![parallel]));

        let earlier = ApprovalDecision {
            id: DecisionId("d-earlier".to_string()),
            execution_id: ExecutionId("exec-earlier".to_string()),
            step_id: StepId("s-1".to_string()),
            approver_id: UserId("u-b".to_string()),
            verdict: Verdict::Approved,
            reason: None,
            decided_at: Utc::now() - Duration::days(2),
        };
        run.decisions.push(earlier);

        let outcome = run.decide(DecisionRequest::approve("u-a")).expect("decide");
        assert_eq!(outcome.execution.status, ExecutionStatus::Pending);
        assert_eq!(
            outcome.transition.map(|transition| transition.reason),
            Some(TransitionReason::DecisionRecorded)
        );

        run.decide(DecisionRequest::approve("u-b")).expect("second approval");
        assert_eq!(run.execution.status, ExecutionStatus::Approved);
    }

    #[test]
    fn duplicate_decision_is_replayed_unchanged() {
        let mut parallel = step("s-1", 1, vec![StepApproverSpec::unit_role("lead")]);
        parallel.min_approvers = 2;
        let mut run = Run::start(workflow(vec![parallel]));

        let first = run.decide(DecisionRequest::approve("u-a")).expect("first");
        let replay = run.decide(DecisionRequest::reject("u-a", "changed my mind")).expect("replay");

        assert!(replay.replayed);
        assert!(replay.transition.is_none());
        assert_eq!(replay.decision, first.decision);
        assert_eq!(replay.execution, run.execution);
        assert_eq!(run.decisions.len(), 1);
    }

    #[test]
    fn unauthorized_user_gets_stable_message() {
        let mut run =
            Run::start(workflow(vec![step("s-1", 1, vec![StepApproverSpec::user("u-a")])]));

        let error = run.decide(DecisionRequest::approve("u-d")).expect_err("not eligible");
        assert_eq!(error.to_string(), "User is not authorized to approve this step");
        assert_eq!(error.code(), "unauthorized");
    }

    #[test]
    fn deciding_on_terminal_execution_is_invalid_state() {
        let mut run =
            Run::start(workflow(vec![step("s-1", 1, vec![StepApproverSpec::user("u-a")])]));
        run.decide(DecisionRequest::reject("u-a", "no")).expect("reject");

        let error = run.decide(DecisionRequest::approve("u-a")).expect_err("terminal");
        assert_eq!(error.to_string(), "Execution is not pending");
        assert_eq!(error.code(), "invalid_state");
    }

    #[test]
    fn can_user_decide_shares_the_decision_guards() {
        let mut parallel = step("s-1", 1, vec![StepApproverSpec::unit_role("lead")]);
        parallel.min_approvers = 2;
        let mut run = Run::start(workflow(vec![parallel]));

        let check = |run: &Run, user: &str| {
            run.engine.reason_cannot_decide(
                &run.execution,
                &run.expense,
                &run.decisions,
                &run.directory,
                &UserId(user.to_string()),
            )
        };

        assert_eq!(check(&run, "u-a"), None);
        assert_eq!(
            check(&run, "u-d").as_deref(),
            Some("User is not authorized to approve this step")
        );

        run.decide(DecisionRequest::approve("u-a")).expect("approve");
        assert_eq!(check(&run, "u-a").as_deref(), Some("User has already decided this step"));
        assert!(run.engine.can_user_decide(
            &run.execution,
            &run.expense,
            &run.decisions,
            &run.directory,
            &UserId("u-b".to_string()),
        ));
    }

    #[test]
    fn eligibility_is_recomputed_for_each_decision() {
        let mut parallel = step("s-1", 1, vec![StepApproverSpec::unit_role("lead")]);
        parallel.min_approvers = 2;
        let mut run = Run::start(workflow(vec![parallel]));
        run.decide(DecisionRequest::approve("u-a")).expect("first");

        run.directory.add_user(User {
            id: UserId("u-b".to_string()),
            tenant_id: TenantId("t-1".to_string()),
            display_name: "u-b".to_string(),
            active: false,
        });

        let error = run.decide(DecisionRequest::approve("u-b")).expect_err("deactivated");
        assert_eq!(error, ApprovalError::unauthorized());
        assert!(run.decide(DecisionRequest::approve("u-c")).expect("c").execution.is_approved());
    }
}
