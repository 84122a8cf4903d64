use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use spendgate_core::domain::execution::{
    ApprovalDecision, ApprovalExecution, DecisionId, ExecutionId, ExecutionStatus,
    ExecutionTransition, TransitionId, TransitionReason, Verdict,
};
use spendgate_core::domain::expense::ExpenseId;
use spendgate_core::domain::organization::{TenantId, UserId};
use spendgate_core::domain::workflow::{StepId, WorkflowId, WorkflowStep};

use super::{
    decode_error, parse_optional_timestamp, parse_timestamp, parse_u32, DecisionCommit,
    DecisionCommitResult, ExecutionRepository, RepositoryError, StartCommit, StartCommitResult,
};
use crate::DbPool;

const EXECUTION_COLUMNS: &str = "id, tenant_id, expense_id, workflow_id, workflow_name,
     steps_json, current_step_id, status, initiated_by, started_at, completed_at, state_version";

const DECISION_COLUMNS: &str =
    "id, execution_id, step_id, approver_id, verdict, reason, decided_at";

pub struct SqlExecutionRepository {
    pool: DbPool,
}

impl SqlExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_decision(
        &self,
        execution_id: &ExecutionId,
        step_id: &StepId,
        approver_id: &UserId,
    ) -> Result<Option<ApprovalDecision>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {DECISION_COLUMNS} FROM approval_decision
             WHERE execution_id = ? AND step_id = ? AND approver_id = ?"
        ))
        .bind(&execution_id.0)
        .bind(&step_id.0)
        .bind(&approver_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_decision).transpose()
    }
}

fn row_to_execution(row: &SqliteRow) -> Result<ApprovalExecution, RepositoryError> {
    let steps_json: String = row.try_get("steps_json").map_err(decode_error)?;
    let steps: Vec<WorkflowStep> = serde_json::from_str(&steps_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid steps_json: {error}")))?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let current_step_id: Option<String> = row.try_get("current_step_id").map_err(decode_error)?;

    Ok(ApprovalExecution {
        id: ExecutionId(row.try_get("id").map_err(decode_error)?),
        tenant_id: TenantId(row.try_get("tenant_id").map_err(decode_error)?),
        expense_id: ExpenseId(row.try_get("expense_id").map_err(decode_error)?),
        workflow_id: WorkflowId(row.try_get("workflow_id").map_err(decode_error)?),
        workflow_name: row.try_get("workflow_name").map_err(decode_error)?,
        steps,
        current_step_id: current_step_id.map(StepId),
        status: ExecutionStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown execution status `{status}`"))
        })?,
        initiated_by: UserId(row.try_get("initiated_by").map_err(decode_error)?),
        started_at: parse_timestamp(
            "started_at",
            row.try_get("started_at").map_err(decode_error)?,
        )?,
        completed_at: parse_optional_timestamp(
            "completed_at",
            row.try_get("completed_at").map_err(decode_error)?,
        )?,
        state_version: parse_u32(
            "state_version",
            row.try_get("state_version").map_err(decode_error)?,
        )?,
    })
}

fn row_to_decision(row: &SqliteRow) -> Result<ApprovalDecision, RepositoryError> {
    let verdict: String = row.try_get("verdict").map_err(decode_error)?;
    Ok(ApprovalDecision {
        id: DecisionId(row.try_get("id").map_err(decode_error)?),
        execution_id: ExecutionId(row.try_get("execution_id").map_err(decode_error)?),
        step_id: StepId(row.try_get("step_id").map_err(decode_error)?),
        approver_id: UserId(row.try_get("approver_id").map_err(decode_error)?),
        verdict: Verdict::parse(&verdict)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown verdict `{verdict}`")))?,
        reason: row.try_get("reason").map_err(decode_error)?,
        decided_at: parse_timestamp(
            "decided_at",
            row.try_get("decided_at").map_err(decode_error)?,
        )?,
    })
}

fn row_to_transition(row: &SqliteRow) -> Result<ExecutionTransition, RepositoryError> {
    let parse_status = |column: &str, value: String| {
        ExecutionStatus::parse(&value).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown status `{value}` in `{column}`"))
        })
    };
    let from_status: Option<String> = row.try_get("from_status").map_err(decode_error)?;
    let to_status: String = row.try_get("to_status").map_err(decode_error)?;
    let reason: String = row.try_get("reason").map_err(decode_error)?;
    let from_step_id: Option<String> = row.try_get("from_step_id").map_err(decode_error)?;
    let to_step_id: Option<String> = row.try_get("to_step_id").map_err(decode_error)?;

    Ok(ExecutionTransition {
        id: TransitionId(row.try_get("id").map_err(decode_error)?),
        execution_id: ExecutionId(row.try_get("execution_id").map_err(decode_error)?),
        expense_id: ExpenseId(row.try_get("expense_id").map_err(decode_error)?),
        from_status: from_status.map(|value| parse_status("from_status", value)).transpose()?,
        to_status: parse_status("to_status", to_status)?,
        from_step_id: from_step_id.map(StepId),
        to_step_id: to_step_id.map(StepId),
        reason: TransitionReason::parse(&reason).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown transition reason `{reason}`"))
        })?,
        actor_id: UserId(row.try_get("actor_id").map_err(decode_error)?),
        state_version: parse_u32(
            "state_version",
            row.try_get("state_version").map_err(decode_error)?,
        )?,
        occurred_at: parse_timestamp(
            "occurred_at",
            row.try_get("occurred_at").map_err(decode_error)?,
        )?,
    })
}

async fn insert_transition(
    tx: &mut sqlx::SqliteConnection,
    transition: &ExecutionTransition,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_execution_transition
            (id, execution_id, expense_id, from_status, to_status, from_step_id, to_step_id,
             reason, actor_id, state_version, occurred_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&transition.id.0)
    .bind(&transition.execution_id.0)
    .bind(&transition.expense_id.0)
    .bind(transition.from_status.map(|status| status.as_str()))
    .bind(transition.to_status.as_str())
    .bind(transition.from_step_id.as_ref().map(|step| step.0.as_str()))
    .bind(transition.to_step_id.as_ref().map(|step| step.0.as_str()))
    .bind(transition.reason.as_str())
    .bind(&transition.actor_id.0)
    .bind(i64::from(transition.state_version))
    .bind(transition.occurred_at.to_rfc3339())
    .execute(&mut *tx)
    .await?;
    Ok(())
}

#[async_trait::async_trait]
impl ExecutionRepository for SqlExecutionRepository {
    async fn find_by_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ApprovalExecution>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {EXECUTION_COLUMNS} FROM approval_execution WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_execution).transpose()
    }

    async fn find_pending_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Option<ApprovalExecution>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM approval_execution
             WHERE expense_id = ? AND status = 'pending'"
        ))
        .bind(&expense_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_execution).transpose()
    }

    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalExecution>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM approval_execution
             WHERE expense_id = ? ORDER BY started_at ASC, id ASC"
        ))
        .bind(&expense_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_execution).collect()
    }

    async fn list_decisions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ApprovalDecision>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DECISION_COLUMNS} FROM approval_decision
             WHERE execution_id = ? ORDER BY decided_at ASC, id ASC"
        ))
        .bind(&execution_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_decision).collect()
    }

    async fn list_transitions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<ExecutionTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, execution_id, expense_id, from_status, to_status, from_step_id,
                    to_step_id, reason, actor_id, state_version, occurred_at
             FROM approval_execution_transition
             WHERE execution_id = ? ORDER BY state_version ASC",
        )
        .bind(&execution_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transition).collect()
    }

    async fn commit_start(
        &self,
        commit: StartCommit,
    ) -> Result<StartCommitResult, RepositoryError> {
        let StartCommit { execution, transition, expense_status } = commit;
        let steps_json = serde_json::to_string(&execution.steps)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO approval_execution
                (id, tenant_id, expense_id, workflow_id, workflow_name, steps_json,
                 current_step_id, status, initiated_by, started_at, completed_at, state_version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&execution.id.0)
        .bind(&execution.tenant_id.0)
        .bind(&execution.expense_id.0)
        .bind(&execution.workflow_id.0)
        .bind(&execution.workflow_name)
        .bind(&steps_json)
        .bind(execution.current_step_id.as_ref().map(|step| step.0.as_str()))
        .bind(execution.status.as_str())
        .bind(&execution.initiated_by.0)
        .bind(execution.started_at.to_rfc3339())
        .bind(execution.completed_at.map(|completed_at| completed_at.to_rfc3339()))
        .bind(i64::from(execution.state_version))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from);

        if let Err(error) = inserted {
            if !error.is_unique_violation() {
                return Err(error);
            }
            tx.rollback().await?;
            return match self.find_pending_for_expense(&execution.expense_id).await? {
                Some(existing) => Ok(StartCommitResult::AlreadyPending(existing)),
                None => Err(RepositoryError::Conflict(format!(
                    "execution for expense `{}` conflicted but no pending run was found",
                    execution.expense_id.0
                ))),
            };
        }

        sqlx::query("UPDATE expense SET approval_status = ?, updated_at = ? WHERE id = ?")
            .bind(expense_status.as_str())
            .bind(execution.started_at.to_rfc3339())
            .bind(&execution.expense_id.0)
            .execute(&mut *tx)
            .await?;
        insert_transition(&mut *tx, &transition).await?;
        tx.commit().await?;

        Ok(StartCommitResult::Committed)
    }

    async fn commit_decision(
        &self,
        commit: DecisionCommit,
    ) -> Result<DecisionCommitResult, RepositoryError> {
        let DecisionCommit {
            decision,
            execution,
            expected_version,
            transition,
            expense_status,
            committed_at,
        } = commit;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO approval_decision
                (id, execution_id, step_id, approver_id, verdict, reason, decided_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(execution_id, step_id, approver_id) DO NOTHING",
        )
        .bind(&decision.id.0)
        .bind(&decision.execution_id.0)
        .bind(&decision.step_id.0)
        .bind(&decision.approver_id.0)
        .bind(decision.verdict.as_str())
        .bind(&decision.reason)
        .bind(decision.decided_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            let existing = self
                .find_decision(&decision.execution_id, &decision.step_id, &decision.approver_id)
                .await?
                .ok_or_else(|| {
                    RepositoryError::Conflict(format!(
                        "decision for `{}` on step `{}` conflicted but was not found",
                        decision.approver_id.0, decision.step_id.0
                    ))
                })?;
            return Ok(DecisionCommitResult::Duplicate(existing));
        }

        let swapped = sqlx::query(
            "UPDATE approval_execution
             SET current_step_id = ?, status = ?, completed_at = ?, state_version = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(execution.current_step_id.as_ref().map(|step| step.0.as_str()))
        .bind(execution.status.as_str())
        .bind(execution.completed_at.map(|completed_at| completed_at.to_rfc3339()))
        .bind(i64::from(execution.state_version))
        .bind(&execution.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if swapped.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::debug!(
                event_name = "db.execution_version_conflict",
                execution_id = %execution.id.0,
                expected_version,
                "execution moved on; decision commit rolled back"
            );
            return Ok(DecisionCommitResult::StaleVersion);
        }

        sqlx::query("UPDATE expense SET approval_status = ?, updated_at = ? WHERE id = ?")
            .bind(expense_status.as_str())
            .bind(committed_at.to_rfc3339())
            .bind(&execution.expense_id.0)
            .execute(&mut *tx)
            .await?;
        insert_transition(&mut *tx, &transition).await?;
        tx.commit().await?;

        Ok(DecisionCommitResult::Committed)
    }
}
