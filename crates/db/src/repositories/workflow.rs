use std::collections::HashMap;

use sqlx::Row;

use spendgate_core::domain::expense::DimensionType;
use spendgate_core::domain::organization::{OrgUnitId, TenantId};
use spendgate_core::domain::workflow::{
    ApproverKind, ConditionOperand, ConditionOperator, MatchCondition, StepApproverSpec, StepId,
    WorkflowDefinition, WorkflowId, WorkflowStep,
};

use super::{
    decode_error, parse_decimal, parse_timestamp, parse_u32, RepositoryError, WorkflowRepository,
};
use crate::DbPool;

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_where(
        &self,
        filter: WorkflowFilter<'_>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let (clause, key) = match filter {
            WorkflowFilter::ActiveInTenant(tenant_id) => {
                ("w.tenant_id = ? AND w.active = 1", tenant_id)
            }
            WorkflowFilter::Id(id) => ("w.id = ?", id),
        };

        let workflow_rows = sqlx::query(&format!(
            "SELECT w.id, w.tenant_id, w.name, w.active, w.priority, w.amount_min, w.amount_max,
                    w.created_at
             FROM approval_workflow w
             WHERE {clause}
             ORDER BY w.priority DESC, w.created_at ASC, w.id ASC"
        ))
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        let mut conditions: HashMap<String, Vec<MatchCondition>> = HashMap::new();
        let condition_rows = sqlx::query(&format!(
            "SELECT c.workflow_id, c.dimension_type, c.operator, c.operand_json
             FROM approval_workflow_condition c
             JOIN approval_workflow w ON w.id = c.workflow_id
             WHERE {clause}
             ORDER BY c.workflow_id ASC, c.position ASC"
        ))
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        for row in &condition_rows {
            let workflow_id: String = row.try_get("workflow_id").map_err(decode_error)?;
            conditions.entry(workflow_id).or_default().push(row_to_condition(row)?);
        }

        let mut approvers: HashMap<String, Vec<StepApproverSpec>> = HashMap::new();
        let approver_rows = sqlx::query(&format!(
            "SELECT a.step_id, a.approver_type, a.approver_value, a.org_unit_id, a.can_delegate
             FROM approval_step_approver a
             JOIN approval_workflow_step s ON s.id = a.step_id
             JOIN approval_workflow w ON w.id = s.workflow_id
             WHERE {clause}
             ORDER BY a.step_id ASC, a.position ASC"
        ))
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        for row in &approver_rows {
            let step_id: String = row.try_get("step_id").map_err(decode_error)?;
            approvers.entry(step_id).or_default().push(row_to_approver(row)?);
        }

        let mut steps: HashMap<String, Vec<WorkflowStep>> = HashMap::new();
        let step_rows = sqlx::query(&format!(
            "SELECT s.id, s.workflow_id, s.step_order, s.name, s.require_all_approvers,
                    s.min_approvers
             FROM approval_workflow_step s
             JOIN approval_workflow w ON w.id = s.workflow_id
             WHERE {clause}
             ORDER BY s.workflow_id ASC, s.step_order ASC"
        ))
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        for row in &step_rows {
            let id: String = row.try_get("id").map_err(decode_error)?;
            let workflow_id: String = row.try_get("workflow_id").map_err(decode_error)?;
            let step = WorkflowStep {
                order: parse_u32("step_order", row.try_get("step_order").map_err(decode_error)?)?,
                name: row.try_get("name").map_err(decode_error)?,
                require_all_approvers: row
                    .try_get::<i64, _>("require_all_approvers")
                    .map_err(decode_error)?
                    != 0,
                min_approvers: parse_u32(
                    "min_approvers",
                    row.try_get("min_approvers").map_err(decode_error)?,
                )?,
                approvers: approvers.remove(&id).unwrap_or_default(),
                id: StepId(id),
            };
            steps.entry(workflow_id).or_default().push(step);
        }

        let mut workflows = Vec::with_capacity(workflow_rows.len());
        for row in &workflow_rows {
            let id: String = row.try_get("id").map_err(decode_error)?;
            let amount_min: Option<String> = row.try_get("amount_min").map_err(decode_error)?;
            let amount_max: Option<String> = row.try_get("amount_max").map_err(decode_error)?;
            let priority: i64 = row.try_get("priority").map_err(decode_error)?;
            workflows.push(WorkflowDefinition {
                tenant_id: TenantId(row.try_get("tenant_id").map_err(decode_error)?),
                name: row.try_get("name").map_err(decode_error)?,
                active: row.try_get::<i64, _>("active").map_err(decode_error)? != 0,
                priority: i32::try_from(priority).map_err(|_| {
                    RepositoryError::Decode(format!("priority out of range: {priority}"))
                })?,
                amount_min: amount_min
                    .as_deref()
                    .map(|value| parse_decimal("amount_min", value))
                    .transpose()?,
                amount_max: amount_max
                    .as_deref()
                    .map(|value| parse_decimal("amount_max", value))
                    .transpose()?,
                conditions: conditions.remove(&id).unwrap_or_default(),
                steps: steps.remove(&id).unwrap_or_default(),
                created_at: parse_timestamp(
                    "created_at",
                    row.try_get("created_at").map_err(decode_error)?,
                )?,
                id: WorkflowId(id),
            });
        }

        workflows.sort_by(WorkflowDefinition::precedence);
        Ok(workflows)
    }
}

enum WorkflowFilter<'a> {
    ActiveInTenant(&'a str),
    Id(&'a str),
}

fn row_to_condition(row: &sqlx::sqlite::SqliteRow) -> Result<MatchCondition, RepositoryError> {
    let dimension_type: Option<String> = row.try_get("dimension_type").map_err(decode_error)?;
    let operator: String = row.try_get("operator").map_err(decode_error)?;
    let operand_json: String = row.try_get("operand_json").map_err(decode_error)?;
    let operand: ConditionOperand = serde_json::from_str(&operand_json).map_err(|error| {
        RepositoryError::Decode(format!("invalid operand_json `{operand_json}`: {error}"))
    })?;

    // Unknown dimension types load as missing so the matcher can report them.
    Ok(MatchCondition {
        dimension_type: dimension_type.as_deref().and_then(DimensionType::parse),
        operator: ConditionOperator::parse(&operator),
        operand,
    })
}

fn row_to_approver(row: &sqlx::sqlite::SqliteRow) -> Result<StepApproverSpec, RepositoryError> {
    let approver_type: String = row.try_get("approver_type").map_err(decode_error)?;
    let approver_value: String = row.try_get("approver_value").map_err(decode_error)?;
    let org_unit_id: Option<String> = row.try_get("org_unit_id").map_err(decode_error)?;

    let approver = ApproverKind::from_parts(&approver_type, approver_value).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown approver_type `{approver_type}`"))
    })?;

    Ok(StepApproverSpec {
        approver,
        org_unit_id: org_unit_id.map(OrgUnitId),
        can_delegate: row.try_get::<i64, _>("can_delegate").map_err(decode_error)? != 0,
    })
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn list_active_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        self.load_where(WorkflowFilter::ActiveInTenant(&tenant_id.0)).await
    }

    async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.load_where(WorkflowFilter::Id(&id.0)).await?.into_iter().next())
    }

    async fn save(&self, workflow: WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_workflow (id, tenant_id, name, active, priority, amount_min,
                                            amount_max, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 active = excluded.active,
                 priority = excluded.priority,
                 amount_min = excluded.amount_min,
                 amount_max = excluded.amount_max",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.tenant_id.0)
        .bind(&workflow.name)
        .bind(workflow.active)
        .bind(workflow.priority)
        .bind(workflow.amount_min.map(|amount| amount.to_string()))
        .bind(workflow.amount_max.map(|amount| amount.to_string()))
        .bind(workflow.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM approval_workflow_condition WHERE workflow_id = ?")
            .bind(&workflow.id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM approval_workflow_step WHERE workflow_id = ?")
            .bind(&workflow.id.0)
            .execute(&mut *tx)
            .await?;

        for (position, condition) in workflow.conditions.iter().enumerate() {
            let operand_json = serde_json::to_string(&condition.operand)
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            sqlx::query(
                "INSERT INTO approval_workflow_condition
                    (workflow_id, position, dimension_type, operator, operand_json)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&workflow.id.0)
            .bind(position as i64)
            .bind(condition.dimension_type.map(|dimension| dimension.as_str()))
            .bind(condition.operator.as_str())
            .bind(operand_json)
            .execute(&mut *tx)
            .await?;
        }

        for step in &workflow.steps {
            sqlx::query(
                "INSERT INTO approval_workflow_step
                    (id, workflow_id, step_order, name, require_all_approvers, min_approvers)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(&workflow.id.0)
            .bind(i64::from(step.order))
            .bind(&step.name)
            .bind(step.require_all_approvers)
            .bind(i64::from(step.min_approvers))
            .execute(&mut *tx)
            .await?;

            for (position, spec) in step.approvers.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO approval_step_approver
                        (step_id, position, approver_type, approver_value, org_unit_id,
                         can_delegate)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&step.id.0)
                .bind(position as i64)
                .bind(spec.approver.type_str())
                .bind(spec.approver.value())
                .bind(spec.org_unit_id.as_ref().map(|unit| unit.0.as_str()))
                .bind(spec.can_delegate)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        tracing::debug!(
            event_name = "db.workflow_saved",
            tenant_id = %workflow.tenant_id.0,
            workflow_id = %workflow.id.0,
            steps = workflow.steps.len(),
            conditions = workflow.conditions.len(),
            "approval workflow saved"
        );
        Ok(())
    }
}
