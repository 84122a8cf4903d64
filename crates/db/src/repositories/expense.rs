use chrono::Utc;
use sqlx::Row;

use spendgate_core::domain::expense::{
    DimensionRef, DimensionType, Expense, ExpenseApprovalStatus, ExpenseId,
};
use spendgate_core::domain::organization::{TenantId, UserId};

use super::{decode_error, parse_decimal, ExpenseRepository, RepositoryError};
use crate::DbPool;

pub struct SqlExpenseRepository {
    pool: DbPool,
}

impl SqlExpenseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_status(value: &str) -> Result<ExpenseApprovalStatus, RepositoryError> {
    ExpenseApprovalStatus::parse(value).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown expense approval status `{value}`"))
    })
}

#[async_trait::async_trait]
impl ExpenseRepository for SqlExpenseRepository {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let Some(row) = sqlx::query(
            "SELECT id, tenant_id, total_amount, created_by, approval_status
             FROM expense WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let total_amount: String = row.try_get("total_amount").map_err(decode_error)?;
        let status: String = row.try_get("approval_status").map_err(decode_error)?;
        let created_by: Option<String> = row.try_get("created_by").map_err(decode_error)?;

        let dimension_rows = sqlx::query(
            "SELECT dimension_type, dimension_id
             FROM expense_dimension WHERE expense_id = ? ORDER BY id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut dimensions = Vec::with_capacity(dimension_rows.len());
        for dimension_row in &dimension_rows {
            let dimension_type: String =
                dimension_row.try_get("dimension_type").map_err(decode_error)?;
            let dimension_type = DimensionType::parse(&dimension_type).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown dimension type `{dimension_type}`"))
            })?;
            let dimension_id: String =
                dimension_row.try_get("dimension_id").map_err(decode_error)?;
            dimensions.push(DimensionRef::new(dimension_type, dimension_id));
        }

        Ok(Some(Expense {
            id: ExpenseId(row.try_get("id").map_err(decode_error)?),
            tenant_id: TenantId(row.try_get("tenant_id").map_err(decode_error)?),
            total_amount: parse_decimal("total_amount", &total_amount)?,
            created_by: created_by.map(UserId),
            dimensions,
            approval_status: parse_status(&status)?,
        }))
    }

    async fn save(&self, expense: Expense) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO expense (id, tenant_id, total_amount, created_by, approval_status,
                                  created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 total_amount = excluded.total_amount,
                 created_by = excluded.created_by,
                 approval_status = excluded.approval_status,
                 updated_at = excluded.updated_at",
        )
        .bind(&expense.id.0)
        .bind(&expense.tenant_id.0)
        .bind(expense.total_amount.to_string())
        .bind(expense.created_by.as_ref().map(|user| user.0.as_str()))
        .bind(expense.approval_status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM expense_dimension WHERE expense_id = ?")
            .bind(&expense.id.0)
            .execute(&mut *tx)
            .await?;

        for dimension in &expense.dimensions {
            sqlx::query(
                "INSERT INTO expense_dimension (expense_id, dimension_type, dimension_id)
                 VALUES (?, ?, ?)",
            )
            .bind(&expense.id.0)
            .bind(dimension.dimension_type.as_str())
            .bind(&dimension.dimension_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: &ExpenseId,
        status: ExpenseApprovalStatus,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE expense SET approval_status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(Utc::now().to_rfc3339())
                .bind(&id.0)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Decode(format!("expense `{}` does not exist", id.0)));
        }
        Ok(())
    }
}
