use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::organization::{TenantId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

/// Classification axis carried by expense allocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionType {
    Project,
    CostCenter,
    Department,
    Category,
    Location,
    Customer,
}

impl DimensionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::CostCenter => "cost_center",
            Self::Department => "department",
            Self::Category => "category",
            Self::Location => "location",
            Self::Customer => "customer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "project" => Some(Self::Project),
            "cost_center" => Some(Self::CostCenter),
            "department" => Some(Self::Department),
            "category" => Some(Self::Category),
            "location" => Some(Self::Location),
            "customer" => Some(Self::Customer),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRef {
    pub dimension_type: DimensionType,
    pub dimension_id: String,
}

impl DimensionRef {
    pub fn new(dimension_type: DimensionType, dimension_id: impl Into<String>) -> Self {
        Self { dimension_type, dimension_id: dimension_id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseApprovalStatus {
    NotSubmitted,
    Pending,
    Approved,
    Rejected,
    NotRequired,
}

impl ExpenseApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSubmitted => "not_submitted",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NotRequired => "not_required",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "not_submitted" => Some(Self::NotSubmitted),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "not_required" => Some(Self::NotRequired),
            _ => None,
        }
    }

    /// Auto-approved expenses count as approved for downstream consumers.
    pub fn is_effectively_approved(&self) -> bool {
        matches!(self, Self::Approved | Self::NotRequired)
    }
}

/// Read model of an expense as seen by the approval engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub tenant_id: TenantId,
    pub total_amount: Decimal,
    pub created_by: Option<UserId>,
    pub dimensions: Vec<DimensionRef>,
    pub approval_status: ExpenseApprovalStatus,
}

impl Expense {
    /// Deduplicated dimension ids of one type across all allocations.
    pub fn dimension_values(&self, dimension_type: DimensionType) -> BTreeSet<String> {
        self.dimensions
            .iter()
            .filter(|dimension| dimension.dimension_type == dimension_type)
            .map(|dimension| dimension.dimension_id.clone())
            .collect()
    }

    pub fn can_transition_to(&self, next: ExpenseApprovalStatus) -> bool {
        use ExpenseApprovalStatus::*;

        matches!(
            (self.approval_status, next),
            (NotSubmitted, Pending)
                | (NotSubmitted, NotRequired)
                | (Rejected, Pending)
                | (Rejected, NotRequired)
                | (Pending, Approved)
                | (Pending, Rejected)
        )
    }

    pub fn transition_to(&mut self, next: ExpenseApprovalStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.approval_status = next;
            return Ok(());
        }

        Err(DomainError::InvalidExpenseTransition { from: self.approval_status, to: next })
    }
}
