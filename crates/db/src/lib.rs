pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{DemoDataset, SeedSummary};
pub use repositories::{
    DecisionCommit, DecisionCommitResult, ExecutionRepository, ExpenseRepository,
    InMemoryApprovalStore, OrganizationRepository, RepositoryError, SqlExecutionRepository,
    SqlExpenseRepository, SqlOrganizationRepository, SqlWorkflowRepository, StartCommit,
    StartCommitResult, WorkflowRepository,
};
pub use service::{ApprovalWorkflowService, ServiceSettings};
