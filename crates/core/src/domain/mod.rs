pub mod execution;
pub mod expense;
pub mod organization;
pub mod workflow;
