use thiserror::Error;

use crate::{approvals::ApprovalError, domain::expense::ExpenseApprovalStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid expense approval transition from {from:?} to {to:?}")]
    InvalidExpenseTransition { from: ExpenseApprovalStatus, to: ExpenseApprovalStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("concurrent update conflict: {0}")]
    Concurrency(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record was changed by someone else. Reload and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::InvalidExpenseTransition { .. }) => {
                Self::BadRequest {
                    message: "domain validation failed".to_owned(),
                    correlation_id: unassigned(),
                }
            }
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
            ApplicationError::Approval(error) => match error {
                ApprovalError::InvalidState(message) => {
                    Self::BadRequest { message, correlation_id: unassigned() }
                }
                ApprovalError::Unauthorized(message) => {
                    Self::Forbidden { message, correlation_id: unassigned() }
                }
                ApprovalError::Configuration(message) => {
                    Self::Internal { message, correlation_id: unassigned() }
                }
                ApprovalError::Domain(domain) => {
                    Self::from(ApplicationError::Domain(domain))
                }
            },
            ApplicationError::NotFound { entity, id } => Self::NotFound {
                message: format!("{entity} `{id}` not found"),
                correlation_id: unassigned(),
            },
            ApplicationError::Concurrency(message) => {
                Self::Conflict { message, correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::approvals::ApprovalError;
    use crate::domain::expense::ExpenseApprovalStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn invalid_expense_transition_maps_to_bad_request() {
        let interface = ApplicationError::from(DomainError::InvalidExpenseTransition {
            from: ExpenseApprovalStatus::Approved,
            to: ExpenseApprovalStatus::Pending,
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn unauthorized_decision_maps_to_forbidden() {
        let interface =
            ApplicationError::from(ApprovalError::unauthorized()).into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Forbidden { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn decision_on_terminal_execution_maps_to_bad_request() {
        let interface =
            ApplicationError::from(ApprovalError::not_pending()).into_interface("req-3");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref message, .. } if message == "Execution is not pending"
        ));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn exhausted_commit_retries_map_to_conflict() {
        let interface = ApplicationError::Concurrency("execution exec-1 changed".to_owned())
            .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn invariant_violation_is_internal() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "terminal execution with current step".to_owned(),
        ))
        .into_interface("req-6");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
