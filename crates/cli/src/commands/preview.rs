use spendgate_core::approvals::MatchReport;
use spendgate_core::domain::expense::ExpenseId;
use spendgate_core::errors::{ApplicationError, InterfaceError};
use spendgate_db::{connect_with_config, ApprovalWorkflowService, ServiceSettings};

use crate::commands::{load_config, runtime, CommandResult};

const CORRELATION_ID: &str = "cli-preview";

/// Prints which workflow an expense would start, with the per-workflow
/// amount and condition checks behind the choice. Nothing is written.
pub fn run(expense_id: &str) -> CommandResult {
    let config = match load_config("preview") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("preview") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let service =
            ApprovalWorkflowService::sqlite(pool.clone(), ServiceSettings::from(&config.approvals));

        let report = service
            .preview(&ExpenseId(expense_id.to_string()))
            .await
            .map_err(classify);
        pool.close().await;
        report
    });

    match result {
        Ok(report) => CommandResult::success_with_data("preview", summarize(&report), &report),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("preview", error_class, message, exit_code)
        }
    }
}

fn summarize(report: &MatchReport) -> String {
    match &report.selected_workflow_id {
        Some(workflow_id) => format!(
            "expense `{}` ({}) would start workflow `{}` ({} candidate(s) evaluated)",
            report.expense_id.0,
            report.amount,
            workflow_id.0,
            report.workflows.len()
        ),
        None => format!(
            "expense `{}` ({}) matches no workflow; approval not required",
            report.expense_id.0, report.amount
        ),
    }
}

fn classify(error: ApplicationError) -> (&'static str, String, u8) {
    let detail = error.to_string();
    match error.into_interface(CORRELATION_ID) {
        InterfaceError::NotFound { .. } => ("not_found", detail, 7),
        InterfaceError::ServiceUnavailable { .. } => ("persistence", detail, 5),
        _ => ("preview", detail, 1),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use spendgate_core::approvals::MatchReport;
    use spendgate_core::domain::expense::ExpenseId;
    use spendgate_core::domain::organization::TenantId;
    use spendgate_core::domain::workflow::WorkflowId;
    use spendgate_core::errors::ApplicationError;

    use super::{classify, summarize};

    fn report(selected: Option<&str>) -> MatchReport {
        MatchReport {
            tenant_id: TenantId("demo".to_string()),
            expense_id: ExpenseId("EXP-1".to_string()),
            amount: Decimal::new(4250, 2),
            selected_workflow_id: selected.map(|id| WorkflowId(id.to_string())),
            workflows: Vec::new(),
        }
    }

    #[test]
    fn summary_names_the_selected_workflow_or_auto_approval() {
        assert_eq!(
            summarize(&report(Some("wf-travel"))),
            "expense `EXP-1` (42.50) would start workflow `wf-travel` (0 candidate(s) evaluated)"
        );
        assert_eq!(
            summarize(&report(None)),
            "expense `EXP-1` (42.50) matches no workflow; approval not required"
        );
    }

    #[test]
    fn missing_expenses_get_their_own_exit_code() {
        let (class, message, code) =
            classify(ApplicationError::NotFound { entity: "expense", id: "EXP-9".to_string() });

        assert_eq!(class, "not_found");
        assert_eq!(message, "expense `EXP-9` not found");
        assert_eq!(code, 7);
    }
}
