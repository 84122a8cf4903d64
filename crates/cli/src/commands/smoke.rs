use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use spendgate_core::approvals::{DecisionRequest, StartOutcome};
use spendgate_core::config::{AppConfig, LoadOptions};
use spendgate_core::domain::expense::{ExpenseApprovalStatus, ExpenseId};
use spendgate_core::domain::organization::UserId;
use spendgate_db::{
    connect_with_config, migrations, ApprovalWorkflowService, DemoDataset, InMemoryApprovalStore,
    ServiceSettings,
};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("approval_roundtrip"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("approval_roundtrip"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let db_started = Instant::now();
    match runtime.block_on(connect_with_config(&config.database)) {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: elapsed_since(db_started),
                message: format!("connected using `{}`", config.database.url),
            });

            let migration_started = Instant::now();
            let migration_result = runtime.block_on(migrations::run_pending(&pool));
            runtime.block_on(pool.close());
            checks.push(match migration_result {
                Ok(()) => SmokeCheck {
                    name: "migration_visibility",
                    status: SmokeStatus::Pass,
                    elapsed_ms: elapsed_since(migration_started),
                    message: "migrations are visible and executable".to_string(),
                },
                Err(error) => SmokeCheck {
                    name: "migration_visibility",
                    status: SmokeStatus::Fail,
                    elapsed_ms: elapsed_since(migration_started),
                    message: format!("migration execution failed: {error}"),
                },
            });
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed_since(db_started),
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
        }
    }

    let roundtrip_started = Instant::now();
    let settings = ServiceSettings::from(&config.approvals);
    let roundtrip = runtime.block_on(approval_roundtrip(settings));
    checks.push(SmokeCheck {
        name: "approval_roundtrip",
        status: if roundtrip.is_ok() { SmokeStatus::Pass } else { SmokeStatus::Fail },
        elapsed_ms: elapsed_since(roundtrip_started),
        message: match roundtrip {
            Ok(message) | Err(message) => message,
        },
    });

    finalize_report(checks, elapsed_since(started))
}

/// Drives the demo travel expense from submission to approval against an
/// in-memory store, so the engine is exercised without touching the database.
async fn approval_roundtrip(settings: ServiceSettings) -> Result<String, String> {
    let store = Arc::new(InMemoryApprovalStore::new());
    DemoDataset::load(store.as_ref(), store.as_ref(), store.as_ref())
        .await
        .map_err(|error| format!("demo dataset failed to load: {error}"))?;
    let service = ApprovalWorkflowService::in_memory(store, settings);

    let expense_id = ExpenseId("EXP-DEMO-002".to_string());
    let submitter = UserId("u-demo-eng-dev".to_string());
    let execution = match service
        .start_approval(&expense_id, &submitter, "cli-smoke")
        .await
        .map_err(|error| format!("start failed: {error}"))?
    {
        StartOutcome::Started { execution, .. } => execution,
        other => return Err(format!("expected a new execution, got {other:?}")),
    };

    let outcome = service
        .submit_decision(&execution.id, DecisionRequest::approve("u-demo-eng-lead"), "cli-smoke")
        .await
        .map_err(|error| format!("decision failed: {error}"))?;

    if outcome.expense_status != ExpenseApprovalStatus::Approved {
        return Err(format!(
            "expected the demo expense to end approved, found `{}`",
            outcome.expense_status.as_str()
        ));
    }

    Ok(format!(
        "workflow `{}` approved `{}` in {} state versions",
        execution.workflow_id.0, expense_id.0, outcome.execution.state_version
    ))
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
