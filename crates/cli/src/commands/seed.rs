use crate::commands::{load_config, runtime, CommandResult};
use spendgate_db::{
    connect_with_config, migrations, DemoDataset, SeedSummary, SqlExpenseRepository,
    SqlOrganizationRepository, SqlWorkflowRepository,
};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let summary = DemoDataset::load(
            &SqlWorkflowRepository::new(pool.clone()),
            &SqlExpenseRepository::new(pool.clone()),
            &SqlOrganizationRepository::new(pool.clone()),
        )
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<SeedSummary, (&'static str, String, u8)>(summary)
    });

    match result {
        Ok(summary) => {
            CommandResult::success_with_data("seed", render_summary(&summary), &summary)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn render_summary(summary: &SeedSummary) -> String {
    let mut lines = vec![format!(
        "demo tenant `{}` seeded: {} units, {} users, {} memberships",
        summary.tenant_id, summary.units, summary.users, summary.memberships
    )];
    lines.extend(summary.workflows.iter().map(|workflow| format!("  - workflow: {workflow}")));
    lines.extend(summary.expenses.iter().map(|expense| {
        let state = if summary.expenses_skipped.contains(expense) {
            "already present"
        } else {
            "created"
        };
        format!("  - expense: {expense} ({state})")
    }));
    lines.join("\n")
}
