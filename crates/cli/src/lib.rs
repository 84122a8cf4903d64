pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use spendgate_core::config::{AppConfig, LoadOptions};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "spendgate",
    about = "Spendgate expense approval operator CLI",
    long_about = "Operate the Spendgate approval engine: migrations, config inspection, readiness checks, demo data and workflow match previews.",
    after_help = "Examples:\n  spendgate doctor --json\n  spendgate seed\n  spendgate preview --expense EXP-DEMO-002"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo tenant (organization, workflows, expenses)")]
    Seed,
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, and schema migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Show which workflow an expense would start, without starting it")]
    Preview {
        #[arg(long, value_name = "EXPENSE_ID", help = "Expense to evaluate")]
        expense: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Commands report their own config failures; logging falls back to defaults.
    let config = AppConfig::load(LoadOptions::default()).unwrap_or_default();
    if let Err(error) = logging::init(&config.logging) {
        eprintln!("logging disabled: {error:#}");
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Preview { expense } => commands::preview::run(&expense),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
