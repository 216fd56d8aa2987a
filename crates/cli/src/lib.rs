pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "insight",
    about = "Insight operator CLI",
    long_about = "Operate customer purchase-history sync, cached analysis refresh, migrations, and config inspection.",
    after_help = "Examples:\n  insight migrate\n  insight seed\n  insight sync\n  insight analyze 1 --force\n  insight doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo order set into the order tables")]
    Seed,
    #[command(about = "Merge every stored order into customer profiles and list the result")]
    Sync,
    #[command(about = "Return a customer's analysis, refreshing it when stale")]
    Analyze {
        #[arg(help = "Customer profile id as listed by `insight sync`")]
        customer_id: i64,
        #[arg(long, help = "Refresh even when the cached analysis is still fresh")]
        force: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity, schema, and LLM settings")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

/// Diagnostics go to stderr so stdout stays a single JSON outcome.
fn init_logging() {
    let filter = EnvFilter::try_from_env("INSIGHT_CLI_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .compact()
        .try_init();
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Sync => commands::sync::run(),
        Command::Analyze { customer_id, force } => commands::analyze::run(customer_id, force),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    tracing::debug!(
        event_name = "cli.command.completed",
        exit_code = result.exit_code,
        "command finished"
    );
    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
