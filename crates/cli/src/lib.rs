pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use permitflow_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};

#[derive(Debug, Parser)]
#[command(
    name = "permitflow",
    about = "PermitFlow operator CLI",
    long_about = "Operate PermitFlow migrations, seed data, config inspection, readiness \
                  checks, and signature verification.",
    after_help = "Examples:\n  permitflow doctor --json\n  permitflow config\n  permitflow verify WP-SEED-0001"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo dataset (idempotent)")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, database connectivity, and schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Re-hash a workflow's form data against its stored signatures")]
    Verify {
        #[arg(help = "Workflow instance id to verify")]
        instance_id: String,
        #[arg(long, help = "Verify a single signature id instead of the whole set")]
        signature: Option<String>,
    },
}

/// Best effort: a broken config must not keep the operator from running
/// `doctor` or `config` to diagnose it.
fn init_tracing() {
    let logging = AppConfig::load(LoadOptions::default())
        .map(|config| config.logging)
        .unwrap_or_else(|_| LoggingConfig { level: "info".to_string(), format: LogFormat::Compact });

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let _ = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
}

pub fn run() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            let (exit_code, output) = commands::doctor::run(json);
            commands::CommandResult { exit_code, output }
        }
        Command::Verify { instance_id, signature } => {
            commands::verify::run(&instance_id, signature.as_deref())
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
