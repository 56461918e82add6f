pub mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use procura_core::config::{ConfigOverrides, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "procura",
    about = "Procura operator CLI",
    long_about = "Operate the Procura request lifecycle: migrations, demo fixtures, readiness checks, and the deadline scheduler.",
    after_help = "Examples:\n  procura doctor --json\n  procura migrate\n  procura run --instance scheduler-2"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a TOML config file (defaults to procura.toml)")]
    config: Option<PathBuf>,
    #[arg(long = "database-url", global = true, help = "Override the database URL")]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo dataset (idempotent)")]
    Seed,
    #[command(about = "Validate config, database connectivity, and schema currency")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one closure sweep over due requests and report its counters")]
    Tick {
        #[arg(long, help = "Override the scheduler instance identity for this sweep")]
        instance: Option<String>,
    },
    #[command(about = "Run the deadline scheduler loop until interrupted")]
    Run {
        #[arg(long, help = "Override the scheduler instance identity")]
        instance: Option<String>,
        #[arg(long, help = "Override seconds between sweeps")]
        tick_interval_secs: Option<u64>,
    },
}

pub fn run() -> ExitCode {
    let Cli { config, database_url, command } = Cli::parse();

    let mut overrides = ConfigOverrides { database_url, ..ConfigOverrides::default() };
    let result = match command {
        Command::Migrate => commands::migrate::run(load_options(&config, overrides)),
        Command::Seed => commands::seed::run(load_options(&config, overrides)),
        Command::Doctor { json } => commands::doctor::run(load_options(&config, overrides), json),
        Command::Tick { instance } => {
            overrides.instance = instance;
            commands::tick::run(load_options(&config, overrides))
        }
        Command::Run { instance, tick_interval_secs } => {
            overrides.instance = instance;
            overrides.tick_interval_secs = tick_interval_secs;
            commands::run::run(load_options(&config, overrides))
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn load_options(config_path: &Option<PathBuf>, overrides: ConfigOverrides) -> LoadOptions {
    LoadOptions {
        config_path: config_path.clone(),
        require_file: config_path.is_some(),
        overrides,
    }
}
