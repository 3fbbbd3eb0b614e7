mod commands;
mod context;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tablet_core::{init_logging, LoggingConfig};
use tablet_orm::MigrationVersion;

use commands::migrate;

#[derive(Parser)]
#[command(name = "tablet")]
#[command(about = "Versioned schema migrations for PostgreSQL and SQLite")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Database URL, e.g. postgres://localhost/app or sqlite://app.db
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Directory holding the migration files
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// YAML configuration file (defaults to ./tablet.yaml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// More log output; repeat for more
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate {
        /// Stop after this version
        #[arg(long)]
        to: Option<MigrationVersion>,
    },

    /// Revert applied migrations (default: the most recent one)
    Rollback {
        /// Revert everything applied above this version
        #[arg(long, conflicts_with = "all")]
        to: Option<MigrationVersion>,

        /// Revert every applied migration
        #[arg(long)]
        all: bool,
    },

    /// Show applied and pending migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new migration file
    New {
        /// Migration name, e.g. "create artists"
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig::from_verbosity(cli.global.verbose).with_json(cli.global.json_logs);
    if let Err(e) = init_logging(logging) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Migrate { to } => migrate::run(&cli.global, to).await,
        Commands::Rollback { to, all } => migrate::rollback(&cli.global, to, all).await,
        Commands::Status { json } => migrate::status(&cli.global, json).await,
        Commands::New { name } => migrate::create(&cli.global, &name),
    }
}
