mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::process::ExitCode;
use ydo_core::{init_logging, LoggingConfig};
use ydo_migrate::DownTarget;

use commands::{migrate, GlobalOptions};

#[derive(Parser, Debug)]
#[command(name = "migrate", version)]
#[command(about = "Apply and revert versioned PostgreSQL schema migrations")]
struct Cli {
    #[command(flatten)]
    globals: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply all pending migrations
    Up,

    /// Revert applied migrations (one step by default)
    Down(DownArgs),

    /// Show current version, dirty flag and pending migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set the recorded version and clear the dirty flag without running scripts
    Force {
        /// Version to record (0 for an empty schema)
        version: u64,
    },

    /// Scaffold the next migration file pair
    Create {
        /// Migration name, e.g. "create users"
        name: String,
    },
}

#[derive(Args, Debug)]
struct DownArgs {
    /// Number of migrations to revert
    #[arg(long, value_name = "N", conflicts_with_all = ["to", "all"])]
    steps: Option<usize>,

    /// Revert until this version is current
    #[arg(long, value_name = "VERSION", conflicts_with = "all")]
    to: Option<u64>,

    /// Revert every applied migration
    #[arg(long)]
    all: bool,
}

impl DownArgs {
    fn target(&self) -> DownTarget {
        match (self.steps, self.to, self.all) {
            (_, _, true) => DownTarget::Version(0),
            (_, Some(version), _) => DownTarget::Version(version),
            (Some(steps), _, _) => DownTarget::Steps(steps),
            _ => DownTarget::default(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::for_level(cli.globals.log_level.as_str());
    if cli.globals.log_json {
        logging = logging.json();
    }
    if let Err(err) = init_logging(logging) {
        eprintln!("Warning: logging disabled: {}", err);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Cli { globals, command } = cli;

    match command {
        Command::Up => migrate::up(globals.load()?).await,
        Command::Down(args) => migrate::down(globals.load()?, args.target()).await,
        Command::Status { json } => migrate::status(globals.load()?, json).await,
        Command::Force { version } => migrate::force(globals.load()?, version).await,
        Command::Create { name } => migrate::create(&globals.migrations_dir()?.path, &name),
    }
}
