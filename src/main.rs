use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "cardflow")]
#[command(version, about = "Kanban card ordering, WIP limits and live task events")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the board API and push server
    Serve {
        /// Port to listen on (defaults to [server] port)
        #[arg(long)]
        port: Option<u16>,
        /// SQLite database path (defaults to [server] db_path)
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Bind to 0.0.0.0 and allow any CORS origin
        #[arg(long)]
        dev: bool,
        /// Emit logs as JSON lines
        #[arg(long)]
        json_logs: bool,
    },
    /// Create the .cardflow directory, config file and board database
    Init {
        /// SQLite database path (defaults to [server] db_path)
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Seed a demo user and project
        #[arg(long)]
        demo: bool,
    },
    /// View and validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default cardflow.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let json_logs = matches!(cli.command, Commands::Serve { json_logs: true, .. });
    cardflow::logging::init(cli.verbose, json_logs);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Serve {
            port,
            db_path,
            dev,
            json_logs: _,
        } => {
            cmd::cmd_serve(&project_dir, port, db_path, dev).await?;
        }
        Commands::Init { db_path, demo } => cmd::cmd_init(&project_dir, db_path, demo)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command)?,
    }

    Ok(())
}
