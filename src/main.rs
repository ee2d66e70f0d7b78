use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "draftline")]
#[command(version, about = "Durable step-execution engine for AI article drafting")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Working directory holding draftline.toml and the database
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Explicit config file (defaults to <dir>/draftline.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the trigger server, resuming unfinished runs first
    Serve {
        /// Host to bind (overrides [server] host)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on (overrides [server] port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Allow cross-origin requests from any origin
        #[arg(long)]
        cors: bool,
    },
    /// Run a trigger payload to completion in this process
    Trigger {
        /// Path to a JSON trigger payload, or the JSON itself
        payload: String,
    },
    /// Show the latest run for an article
    Status {
        article_id: String,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Drive every unfinished run to a terminal state
    Resume,
    /// Import articles, sources and users from a JSON file
    Import { file: PathBuf },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default draftline.toml
    Init,
}

#[derive(Subcommand, Clone)]
pub enum DbCommands {
    /// Create the database and its tables
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dir = match cli.dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    dotenvy::from_path(dir.join(".env")).ok();
    dotenvy::dotenv().ok();

    let workspace = cmd::Workspace::load(dir, cli.config.clone())?;
    let _log_guard = draftline::telemetry::init(&workspace.config.logging, cli.verbose);

    match &cli.command {
        Commands::Serve { host, port, cors } => {
            cmd::cmd_serve(&workspace, host.clone(), *port, *cors).await?
        }
        Commands::Trigger { payload } => cmd::cmd_trigger(&workspace, payload).await?,
        Commands::Status { article_id, json } => {
            cmd::cmd_status(&workspace, article_id, *json).await?
        }
        Commands::Resume => cmd::cmd_resume(&workspace).await?,
        Commands::Import { file } => cmd::cmd_import(&workspace, file).await?,
        Commands::Config { command } => cmd::cmd_config(&workspace, command.clone())?,
        Commands::Db { command } => cmd::cmd_db(&workspace, command.clone())?,
    }

    Ok(())
}
