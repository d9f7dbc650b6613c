use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tion::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "tion")]
#[command(version, about = "Coding-agent stream bridge and tools catalog backend")]
pub struct Cli {
    /// Debug-level logging (same as DEBUG=true)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the agent server (chat streams, projects, git, deploys)
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind (overrides HOST)
        #[arg(long)]
        host: Option<String>,

        /// Workspace root holding frontends/ (overrides WORKSPACE)
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
    /// Run the tools catalog API
    Catalog {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database file (overrides DATABASE_PATH)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Create the database and seed the starter tools, then exit
        #[arg(long)]
        init: bool,
    },
    /// Load configuration, print it with secrets masked and validate it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_file = match dotenvy::dotenv() {
        Ok(path) => Some(path),
        Err(e) if e.not_found() => None,
        Err(e) => return Err(e).context("Failed to load .env file"),
    };
    let mut config = Config::from_env()?;
    tion::logging::init_logging(cli.verbose || config.debug)?;
    if let Some(path) = env_file {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }

    match cli.command {
        Commands::Serve {
            port,
            host,
            workspace,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(workspace) = workspace {
                config.workspace = workspace;
            }
            cmd::cmd_serve(config).await?;
        }
        Commands::Catalog {
            port,
            db_path,
            init,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(db_path) = db_path {
                config.database_path = db_path;
            }
            cmd::cmd_catalog(&config, init).await?;
        }
        Commands::CheckConfig => cmd::cmd_check_config(&config)?,
    }

    Ok(())
}
