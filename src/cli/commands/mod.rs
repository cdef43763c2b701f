//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod aggregate;
mod blocks;
mod config_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "larder")]
#[command(about = "Polite, resilient multi-source recipe aggregation")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "LARDER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Query every configured source and merge the results
    Aggregate {
        /// Recipe to look for
        query: String,
        /// Page already known to hold the recipe
        #[arg(long)]
        hint_url: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect and edit the domain block registry
    Blocks {
        #[command(subcommand)]
        command: BlocksCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum BlocksCommands {
    /// List every tracked domain
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check whether a URL's domain is currently blocked
    Check {
        url: String,
    },
    /// Remove a domain's record entirely
    Unblock {
        domain: String,
    },
    /// Record a failure against a URL's domain
    Fail {
        url: String,
        /// Error message, used to classify the failure
        message: String,
    },
    /// Record a success against a URL's domain
    Succeed {
        url: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Output format (toml, json)
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
}

/// Load config from an explicit path or via discovery.
async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(path)
                .await
                .map_err(|e| anyhow::anyhow!(e))
        }
        None => Ok(Config::load().await),
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref()).await?;

    match cli.command {
        Commands::Aggregate {
            query,
            hint_url,
            json,
        } => aggregate::cmd_aggregate(&config, &query, hint_url.as_deref(), json).await,
        Commands::Blocks { command } => {
            let registry = config.block_registry();
            match command {
                BlocksCommands::List { json } => blocks::cmd_blocks_list(&registry, json).await,
                BlocksCommands::Check { url } => blocks::cmd_blocks_check(&registry, &url).await,
                BlocksCommands::Unblock { domain } => {
                    blocks::cmd_blocks_unblock(&registry, &domain).await
                }
                BlocksCommands::Fail { url, message } => {
                    blocks::cmd_blocks_fail(&registry, &url, &message).await
                }
                BlocksCommands::Succeed { url } => {
                    blocks::cmd_blocks_succeed(&registry, &url).await
                }
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show { format } => config_cmd::cmd_config_show(&config, &format),
        },
    }
}
