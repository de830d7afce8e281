//! citelib CLI
//!
//! Command-line interface for citelib - load, search and watch bibliography
//! databases.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use citelib_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

/// Environment variable that overrides the log filter
const LOG_ENV: &str = "CITELIB_LOG";

#[derive(Parser)]
#[command(name = "citelib")]
#[command(about = "citelib - Bibliography ingestion and search")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use a specific config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every configured database and report the result
    Load,
    /// Search the merged library
    Search {
        /// Search query
        query: String,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one entry (citekey or citekey@database)
    Show {
        /// Entry ID
        id: String,
    },
    /// Load, then reload whenever a database changes
    Watch,
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.clone().unwrap_or_else(Config::config_file_path);

    let config = Config::load_from_path(&config_path).context("Failed to load configuration")?;
    init_logging(&config);

    match cli.command {
        Commands::Config { command } => match command {
            Some(ConfigCommands::Show) | None => {
                commands::config::show(&config, &config_path, &output)
            }
            Some(ConfigCommands::Path) => commands::config::path(&config_path, &output),
        },
        Commands::Load => commands::load::load(config, &output).await,
        Commands::Search { query, limit } => {
            commands::search::search(config, &query, limit, &output).await
        }
        Commands::Show { id } => commands::show::show(config, &id, &output).await,
        Commands::Watch => commands::watch::watch(config, &output).await,
    }
}

/// Initialize stderr logging
///
/// The filter comes from CITELIB_LOG when set, otherwise from the
/// configured log level for the citelib crates.
fn init_logging(config: &Config) {
    let env_filter = match std::env::var(LOG_ENV) {
        Ok(filter) if !filter.is_empty() => EnvFilter::new(filter),
        _ => EnvFilter::new(format!(
            "citelib_core={},citelib_cli={}",
            config.log_level, config.log_level
        )),
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
