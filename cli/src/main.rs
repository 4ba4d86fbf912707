// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Identity Service CLI
//!
//! The `aegis-identity` binary hosts the membership core: the User,
//! Organization and Team facades, the outbound event publisher and the
//! inbound identity event consumer.
//!
//! ## Commands
//!
//! - `aegis-identity run` - Start the service and block until Ctrl+C / SIGTERM
//! - `aegis-identity migrate [--dry-run]` - Apply PostgreSQL schema migrations
//! - `aegis-identity config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use aegis_identity_core::domain::identity_config::{IdentityConfigManifest, LoggingConfig, CONFIG_PATH_ENV};

mod commands;
mod daemon;

use commands::{ConfigCommand, MigrateCommand};

/// AEGIS Identity - users, teams and organizations
#[derive(Parser)]
#[command(name = "aegis-identity")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = CONFIG_PATH_ENV, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true, env = "AEGIS_IDENTITY_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the identity service
    #[command(name = "run")]
    Run,

    /// Apply database migrations
    #[command(name = "migrate")]
    Migrate {
        #[command(flatten)]
        command: MigrateCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Logging settings come from the config file when it loads; a broken
    // file is reported by the command itself.
    let mut logging = IdentityConfigManifest::load_or_default(cli.config.clone())
        .map(|config| config.spec.logging)
        .unwrap_or_default();
    if let Some(level) = cli.log_level {
        logging.level = level;
    }
    init_logging(&logging)?;

    match cli.command {
        Some(Commands::Run) => daemon::start_daemon(cli.config).await,
        Some(Commands::Migrate { command }) => commands::migrate::execute(command, cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging. `RUST_LOG` wins over the
/// configured level.
fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match config.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}
