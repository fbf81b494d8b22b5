//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod common;
pub mod status;
pub mod update;
pub mod validate;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hubupdate")]
#[command(version)]
#[command(about = "Self-update orchestrator for data hub appliances", long_about = None)]
struct Cli {
    /// Settings file (default: $HUBUPDATE_CONFIG or /config/settings.yml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resume any interrupted update, then check for updates until stopped
    Run,
    /// Compare installed and published versions without changing anything
    Check,
    /// Run one update attempt now
    Apply {
        /// Apply this version instead of the latest published one
        #[arg(long)]
        version: Option<String>,
    },
    /// Show installed version, pending update journal and snapshots
    Status,
    /// Schema-check a local manifest file
    Validate {
        /// Manifest file (YAML or JSON)
        file: PathBuf,
    },
    /// Validate the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Clear a fatal update journal after the appliance has been repaired
    Acknowledge,
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Check settings for unknown fields and invalid values
    Check,
    /// Print the effective settings after defaults and overrides
    Show,
}

/// Entry point for the CLI, called from main().
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(hubupdate::UpdaterConfig::path);

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            cmd_version();
        }
        Some(Commands::Validate { file }) => {
            validate::cmd_validate(&file)?;
        }
        Some(Commands::Config { action }) => {
            validate::cmd_config(action, &config_path)?;
        }
        Some(Commands::Run) => {
            let config = common::load_config(&config_path)?;
            update::cmd_run(config).await?;
        }
        Some(Commands::Check) => {
            let config = common::load_config(&config_path)?;
            update::cmd_check(config).await?;
        }
        Some(Commands::Apply { version }) => {
            let config = common::load_config(&config_path)?;
            update::cmd_apply(config, version).await?;
        }
        Some(Commands::Status) => {
            let config = common::load_config(&config_path)?;
            status::cmd_status(config)?;
        }
        Some(Commands::Acknowledge) => {
            let config = common::load_config(&config_path)?;
            update::cmd_acknowledge(config)?;
        }
    }

    Ok(())
}

/// Display version information
fn cmd_version() {
    println!("hubupdate {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Self-update orchestrator for data hub appliances");
}
