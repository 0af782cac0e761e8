use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use arbor_core::config::{load_config_or_default, ArborConfig, DEFAULT_CONFIG_PATH};
use arbor_core::types::PinId;
use arbor_core::validation::{has_errors, render_errors, Validate, ValidationLevel};
use arbord::{configured_sink, ArborService};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Branch topology scanner and lifecycle tool", long_about = None)]
struct Cli {
    /// Path to the arbor TOML config.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a repository in the foreground and print the snapshot
    Scan {
        path: String,
        /// Worktree the caller is working in, defaults to PATH
        #[arg(long)]
        active: Option<String>,
    },
    /// Print the cached snapshot of a pinned repository with designed edges applied
    Show { pin_id: PinId },
    /// List pinned repositories
    Pins,
    /// Report whether a branch can be deleted safely
    CheckDeletable { path: String, branch: String },
    /// Delete a branch and re-parent tree specs that referenced it
    DeleteBranch {
        path: String,
        branch: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        delete_remote: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config_or_default(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    init_logging(&config);
    check_config(&config)?;

    let events = configured_sink(&config.storage, Vec::new())
        .context("failed to prepare event log")?;
    let service = ArborService::from_config(config, events)
        .context("failed to start arbor")?
        .without_background_rescans();

    match cli.command {
        Commands::Scan { path, active } => {
            let outcome = service.scan_now(&path, active.as_deref())?;
            print_json(&outcome)?;
        }
        Commands::Show { pin_id } => {
            print_json(&service.read_snapshot(pin_id)?)?;
        }
        Commands::Pins => {
            print_json(&service.list_pins()?)?;
        }
        Commands::CheckDeletable { path, branch } => {
            print_json(&service.check_deletable(&path, &branch)?)?;
        }
        Commands::DeleteBranch {
            path,
            branch,
            force,
            delete_remote,
        } => {
            let outcome = service.delete_branch(&path, &branch, force, delete_remote)?;
            for warning in &outcome.warnings {
                warn!("{warning}");
            }
            print_json(&serde_json::json!({
                "success": true,
                "reparentedEdges": outcome.reparented_edges,
                "warnings": outcome.warnings,
            }))?;
        }
    }

    Ok(())
}

fn init_logging(config: &ArborConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn check_config(config: &ArborConfig) -> Result<()> {
    let issues = config.validate();
    for issue in issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Warning)
    {
        warn!(code = issue.code, "{}", issue.message);
    }
    if has_errors(&issues) {
        bail!("invalid config: {}", render_errors(&issues));
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
