//! Command-line interface

pub mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;
use commands::exclude::{ExcludeCommands, handle_exclude_command};
use commands::mappings::{MappingsCommands, handle_mappings_command};
use commands::request::{RequestCommands, handle_request_command};
use commands::select::{SelectCommands, handle_select_command};
use commands::sync::{
    CompareArgs, PlanArgs, RequestArgs, handle_apply_command, handle_check_command,
    handle_compare_command, handle_plan_command,
};

/// Reconcile content between two CMS instances
#[derive(Parser)]
#[command(name = "content-sync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, list, show or delete merge requests
    #[command(subcommand)]
    Request(RequestCommands),

    /// Check schema compatibility of a request's instances
    Check(RequestArgs),

    /// Compare both instances and cache the result on the request
    Compare(CompareArgs),

    /// Choose which entities a request will sync
    #[command(subcommand)]
    Select(SelectCommands),

    /// Show the execution order of a request's selections
    Plan(PlanArgs),

    /// Execute a compared request against the target
    Apply(RequestArgs),

    /// Inspect or prune id mappings of an instance pair
    #[command(subcommand)]
    Mappings(MappingsCommands),

    /// Manage exclusion rules of an instance pair
    #[command(subcommand)]
    Exclude(ExcludeCommands),
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Request(args) => handle_request_command(args, &config).await,
        Commands::Check(args) => handle_check_command(args, &config).await,
        Commands::Compare(args) => handle_compare_command(args, &config).await,
        Commands::Select(args) => handle_select_command(args, &config).await,
        Commands::Plan(args) => handle_plan_command(args, &config).await,
        Commands::Apply(args) => handle_apply_command(args, &config).await,
        Commands::Mappings(args) => handle_mappings_command(args, &config).await,
        Commands::Exclude(args) => handle_exclude_command(args, &config).await,
    }
}
