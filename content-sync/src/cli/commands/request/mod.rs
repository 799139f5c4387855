//! Merge request management commands

mod handler;

pub use handler::handle_request_command;

use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum RequestCommands {
    /// Create a merge request between two configured instances
    Create(CreateArgs),
    /// List all merge requests
    List,
    /// Show a merge request with its selections
    Show(ShowArgs),
    /// Delete a merge request that has not started
    Delete(ShowArgs),
}

#[derive(Args)]
pub struct CreateArgs {
    /// Unique name of the request
    pub name: String,
    /// Instance content is read from
    #[arg(long, short)]
    pub source: String,
    /// Instance content is written to
    #[arg(long, short)]
    pub target: String,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Request name or id
    pub request: String,
}
