//! Exclusion rule commands

mod handler;

pub use handler::handle_exclude_command;

use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum ExcludeCommands {
    /// Exclude a content type, one document, or one field
    Add(AddArgs),
    /// Remove a rule by id
    Remove(RemoveArgs),
    /// List the rules of an instance pair
    List(ListArgs),
}

#[derive(Args)]
pub struct AddArgs {
    /// Source instance
    pub source: String,
    /// Target instance
    pub target: String,
    /// Content type uid
    pub content_type: String,
    /// Narrow the rule to one document
    #[arg(long)]
    pub document: Option<String>,
    /// Exclude only this dot-separated field path
    #[arg(long)]
    pub field: Option<String>,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Rule id as shown by `exclude list`
    pub id: i64,
}

#[derive(Args)]
pub struct ListArgs {
    /// Source instance
    pub source: String,
    /// Target instance
    pub target: String,
}
