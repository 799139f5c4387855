//! Id mapping commands

mod handler;

pub use handler::handle_mappings_command;

use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum MappingsCommands {
    /// List the id mappings of an instance pair
    List(ListArgs),
    /// Remove mappings whose entities no longer exist
    Prune(PruneArgs),
}

#[derive(Args)]
pub struct PairArgs {
    /// Source instance
    pub source: String,
    /// Target instance
    pub target: String,
}

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub pair: PairArgs,
    /// Only mappings of this content type
    #[arg(long = "type", value_name = "UID")]
    pub content_type: Option<String>,
}

#[derive(Args)]
pub struct PruneArgs {
    #[command(flatten)]
    pub pair: PairArgs,
    /// Drop every mapping of the pair without contacting the instances
    #[arg(long)]
    pub all: bool,
}
