//! Selection commands
//!
//! Selections are checked against the comparison cached by the last
//! `compare` run, so a request must be compared before entities can be
//! selected.

mod handler;

pub use handler::handle_select_command;

use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum SelectCommands {
    /// Select one entity, or every differing entity of a type
    Add(AddArgs),
    /// Drop selections
    Remove(RemoveArgs),
    /// List a request's selections
    List(ListArgs),
}

#[derive(Args)]
pub struct AddArgs {
    /// Request name or id
    pub request: String,
    /// Content type uid, e.g. api::article.article
    pub content_type: String,
    /// Document id; omit to select every differing entity of the type
    pub document_id: Option<String>,
    #[arg(long)]
    pub locale: Option<String>,
    /// CREATE, UPDATE or DELETE; inferred from the comparison when omitted
    #[arg(long, short, value_parser = parse_direction)]
    pub direction: Option<crate::sync::types::Direction>,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Request name or id
    pub request: String,
    pub content_type: String,
    /// Document id; omit to drop every selection of the type
    pub document_id: Option<String>,
    #[arg(long)]
    pub locale: Option<String>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Request name or id
    pub request: String,
}

fn parse_direction(value: &str) -> Result<crate::sync::types::Direction, String> {
    crate::sync::types::Direction::parse(value)
        .ok_or_else(|| format!("'{}' is not one of create, update, delete", value))
}
