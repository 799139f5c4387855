//! Commands driving one merge request through check, compare, plan and apply

mod handler;

pub use handler::{
    handle_apply_command, handle_check_command, handle_compare_command, handle_plan_command,
};

use clap::Args;

#[derive(Args)]
pub struct RequestArgs {
    /// Request name or id
    pub request: String,
}

#[derive(Args)]
pub struct CompareArgs {
    /// Request name or id
    pub request: String,

    /// List every entity that is not identical
    #[arg(long, short)]
    pub list: bool,

    /// Only list entities of this content type
    #[arg(long = "type", value_name = "UID")]
    pub content_type: Option<String>,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Request name or id
    pub request: String,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}
