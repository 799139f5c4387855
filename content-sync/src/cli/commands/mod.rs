pub mod exclude;
pub mod mappings;
pub mod request;
pub mod select;
pub mod sync;

use anyhow::Result;
use colored::*;
use sqlx::SqlitePool;

use crate::api::HttpContentApi;
use crate::config::Config;
use crate::config::repository::merge_requests;
use crate::sync::comparator::StateCounts;
use crate::sync::error::SyncError;
use crate::sync::merge_request::{MergeRequest, MergeRequestStatus};
use crate::sync::types::{ComparisonState, SelectionStatus};

/// Load a merge request by name or id
pub(crate) async fn find_request(pool: &SqlitePool, name_or_id: &str) -> Result<MergeRequest> {
    merge_requests::get_merge_request(pool, name_or_id)
        .await?
        .ok_or_else(|| {
            SyncError::NotFound {
                what: format!("merge request '{}'", name_or_id),
            }
            .into()
        })
}

/// HTTP clients for a source/target pair
pub(crate) fn instance_clients(
    config: &Config,
    source: &str,
    target: &str,
) -> Result<(HttpContentApi, HttpContentApi)> {
    Ok((config.settings.client(source)?, config.settings.client(target)?))
}

pub(crate) fn status_label(status: MergeRequestStatus) -> ColoredString {
    match status {
        MergeRequestStatus::Created => status.as_str().normal(),
        MergeRequestStatus::SchemaChecked => status.as_str().cyan(),
        MergeRequestStatus::Compared => status.as_str().bright_blue(),
        MergeRequestStatus::InProgress => status.as_str().yellow(),
        MergeRequestStatus::Completed => status.as_str().bright_green(),
        MergeRequestStatus::Failed => status.as_str().bright_red(),
    }
}

pub(crate) fn selection_label(status: SelectionStatus) -> ColoredString {
    match status {
        SelectionStatus::Pending => status.as_str().dimmed(),
        SelectionStatus::Success => status.as_str().bright_green(),
        SelectionStatus::Failure => status.as_str().bright_red(),
    }
}

pub(crate) fn state_colored(state: ComparisonState, text: &str) -> ColoredString {
    match state {
        ComparisonState::OnlyInSource => text.bright_green(),
        ComparisonState::OnlyInTarget => text.bright_red(),
        ComparisonState::Different => text.yellow(),
        ComparisonState::Identical => text.normal(),
        ComparisonState::Excluded => text.dimmed(),
    }
}

/// One summary line: `+3 -1 ~2 =10 ×0`
pub(crate) fn format_counts(counts: &StateCounts) -> String {
    [
        (ComparisonState::OnlyInSource, counts.only_in_source),
        (ComparisonState::OnlyInTarget, counts.only_in_target),
        (ComparisonState::Different, counts.different),
        (ComparisonState::Identical, counts.identical),
        (ComparisonState::Excluded, counts.excluded),
    ]
    .iter()
    .map(|(state, count)| {
        let text = format!("{}{}", state.symbol(), count);
        if *count == 0 {
            text.dimmed().to_string()
        } else {
            state_colored(*state, &text).to_string()
        }
    })
    .collect::<Vec<_>>()
    .join(" ")
}
