use anyhow::{Result, anyhow};
use colored::*;

use super::{AddArgs, ListArgs, RemoveArgs, SelectCommands};
use crate::cli::commands::{find_request, selection_label, state_colored};
use crate::config::Config;
use crate::config::repository::{merge_requests, snapshots};
use crate::sync::comparator::ComparisonOutcome;
use crate::sync::error::SyncError;
use crate::sync::merge_request::MergeRequest;
use crate::sync::pipeline::check_selection;
use crate::sync::types::{ComparisonState, Direction, EntityKey, Selection};

pub async fn handle_select_command(args: SelectCommands, config: &Config) -> Result<()> {
    match args {
        SelectCommands::Add(args) => add(args, config).await,
        SelectCommands::Remove(args) => remove(args, config).await,
        SelectCommands::List(args) => list(args, config).await,
    }
}

/// Direction that resolves a difference
fn default_direction(state: ComparisonState) -> Option<Direction> {
    match state {
        ComparisonState::OnlyInSource => Some(Direction::Create),
        ComparisonState::Different => Some(Direction::Update),
        ComparisonState::OnlyInTarget => Some(Direction::Delete),
        ComparisonState::Identical | ComparisonState::Excluded => None,
    }
}

/// Every entity of a type whose difference the direction resolves
///
/// Without an explicit direction, deletions are left out.
fn select_type(
    comparison: &ComparisonOutcome,
    content_type: &str,
    locale: Option<&str>,
    direction: Option<Direction>,
) -> Vec<Selection> {
    comparison
        .results()
        .filter(|r| r.key.content_type == content_type)
        .filter(|r| locale.is_none_or(|l| r.key.locale.as_deref() == Some(l)))
        .filter_map(|r| {
            let inferred = default_direction(r.state)?;
            let wanted = match direction {
                Some(direction) => inferred == direction,
                None => inferred != Direction::Delete,
            };
            wanted.then(|| Selection::new(r.key.clone(), inferred))
        })
        .collect()
}

/// Existing selections with `added` merged in; a re-selected key keeps its position
fn merge_selections(existing: &[Selection], added: Vec<Selection>) -> Vec<Selection> {
    let mut merged = existing.to_vec();
    for selection in added {
        match merged.iter_mut().find(|s| s.key == selection.key) {
            Some(slot) => *slot = selection,
            None => merged.push(selection),
        }
    }
    merged
}

async fn cached_comparison(config: &Config, request: &MergeRequest) -> Result<ComparisonOutcome> {
    snapshots::load_snapshot(&config.pool, request.id)
        .await?
        .and_then(|cached| cached.comparison)
        .ok_or_else(|| {
            SyncError::NotFound {
                what: format!("a comparison for '{}' (run compare first)", request.name),
            }
            .into()
        })
}

async fn add(args: AddArgs, config: &Config) -> Result<()> {
    let mut request = find_request(&config.pool, &args.request).await?;
    let comparison = cached_comparison(config, &request).await?;

    let added = match &args.document_id {
        Some(document_id) => {
            let key = EntityKey::new(&args.content_type, document_id).with_locale(args.locale.clone());
            let state = comparison.state_of(&key).ok_or_else(|| SyncError::NotFound {
                what: format!("{} in the comparison", key),
            })?;
            let direction = match args.direction {
                Some(direction) => direction,
                None => default_direction(state)
                    .ok_or_else(|| anyhow!("{} is {}, nothing to sync", key, state.label().to_lowercase()))?,
            };
            let selection = Selection::new(key, direction);
            check_selection(&comparison, &selection)?;
            vec![selection]
        }
        None => select_type(
            &comparison,
            &args.content_type,
            args.locale.as_deref(),
            args.direction,
        ),
    };

    if added.is_empty() {
        println!("Nothing to select for {}", args.content_type);
        return Ok(());
    }

    for selection in &added {
        let state = comparison
            .state_of(&selection.key)
            .unwrap_or(ComparisonState::Identical);
        println!(
            "  {} {:<7} {}",
            state_colored(state, state.symbol()),
            selection.direction.as_str(),
            selection.key
        );
    }

    let count = added.len();
    request.set_selections(merge_selections(&request.selections, added))?;
    merge_requests::save_merge_request(&config.pool, &request).await?;
    println!(
        "Selected {} entit(ies); {} now has {} selection(s)",
        count,
        request.name.bold(),
        request.selections.len()
    );
    Ok(())
}

async fn remove(args: RemoveArgs, config: &Config) -> Result<()> {
    let mut request = find_request(&config.pool, &args.request).await?;

    let keep: Vec<Selection> = request
        .selections
        .iter()
        .filter(|s| {
            let matches = s.key.content_type == args.content_type
                && args
                    .document_id
                    .as_deref()
                    .is_none_or(|doc| s.key.document_id == doc)
                && args
                    .locale
                    .as_deref()
                    .is_none_or(|l| s.key.locale.as_deref() == Some(l));
            !matches
        })
        .cloned()
        .collect();

    let removed = request.selections.len() - keep.len();
    if removed == 0 {
        println!("No matching selections");
        return Ok(());
    }

    request.set_selections(keep)?;
    merge_requests::save_merge_request(&config.pool, &request).await?;
    println!("Removed {} selection(s) from {}", removed, request.name.bold());
    Ok(())
}

async fn list(args: ListArgs, config: &Config) -> Result<()> {
    let request = find_request(&config.pool, &args.request).await?;
    if request.selections.is_empty() {
        println!("No selections in {}", request.name.bold());
        return Ok(());
    }

    for selection in &request.selections {
        println!(
            "{:<8} {:<7} {}",
            selection_label(selection.status),
            selection.direction.as_str(),
            selection.key
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ARTICLE: &str = "api::article.article";

    fn comparison() -> ComparisonOutcome {
        let result = |doc: &str, state: &str| {
            json!({
                "key": {"content_type": ARTICLE, "document_id": doc},
                "content_kind": "collectionType",
                "state": state,
                "source": null,
                "target": null
            })
        };
        serde_json::from_value(json!({"results": [
            result("new", "ONLY_IN_SOURCE"),
            result("changed", "DIFFERENT"),
            result("same", "IDENTICAL"),
            result("gone", "ONLY_IN_TARGET"),
            {
                "key": {"content_type": "api::tag.tag", "document_id": "t"},
                "content_kind": "collectionType",
                "state": "ONLY_IN_SOURCE",
                "source": null,
                "target": null
            }
        ]}))
        .unwrap()
    }

    fn documents(selections: &[Selection]) -> Vec<(&str, Direction)> {
        selections
            .iter()
            .map(|s| (s.key.document_id.as_str(), s.direction))
            .collect()
    }

    #[test]
    fn test_type_selection_skips_deletes_unless_asked() {
        let comparison = comparison();

        let implicit = select_type(&comparison, ARTICLE, None, None);
        assert_eq!(
            documents(&implicit),
            vec![("changed", Direction::Update), ("new", Direction::Create)]
        );

        let deletes = select_type(&comparison, ARTICLE, None, Some(Direction::Delete));
        assert_eq!(documents(&deletes), vec![("gone", Direction::Delete)]);
    }

    #[test]
    fn test_reselection_replaces_in_place() {
        let key = |doc: &str| EntityKey::new(ARTICLE, doc);
        let existing = vec![
            Selection::new(key("a"), Direction::Create),
            Selection::new(key("b"), Direction::Update),
        ];
        let merged = merge_selections(
            &existing,
            vec![
                Selection::new(key("a"), Direction::Update),
                Selection::new(key("c"), Direction::Create),
            ],
        );
        assert_eq!(
            documents(&merged),
            vec![
                ("a", Direction::Update),
                ("b", Direction::Update),
                ("c", Direction::Create)
            ]
        );
    }

    #[test]
    fn test_identical_has_no_direction() {
        assert_eq!(default_direction(ComparisonState::Identical), None);
        assert_eq!(default_direction(ComparisonState::OnlyInTarget), Some(Direction::Delete));
    }
}
