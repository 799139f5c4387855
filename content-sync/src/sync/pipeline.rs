//! End-to-end orchestration for one merge request
//!
//! Each step loads what it needs from the repository, runs the engine and
//! writes the results back:
//! - `check`: prefetch both instances and record the schema check
//! - `compare`: prefetch, sanitize mappings, check, compare, cache the snapshot
//! - `plan`: propagate relationship status over the cached comparison and order the selections
//! - `apply`: execute the plan and settle the request
//!
//! Lock checks run before any instance is contacted.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::api::ContentApi;
use crate::config::SyncSettings;
use crate::config::repository::{exclusions, id_mappings, merge_requests, snapshots};
use crate::sync::comparator::{self, ComparisonOutcome};
use crate::sync::error::SyncError;
use crate::sync::exclusions::ExclusionSet;
use crate::sync::id_mapping::IdMappingTable;
use crate::sync::loader;
use crate::sync::merge::{MergeProcessor, MergeReport};
use crate::sync::merge_request::{MergeRequest, MergeRequestStatus};
use crate::sync::planner::{self, Plan, TargetPresence};
use crate::sync::relationships::{RelationshipIndex, propagate};
use crate::sync::schema::{SchemaCheck, check_compatibility};
use crate::sync::snapshot::Snapshot;
use crate::sync::types::{ComparisonState, Direction, Selection};

/// Result of a comparison step
pub struct ComparisonRun {
    pub snapshot: Arc<Snapshot>,
    pub schema_check: SchemaCheck,
    pub comparison: ComparisonOutcome,
    /// Stale mappings pruned at the start of the pass
    pub pruned_mappings: usize,
}

pub struct SyncPipeline<'a> {
    pool: &'a SqlitePool,
    source: &'a dyn ContentApi,
    target: &'a dyn ContentApi,
    settings: &'a SyncSettings,
}

fn ensure_unlocked(request: &MergeRequest, operation: &str) -> Result<(), SyncError> {
    if request.status.is_locked() {
        return Err(SyncError::invalid_state(operation, request.status));
    }
    Ok(())
}

/// Check a selection against the comparison it was made from
///
/// Unknown entities are rejected; a direction that does not fit the
/// entity's state is allowed but logged.
pub fn check_selection(comparison: &ComparisonOutcome, selection: &Selection) -> Result<(), SyncError> {
    let state = comparison
        .state_of(&selection.key)
        .ok_or_else(|| SyncError::NotFound {
            what: format!("{} in the comparison", selection.key),
        })?;

    let fits = match selection.direction {
        Direction::Create => state == ComparisonState::OnlyInSource,
        Direction::Update => state == ComparisonState::Different,
        Direction::Delete => state == ComparisonState::OnlyInTarget,
    };
    if !fits {
        log::warn!(
            "{} selected for {} while it is {}",
            selection.key,
            selection.direction.as_str(),
            state.label()
        );
    }
    Ok(())
}

impl<'a> SyncPipeline<'a> {
    pub fn new(
        pool: &'a SqlitePool,
        source: &'a dyn ContentApi,
        target: &'a dyn ContentApi,
        settings: &'a SyncSettings,
    ) -> Self {
        Self {
            pool,
            source,
            target,
            settings,
        }
    }

    async fn prefetch(&self) -> Result<Arc<Snapshot>> {
        loader::prefetch(self.source, self.target, &self.settings.loader())
            .await
            .context("Prefetch failed")
    }

    /// Prefetch both instances and record their schema compatibility
    pub async fn check(&self, request: &mut MergeRequest) -> Result<SchemaCheck> {
        ensure_unlocked(request, "record a schema check")?;

        let snapshot = self.prefetch().await?;
        let check = check_compatibility(&snapshot.source_schema, &snapshot.target_schema);
        request.record_schema_check(check.clone())?;

        snapshots::save_snapshot(self.pool, request.id, &snapshot, None).await?;
        merge_requests::save_merge_request(self.pool, request).await?;

        log::info!(
            "Schema check for '{}': {} incompatibilit(ies), {} warning(s)",
            request.name,
            check.incompatibilities.len(),
            check.warnings.len()
        );
        Ok(check)
    }

    /// Full comparison pass
    ///
    /// An incompatible schema is recorded on the request before the error is
    /// returned, so it can be inspected.
    pub async fn compare(&self, request: &mut MergeRequest) -> Result<ComparisonRun> {
        ensure_unlocked(request, "record a comparison")?;

        let snapshot = self.prefetch().await?;
        let mut mappings =
            id_mappings::load_table(self.pool, &request.source_instance, &request.target_instance)
                .await?;
        let pruned_mappings = mappings.sanitize(&snapshot);

        let schema_check = check_compatibility(&snapshot.source_schema, &snapshot.target_schema);
        request.record_schema_check(schema_check.clone())?;

        let exclusions =
            exclusions::load_set(self.pool, &request.source_instance, &request.target_instance)
                .await?;
        let comparison = match comparator::compare(
            &snapshot,
            &schema_check,
            &mut mappings,
            &exclusions,
            self.settings.similarity(),
        ) {
            Ok(comparison) => comparison,
            Err(e) => {
                merge_requests::save_merge_request(self.pool, request).await?;
                return Err(e.into());
            }
        };
        request.record_comparison()?;

        id_mappings::save_changes(
            self.pool,
            &request.source_instance,
            &request.target_instance,
            &mut mappings,
        )
        .await?;
        snapshots::save_snapshot(self.pool, request.id, &snapshot, Some(&comparison)).await?;
        merge_requests::save_merge_request(self.pool, request).await?;

        let summary = comparison.summary();
        log::info!(
            "Compared '{}': {} entities, {} pruned mapping(s)",
            request.name,
            summary.total.total(),
            pruned_mappings
        );

        Ok(ComparisonRun {
            snapshot,
            schema_check,
            comparison,
            pruned_mappings,
        })
    }

    async fn cached_comparison(&self, request: &MergeRequest) -> Result<(Snapshot, ComparisonOutcome)> {
        let cached = snapshots::load_snapshot(self.pool, request.id)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                what: format!("a snapshot for '{}' (run compare first)", request.name),
            })?;
        let comparison = cached.comparison.ok_or_else(|| SyncError::NotFound {
            what: format!("a comparison for '{}' (run compare first)", request.name),
        })?;
        Ok((cached.snapshot, comparison))
    }

    fn build_plan(
        &self,
        request: &MergeRequest,
        snapshot: &Snapshot,
        comparison: &ComparisonOutcome,
        mappings: &IdMappingTable,
        exclusions: &ExclusionSet,
    ) -> Plan {
        let relationships = RelationshipIndex::new(propagate(snapshot, comparison, exclusions));
        let synced = request
            .selections
            .iter()
            .filter(|s| s.succeeded())
            .map(|s| &s.key);
        let presence = TargetPresence::collect(comparison, mappings, synced);
        planner::plan(&request.selections, &relationships, &presence)
    }

    /// Order the request's selections over the cached comparison
    pub async fn plan(&self, request: &MergeRequest) -> Result<Plan> {
        let (snapshot, comparison) = self.cached_comparison(request).await?;
        let mappings =
            id_mappings::load_table(self.pool, &request.source_instance, &request.target_instance)
                .await?;
        let exclusions =
            exclusions::load_set(self.pool, &request.source_instance, &request.target_instance)
                .await?;
        Ok(self.build_plan(request, &snapshot, &comparison, &mappings, &exclusions))
    }

    /// Execute the request's selections against the target
    ///
    /// Works from the snapshot of the last comparison. The request ends
    /// COMPLETED only when every selection succeeded and the new id
    /// mappings were stored.
    pub async fn apply(&self, request: &mut MergeRequest) -> Result<MergeReport> {
        if request.status != MergeRequestStatus::Compared {
            return Err(SyncError::invalid_state("start the merge", request.status).into());
        }
        let (snapshot, comparison) = self.cached_comparison(request).await?;
        let mut mappings =
            id_mappings::load_table(self.pool, &request.source_instance, &request.target_instance)
                .await?;
        let exclusions =
            exclusions::load_set(self.pool, &request.source_instance, &request.target_instance)
                .await?;
        let plan = self.build_plan(request, &snapshot, &comparison, &mappings, &exclusions);

        request.begin()?;
        merge_requests::save_merge_request(self.pool, request).await?;

        let report = MergeProcessor::new(self.source, self.target, &snapshot, &comparison, &exclusions)
            .with_parallelism(self.settings.merge_parallelism)
            .apply(&plan, &mut mappings)
            .await;

        // the request is settled even when the mappings cannot be stored
        let saved = id_mappings::save_changes(
            self.pool,
            &request.source_instance,
            &request.target_instance,
            &mut mappings,
        )
        .await;
        request.finish(&report.selection_outcomes())?;
        if saved.is_err() {
            request.mark_failed()?;
        }
        merge_requests::save_merge_request(self.pool, request).await?;
        let status = request.status;
        saved.with_context(|| format!("Failed to store id mappings for '{}'", request.name))?;

        log::info!(
            "Merge '{}' {}: {} succeeded, {} failed",
            request.name,
            status,
            report.succeeded_count(),
            report.failed_count()
        );
        Ok(report)
    }
}
