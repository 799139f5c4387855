//! Plan execution against the target instance
//!
//! Execution order:
//! 1. Ordinary batches, strictly in order; items inside a batch run
//!    concurrently up to the configured parallelism
//! 2. Deletions
//! 3. Cyclic items, one at a time, easiest first
//! 4. Re-patch of items that were written with references left out
//!
//! A failed item never stops the run; it is reported and the next item goes.

use std::collections::HashSet;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use super::payload::{DroppedReference, prepare_payload};
use crate::api::content::{ContentApi, CreatedEntry, EntryTarget, MediaUpload};
use crate::api::operations::Operation;
use crate::sync::comparator::ComparisonOutcome;
use crate::sync::exclusions::ExclusionSet;
use crate::sync::id_mapping::{IdMapping, IdMappingTable};
use crate::sync::merge_request::SelectionOutcome;
use crate::sync::planner::{Plan, PlanEdge, PlanItem};
use crate::sync::snapshot::Snapshot;
use crate::sync::types::{
    ComparisonResult, Direction, Entity, EntityKey, MEDIA_TYPE, SelectionStatus,
};

pub const DEFAULT_MERGE_PARALLELISM: usize = 4;

/// Metadata fields of a media file an exclusion rule can hold back
const MEDIA_FIELDS: &[&str] = &["name", "alternativeText", "caption"];

/// Stage of the run an item was executed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePhase {
    Batch(usize),
    Deletion,
    Circular,
}

impl MergePhase {
    pub fn label(&self) -> String {
        match self {
            Self::Batch(n) => format!("batch {}", n + 1),
            Self::Deletion => "deletions".to_string(),
            Self::Circular => "circular pass".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum MappingChange {
    Upsert(IdMapping),
    Remove(EntityKey),
}

/// What happened to one plan item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub key: EntityKey,
    pub direction: Direction,
    pub phase: MergePhase,
    pub status: SelectionStatus,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
    /// Identity of the entry or file on the target after the write
    pub written: Option<CreatedEntry>,
    /// References still missing from the written payload
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<DroppedReference>,
    #[serde(skip)]
    mapping_change: Option<MappingChange>,
}

impl ItemOutcome {
    fn success(item: &PlanItem, phase: MergePhase, applied: Applied) -> Self {
        Self {
            key: item.key.clone(),
            direction: item.direction,
            phase,
            status: SelectionStatus::Success,
            error: None,
            executed_at: Utc::now(),
            written: applied.written,
            dropped: applied.dropped,
            mapping_change: applied.mapping_change,
        }
    }

    fn failure(item: &PlanItem, phase: MergePhase, error: &anyhow::Error) -> Self {
        Self {
            key: item.key.clone(),
            direction: item.direction,
            phase,
            status: SelectionStatus::Failure,
            error: Some(format!("{:#}", error)),
            executed_at: Utc::now(),
            written: None,
            dropped: Vec::new(),
            mapping_change: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == SelectionStatus::Success
    }

    pub fn to_selection_outcome(&self) -> SelectionOutcome {
        SelectionOutcome {
            key: self.key.clone(),
            status: self.status,
            executed_at: self.executed_at,
            error: self.error.clone(),
        }
    }
}

/// Per-item results of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub outcomes: Vec<ItemOutcome>,
    /// Items updated a second time once their missing references existed
    pub repatched: Vec<EntityKey>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MergeReport {
    pub fn outcome(&self, key: &EntityKey) -> Option<&ItemOutcome> {
        self.outcomes.iter().find(|o| &o.key == key)
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.succeeded_count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(ItemOutcome::succeeded)
    }

    pub fn selection_outcomes(&self) -> Vec<SelectionOutcome> {
        self.outcomes.iter().map(ItemOutcome::to_selection_outcome).collect()
    }
}

struct Applied {
    written: Option<CreatedEntry>,
    dropped: Vec<DroppedReference>,
    mapping_change: Option<MappingChange>,
}

/// Executes a plan against the target
pub struct MergeProcessor<'a> {
    source_api: &'a dyn ContentApi,
    target_api: &'a dyn ContentApi,
    snapshot: &'a Snapshot,
    comparison: &'a ComparisonOutcome,
    exclusions: &'a ExclusionSet,
    parallelism: usize,
}

impl<'a> MergeProcessor<'a> {
    pub fn new(
        source_api: &'a dyn ContentApi,
        target_api: &'a dyn ContentApi,
        snapshot: &'a Snapshot,
        comparison: &'a ComparisonOutcome,
        exclusions: &'a ExclusionSet,
    ) -> Self {
        Self {
            source_api,
            target_api,
            snapshot,
            comparison,
            exclusions,
            parallelism: DEFAULT_MERGE_PARALLELISM,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Execute every item of the plan, updating the mapping table as writes land
    pub async fn apply(&self, plan: &Plan, mappings: &mut IdMappingTable) -> MergeReport {
        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(plan.item_count());
        log::info!(
            "Applying plan to {}: {} batch(es), {} cyclic, {} deletion(s)",
            self.target_api.name(),
            plan.batches.len(),
            plan.cyclic.len(),
            plan.deletions.len()
        );

        for (n, batch) in plan.batches.iter().enumerate() {
            log::info!("Batch {}/{}: {} item(s)", n + 1, plan.batches.len(), batch.len());
            outcomes.extend(self.run_parallel(batch, mappings, MergePhase::Batch(n)).await);
        }

        if !plan.deletions.is_empty() {
            log::info!("Deleting {} item(s)", plan.deletions.len());
            outcomes.extend(
                self.run_parallel(&plan.deletions, mappings, MergePhase::Deletion)
                    .await,
            );
        }

        if !plan.cyclic.is_empty() {
            log::info!("Circular pass over {} item(s)", plan.cyclic.len());
            outcomes.extend(self.run_circular(plan, mappings).await);
        }

        let repatched = self.repatch(&mut outcomes, mappings).await;

        let report = MergeReport {
            outcomes,
            repatched,
            started_at,
            finished_at: Utc::now(),
        };
        log::info!(
            "Merge finished: {} succeeded, {} failed, {} re-patched",
            report.succeeded_count(),
            report.failed_count(),
            report.repatched.len()
        );
        report
    }

    /// Run independent items concurrently; mappings are applied once all are attempted
    async fn run_parallel(
        &self,
        items: &[PlanItem],
        mappings: &mut IdMappingTable,
        phase: MergePhase,
    ) -> Vec<ItemOutcome> {
        let table: &IdMappingTable = mappings;
        let mut outcomes: Vec<ItemOutcome> = stream::iter(items)
            .map(|item| self.execute_item(item, table, phase))
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        outcomes.sort_by(|a, b| a.key.cmp(&b.key));
        for outcome in &outcomes {
            apply_mapping_change(outcome, mappings);
        }
        outcomes
    }

    async fn run_circular(&self, plan: &Plan, mappings: &mut IdMappingTable) -> Vec<ItemOutcome> {
        let mut remaining: Vec<&PlanItem> = plan.cyclic.iter().collect();
        let mut succeeded: HashSet<EntityKey> = HashSet::new();
        let mut outcomes = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let item = remaining.remove(next_circular(&remaining, &plan.circular_edges, &succeeded));
            let outcome = self.execute_item(item, mappings, MergePhase::Circular).await;
            if outcome.succeeded() {
                succeeded.insert(item.key.clone());
            }
            apply_mapping_change(&outcome, mappings);
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Update written items whose left-out references can now be translated
    async fn repatch(&self, outcomes: &mut [ItemOutcome], mappings: &IdMappingTable) -> Vec<EntityKey> {
        let mut repatched = Vec::new();

        for outcome in outcomes
            .iter_mut()
            .filter(|o| o.succeeded() && !o.dropped.is_empty())
        {
            let Some(result) = self.comparison.get(&outcome.key) else {
                continue;
            };
            let (Some(source), Some(written)) = (result.source.as_ref(), outcome.written.as_ref()) else {
                continue;
            };

            let prepared = prepare_payload(
                source,
                &self.snapshot.source,
                mappings,
                self.exclusions,
                Some(&written.document_id),
            );
            if prepared.dropped.len() >= outcome.dropped.len() {
                continue;
            }

            let entry = EntryTarget::new(&source.content_type, result.content_kind, source.locale.clone());
            let result = Operation::update_entry(entry, written.document_id.clone(), prepared.data)
                .execute(self.target_api)
                .await;
            if result.is_success() {
                log::info!(
                    "Re-patched {} with {} restored reference(s)",
                    outcome.key,
                    outcome.dropped.len() - prepared.dropped.len()
                );
                outcome.dropped = prepared.dropped;
                repatched.push(outcome.key.clone());
            } else {
                log::warn!("Re-patch of {} failed", outcome.key);
                outcome.status = SelectionStatus::Failure;
                outcome.error = Some(format!(
                    "written without some references and re-patch failed: {}",
                    result.error.unwrap_or_default()
                ));
            }
        }
        repatched
    }

    async fn execute_item(&self, item: &PlanItem, mappings: &IdMappingTable, phase: MergePhase) -> ItemOutcome {
        let applied = match item.direction {
            Direction::Create | Direction::Update => self.write(item, mappings).await,
            Direction::Delete => self.delete(item, mappings).await,
        };

        match applied {
            Ok(applied) => {
                log::debug!("{} {} ({})", item.direction.as_str(), item.key, phase.label());
                ItemOutcome::success(item, phase, applied)
            }
            Err(e) => {
                log::warn!("{} {} failed: {:#}", item.direction.as_str(), item.key, e);
                ItemOutcome::failure(item, phase, &e)
            }
        }
    }

    fn result_for(&self, key: &EntityKey) -> Result<&'a ComparisonResult> {
        self.comparison
            .get(key)
            .ok_or_else(|| anyhow!("{} is not part of the comparison", key))
    }

    async fn write(&self, item: &PlanItem, mappings: &IdMappingTable) -> Result<Applied> {
        let result = self.result_for(&item.key)?;
        let source = result
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("{} has no source row", item.key))?;

        let target_document = mappings
            .target_for(&item.key)
            .map(|m| m.target_document_id.clone())
            .or_else(|| result.target_document().map(str::to_string));

        if source.is_media() {
            let written = self.write_media(result, source, mappings).await?;
            return Ok(Applied {
                mapping_change: Some(MappingChange::Upsert(mapping_for(source, &written))),
                written: Some(written),
                dropped: Vec::new(),
            });
        }

        if item.direction == Direction::Update && target_document.is_none() {
            bail!("{} has no target row to update", item.key);
        }

        let prepared = prepare_payload(
            source,
            &self.snapshot.source,
            mappings,
            self.exclusions,
            target_document.as_deref(),
        );
        let entry = EntryTarget::new(&source.content_type, result.content_kind, source.locale.clone());
        let operation = match target_document {
            Some(document_id) => Operation::update_entry(entry, document_id, prepared.data),
            None => Operation::create_entry(entry, prepared.data),
        };

        let written = operation
            .execute(self.target_api)
            .await
            .into_result()?
            .context("Target returned no entry identity")?;

        Ok(Applied {
            mapping_change: Some(MappingChange::Upsert(mapping_for(source, &written))),
            written: Some(written),
            dropped: prepared.dropped,
        })
    }

    async fn write_media(
        &self,
        result: &ComparisonResult,
        source: &Entity,
        mappings: &IdMappingTable,
    ) -> Result<CreatedEntry> {
        let meta = self
            .snapshot
            .source
            .media_meta(source.id)
            .cloned()
            .with_context(|| format!("No metadata for source file {}", source.id))?;

        let target_file = mappings
            .target_for(&source.key())
            .map(|m| m.target_id)
            .or_else(|| result.target.as_ref().map(|t| t.id));

        let binary_changed = result.changed_fields.iter().any(|f| f == "file");
        let bytes = if target_file.is_none() || binary_changed {
            let bytes = self
                .source_api
                .download_media(&meta.url)
                .await
                .with_context(|| format!("Failed to download {}", meta.url))?;
            Some(bytes)
        } else {
            None
        };

        let folder_id = match &meta.folder_path {
            Some(path) => Operation::create_folder(path.clone())
                .execute(self.target_api)
                .await
                .into_result()?
                .map(|folder| folder.id),
            None => None,
        };

        let mut upload = MediaUpload::from_meta(&meta, folder_id, bytes);
        self.keep_excluded_media_fields(&mut upload, source, result);

        let operation = match target_file {
            Some(file_id) => Operation::update_media(file_id, upload),
            None => Operation::upload_media(upload),
        };
        operation
            .execute(self.target_api)
            .await
            .into_result()?
            .context("Target returned no file identity")
    }

    /// Excluded metadata keeps the target's current value
    fn keep_excluded_media_fields(&self, upload: &mut MediaUpload, source: &Entity, result: &ComparisonResult) {
        let target_meta = result
            .target
            .as_ref()
            .and_then(|t| self.snapshot.target.media_meta(t.id));

        for field in self.exclusions.excluded_fields(MEDIA_TYPE, &source.document_id) {
            if !MEDIA_FIELDS.contains(&field) {
                continue;
            }
            match (field, target_meta) {
                ("name", Some(meta)) => upload.name = meta.name.clone(),
                ("alternativeText", meta) => {
                    upload.alternative_text = meta.and_then(|m| m.alternative_text.clone())
                }
                ("caption", meta) => upload.caption = meta.and_then(|m| m.caption.clone()),
                _ => {}
            }
        }
    }

    async fn delete(&self, item: &PlanItem, mappings: &IdMappingTable) -> Result<Applied> {
        let result = self.result_for(&item.key)?;
        let mapping = mappings.target_for(&item.key);

        let operation = if item.key.is_media() {
            let file_id = result
                .target
                .as_ref()
                .map(|t| t.id)
                .or_else(|| mapping.map(|m| m.target_id))
                .ok_or_else(|| anyhow!("{} has no target file to delete", item.key))?;
            Operation::delete_media(file_id)
        } else {
            let document_id = result
                .target_document()
                .map(str::to_string)
                .or_else(|| mapping.map(|m| m.target_document_id.clone()))
                .ok_or_else(|| anyhow!("{} has no target row to delete", item.key))?;
            let entry = EntryTarget::new(&item.key.content_type, result.content_kind, item.key.locale.clone());
            Operation::delete_entry(entry, document_id)
        };

        let target_key = match &operation {
            Operation::DeleteEntry { document_id, .. } => {
                EntityKey::new(&item.key.content_type, document_id).with_locale(item.key.locale.clone())
            }
            _ => result
                .target
                .as_ref()
                .map(Entity::key)
                .unwrap_or_else(|| item.key.clone()),
        };

        operation.execute(self.target_api).await.into_result()?;
        Ok(Applied {
            written: None,
            dropped: Vec::new(),
            mapping_change: Some(MappingChange::Remove(target_key)),
        })
    }
}

fn mapping_for(source: &Entity, written: &CreatedEntry) -> IdMapping {
    IdMapping::new(
        &source.content_type,
        source.locale.clone(),
        (&source.document_id, source.id),
        (&written.document_id, written.id),
    )
}

fn apply_mapping_change(outcome: &ItemOutcome, mappings: &mut IdMappingTable) {
    match &outcome.mapping_change {
        Some(MappingChange::Upsert(mapping)) => mappings.upsert(mapping.clone()),
        Some(MappingChange::Remove(target)) => {
            mappings.remove_target(target);
        }
        None => {}
    }
}

/// Index of the cyclic item to run next
///
/// Fewest unresolved incoming circular edges first, then items whose partner
/// already succeeded, then by key.
fn next_circular(remaining: &[&PlanItem], edges: &[PlanEdge], succeeded: &HashSet<EntityKey>) -> usize {
    remaining
        .iter()
        .enumerate()
        .min_by_key(|(_, item)| {
            let unresolved = edges
                .iter()
                .filter(|e| e.to == item.key && !succeeded.contains(&e.from))
                .count();
            let partner_succeeded = edges.iter().any(|e| {
                (e.to == item.key && succeeded.contains(&e.from))
                    || (e.from == item.key && succeeded.contains(&e.to))
            });
            (unresolved, !partner_succeeded, item.key.clone())
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::content::MediaFile;
    use crate::api::memory::MemoryContentApi;
    use crate::sync::comparator::Comparator;
    use crate::sync::fingerprint::SimilarityConfig;
    use crate::sync::planner::{TargetPresence, plan};
    use crate::sync::references::marker;
    use crate::sync::relationships::{RelationshipIndex, propagate};
    use crate::sync::snapshot::test_support::{entity, instance, snapshot};
    use crate::sync::types::{InstanceSide, Link, LinkKind, LinkOrigin, MediaMeta, Selection};
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    const ARTICLE: &str = "api::article.article";

    fn linked(id: i64, doc: &str, title: &str, field: &str, target: i64) -> Entity {
        let mut e = entity(ARTICLE, id, doc, json!({"title": title, field: marker(ARTICLE, target)}));
        e.links.push(Link {
            field_path: field.to_string(),
            target_type: ARTICLE.to_string(),
            target_id: target,
            kind: LinkKind::Relation,
            origin: LinkOrigin::Direct,
            position: 0,
        });
        e
    }

    struct Run {
        target: MemoryContentApi,
        report: MergeReport,
        mappings: IdMappingTable,
        plan: Plan,
    }

    async fn run(snap: Snapshot, selections: Vec<Selection>, target: MemoryContentApi) -> Run {
        let source = MemoryContentApi::new("source");
        let exclusions = ExclusionSet::default();
        let mut mappings = IdMappingTable::new();
        let comparison = Comparator::new(&snap, &exclusions, SimilarityConfig::default()).run(&mut mappings);
        let index = RelationshipIndex::new(propagate(&snap, &comparison, &exclusions));
        let presence = TargetPresence::collect(&comparison, &mappings, []);
        let plan = plan(&selections, &index, &presence);

        let report = MergeProcessor::new(&source, &target, &snap, &comparison, &exclusions)
            .with_parallelism(2)
            .apply(&plan, &mut mappings)
            .await;
        Run {
            target,
            report,
            mappings,
            plan,
        }
    }

    #[tokio::test]
    async fn test_dependency_created_first_and_reference_translated() {
        let snap = snapshot(
            vec![
                linked(1, "e1", "E1", "cover", 2),
                entity(ARTICLE, 2, "e2", json!({"title": "E2"})),
            ],
            Vec::new(),
        );
        let selections = vec![
            Selection::new(EntityKey::new(ARTICLE, "e1"), Direction::Create),
            Selection::new(EntityKey::new(ARTICLE, "e2"), Direction::Create),
        ];

        let run = run(snap, selections, MemoryContentApi::new("target")).await;

        assert_eq!(run.target.writes(), vec![
            format!("create {} E2", ARTICLE),
            format!("create {} E1", ARTICLE),
        ]);
        let e2 = run.mappings.target_for(&EntityKey::new(ARTICLE, "e2")).unwrap();
        let e1 = run.mappings.target_for(&EntityKey::new(ARTICLE, "e1")).unwrap();
        let row = run.target.row_by_document(ARTICLE, &e1.target_document_id).unwrap();
        assert_eq!(row["cover"], json!(e2.target_document_id));
        assert!(run.report.all_succeeded());
        assert!(run.report.repatched.is_empty());
    }

    #[tokio::test]
    async fn test_mutual_partners_resolved_by_circular_pass() {
        let snap = snapshot(
            vec![
                linked(1, "e1", "E1", "partner", 2),
                linked(2, "e2", "E2", "partner", 1),
            ],
            Vec::new(),
        );
        let selections = vec![
            Selection::new(EntityKey::new(ARTICLE, "e1"), Direction::Create),
            Selection::new(EntityKey::new(ARTICLE, "e2"), Direction::Create),
        ];

        let run = run(snap, selections, MemoryContentApi::new("target")).await;
        assert!(run.plan.batches.is_empty());
        assert_eq!(run.plan.circular_edges.len(), 2);

        let e1 = run.mappings.target_for(&EntityKey::new(ARTICLE, "e1")).unwrap().clone();
        let e2 = run.mappings.target_for(&EntityKey::new(ARTICLE, "e2")).unwrap().clone();
        assert_eq!(run.target.writes(), vec![
            format!("create {} E1", ARTICLE),
            format!("create {} E2", ARTICLE),
            format!("update {} {}", ARTICLE, e1.target_document_id),
        ]);

        let first = run.report.outcome(&EntityKey::new(ARTICLE, "e1")).unwrap();
        assert_eq!(first.phase, MergePhase::Circular);
        assert!(first.dropped.is_empty());
        assert_eq!(run.report.repatched, vec![EntityKey::new(ARTICLE, "e1")]);

        let row1 = run.target.row_by_document(ARTICLE, &e1.target_document_id).unwrap();
        let row2 = run.target.row_by_document(ARTICLE, &e2.target_document_id).unwrap();
        assert_eq!(row1["partner"], json!(e2.target_document_id));
        assert_eq!(row2["partner"], json!(e1.target_document_id));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_batches() {
        let snap = snapshot(
            vec![
                linked(1, "e1", "E1", "cover", 2),
                entity(ARTICLE, 2, "e2", json!({"title": "E2"})),
                entity(ARTICLE, 3, "e3", json!({"title": "E3"})),
            ],
            Vec::new(),
        );
        let target = MemoryContentApi::new("target");
        target.fail_document("E2");
        let selections = vec![
            Selection::new(EntityKey::new(ARTICLE, "e1"), Direction::Create),
            Selection::new(EntityKey::new(ARTICLE, "e2"), Direction::Create),
            Selection::new(EntityKey::new(ARTICLE, "e3"), Direction::Create),
        ];

        let run = run(snap, selections, target).await;

        assert_eq!(run.report.failed_count(), 1);
        let e1 = run.report.outcome(&EntityKey::new(ARTICLE, "e1")).unwrap();
        assert!(e1.succeeded());
        assert_eq!(e1.dropped.len(), 1);
        assert!(run.target.rows_of(ARTICLE).iter().all(|row| row.get("cover").is_none()));
        assert!(!run.report.all_succeeded());
    }

    #[tokio::test]
    async fn test_delete_removes_target_row_and_mapping() {
        let snap = snapshot(
            Vec::new(),
            vec![entity(ARTICLE, 70, "gone", json!({"title": "Old"}))],
        );
        let target = MemoryContentApi::new("target");
        target.add_row(ARTICLE, json!({"id": 70, "documentId": "gone", "title": "Old"}));

        let run = run(
            snap,
            vec![Selection::new(EntityKey::new(ARTICLE, "gone"), Direction::Delete)],
            target,
        )
        .await;

        assert!(run.report.all_succeeded());
        assert_eq!(run.report.outcomes[0].phase, MergePhase::Deletion);
        assert!(run.target.rows_of(ARTICLE).is_empty());
        assert!(run.mappings.source_for(&EntityKey::new(ARTICLE, "gone")).is_none());
    }

    #[tokio::test]
    async fn test_media_upload_creates_folder_and_copies_bytes() {
        let meta = MediaMeta {
            name: "hero.png".to_string(),
            alternative_text: Some("Hero".to_string()),
            mime: "image/png".to_string(),
            ext: ".png".to_string(),
            size_kb: 1.0,
            url: "/uploads/hero.png".to_string(),
            folder_path: Some("/marketing".to_string()),
            ..Default::default()
        };
        let mut media = BTreeMap::new();
        media.insert(5, meta.clone());
        let source_data = crate::sync::snapshot::InstanceData::new(
            InstanceSide::Source,
            vec![entity(MEDIA_TYPE, 5, "f5", crate::sync::clean::clean_media(&meta))],
            media,
            BTreeSet::from([MEDIA_TYPE.to_string()]),
        );
        let snap = Snapshot {
            source: source_data,
            target: instance(InstanceSide::Target, Vec::new()),
            ..snapshot(Vec::new(), Vec::new())
        };

        let exclusions = ExclusionSet::default();
        let mut mappings = IdMappingTable::new();
        let comparison = Comparator::new(&snap, &exclusions, SimilarityConfig::default()).run(&mut mappings);
        let selections = vec![Selection::new(EntityKey::new(MEDIA_TYPE, "f5"), Direction::Create)];
        let index = RelationshipIndex::new(propagate(&snap, &comparison, &exclusions));
        let plan = plan(&selections, &index, &TargetPresence::default());

        let source = MemoryContentApi::new("source");
        source.add_media(
            MediaFile {
                id: 5,
                document_id: "f5".to_string(),
                updated_at: Utc::now(),
                meta: meta.clone(),
            },
            vec![1, 2, 3],
        );
        let target = MemoryContentApi::new("target");

        let report = MergeProcessor::new(&source, &target, &snap, &comparison, &exclusions)
            .apply(&plan, &mut mappings)
            .await;

        assert!(report.all_succeeded());
        assert_eq!(target.folders(), vec!["/marketing".to_string()]);
        let files = target.media_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].meta.alternative_text.as_deref(), Some("Hero"));
        assert_eq!(
            mappings.target_for(&EntityKey::new(MEDIA_TYPE, "f5")).unwrap().target_id,
            files[0].id
        );
    }

    #[test]
    fn test_next_circular_prefers_resolved_items() {
        let a = PlanItem {
            key: EntityKey::new(ARTICLE, "a"),
            direction: Direction::Create,
        };
        let b = PlanItem {
            key: EntityKey::new(ARTICLE, "b"),
            direction: Direction::Create,
        };
        let c = PlanItem {
            key: EntityKey::new(ARTICLE, "c"),
            direction: Direction::Create,
        };
        let edge = |from: &PlanItem, to: &PlanItem| PlanEdge {
            from: from.key.clone(),
            to: to.key.clone(),
            field_path: "partner".to_string(),
        };
        // a <-> b, c depends on both
        let edges = vec![edge(&a, &b), edge(&b, &a), edge(&a, &c), edge(&b, &c)];

        let mut succeeded = HashSet::new();
        assert_eq!(next_circular(&[&a, &b, &c], &edges, &succeeded), 0);

        succeeded.insert(a.key.clone());
        assert_eq!(next_circular(&[&b, &c], &edges, &succeeded), 0);

        succeeded.insert(b.key.clone());
        assert_eq!(next_circular(&[&c], &edges, &succeeded), 0);
    }
}
