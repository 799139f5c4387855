//! Structural diff between the two instances
//!
//! The comparator pairs rows across instances, then classifies every pair.
//! Pairing runs for all content types and media before any classification so
//! that reference canonicalization sees every mapping established this pass.

mod media;
mod records;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

pub use media::MediaPairing;
pub use records::canonicalize;

use crate::sync::error::SyncError;
use crate::sync::exclusions::ExclusionSet;
use crate::sync::fingerprint::SimilarityConfig;
use crate::sync::id_mapping::IdMappingTable;
use crate::sync::schema::SchemaCheck;
use crate::sync::snapshot::Snapshot;
use crate::sync::types::{
    ComparisonResult, ComparisonState, ContentKind, Entity, EntityKey, MEDIA_TYPE,
};

/// Rows paired across instances, prior to classification
pub(crate) struct Pair<'s> {
    pub key: EntityKey,
    pub kind: ContentKind,
    pub source: Option<&'s Entity>,
    pub target: Option<&'s Entity>,
}

/// Classified results of one comparison pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "OutcomeRepr", into = "OutcomeRepr")]
pub struct ComparisonOutcome {
    results: BTreeMap<EntityKey, ComparisonResult>,
    /// Target-side key -> result key
    target_index: HashMap<EntityKey, EntityKey>,
    pub media_pairings: Vec<MediaPairing>,
}

#[derive(Serialize, Deserialize)]
struct OutcomeRepr {
    results: Vec<ComparisonResult>,
    #[serde(default)]
    media_pairings: Vec<MediaPairing>,
}

impl From<OutcomeRepr> for ComparisonOutcome {
    fn from(repr: OutcomeRepr) -> Self {
        let mut outcome = ComparisonOutcome {
            media_pairings: repr.media_pairings,
            ..Default::default()
        };
        for result in repr.results {
            outcome.insert(result);
        }
        outcome
    }
}

impl From<ComparisonOutcome> for OutcomeRepr {
    fn from(outcome: ComparisonOutcome) -> Self {
        Self {
            results: outcome.results.into_values().collect(),
            media_pairings: outcome.media_pairings,
        }
    }
}

impl ComparisonOutcome {
    fn insert(&mut self, result: ComparisonResult) {
        if self.results.contains_key(&result.key) {
            log::warn!("Duplicate comparison key {}, keeping the first result", result.key);
            return;
        }
        if let Some(target) = &result.target {
            self.target_index.insert(target.key(), result.key.clone());
        }
        self.results.insert(result.key.clone(), result);
    }

    pub fn get(&self, key: &EntityKey) -> Option<&ComparisonResult> {
        self.results.get(key)
    }

    pub fn state_of(&self, key: &EntityKey) -> Option<ComparisonState> {
        self.results.get(key).map(|r| r.state)
    }

    /// Result key under which a target-side entity was classified
    pub fn key_for_target(&self, target: &EntityKey) -> Option<&EntityKey> {
        self.target_index.get(target)
    }

    pub fn results(&self) -> impl Iterator<Item = &ComparisonResult> {
        self.results.values()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn summary(&self) -> ComparisonSummary {
        let mut summary = ComparisonSummary::default();
        for result in self.results.values() {
            summary.total.add(result.state);
            summary
                .by_type
                .entry(result.key.content_type.clone())
                .or_default()
                .add(result.state);
        }
        summary
    }
}

/// Number of results per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub only_in_source: usize,
    pub only_in_target: usize,
    pub different: usize,
    pub identical: usize,
    pub excluded: usize,
}

impl StateCounts {
    pub fn add(&mut self, state: ComparisonState) {
        match state {
            ComparisonState::OnlyInSource => self.only_in_source += 1,
            ComparisonState::OnlyInTarget => self.only_in_target += 1,
            ComparisonState::Different => self.different += 1,
            ComparisonState::Identical => self.identical += 1,
            ComparisonState::Excluded => self.excluded += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.only_in_source + self.only_in_target + self.different + self.identical + self.excluded
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total: StateCounts,
    pub by_type: BTreeMap<String, StateCounts>,
}

/// Compares one snapshot
pub struct Comparator<'a> {
    snapshot: &'a Snapshot,
    exclusions: &'a ExclusionSet,
    similarity: SimilarityConfig,
}

impl<'a> Comparator<'a> {
    pub fn new(snapshot: &'a Snapshot, exclusions: &'a ExclusionSet, similarity: SimilarityConfig) -> Self {
        Self {
            snapshot,
            exclusions,
            similarity,
        }
    }

    /// Content types to compare: every schema type plus anything loaded
    fn content_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .snapshot
            .source_schema
            .content_types
            .keys()
            .cloned()
            .chain(self.snapshot.source.content_types().into_iter().map(str::to_string))
            .chain(self.snapshot.target.content_types().into_iter().map(str::to_string))
            .filter(|t| t != MEDIA_TYPE)
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Pair and classify every entity; mappings are upserted for every pair found
    pub fn run(&self, mappings: &mut IdMappingTable) -> ComparisonOutcome {
        let mut pairs = Vec::new();

        for content_type in self.content_types() {
            match self.snapshot.source_schema.kind_of(&content_type) {
                ContentKind::SingleType => {
                    pairs.extend(records::pair_single(self.snapshot, &content_type, mappings))
                }
                ContentKind::CollectionType => {
                    let unique: Vec<&str> = self
                        .snapshot
                        .source_schema
                        .content_type(&content_type)
                        .map(|schema| schema.unique_fields())
                        .unwrap_or_default();
                    pairs.extend(records::pair_collection(
                        self.snapshot,
                        &content_type,
                        &unique,
                        mappings,
                    ))
                }
            }
        }

        let (media_pairs, media_pairings) = media::pair_media(self.snapshot, mappings, &self.similarity);
        pairs.extend(media_pairs);

        let mut outcome = ComparisonOutcome {
            media_pairings,
            ..Default::default()
        };
        for pair in pairs {
            outcome.insert(self.classify(pair, mappings));
        }

        let summary = outcome.summary().total;
        log::info!(
            "Compared {} entities: {} only in source, {} only in target, {} different, {} identical, {} excluded",
            summary.total(),
            summary.only_in_source,
            summary.only_in_target,
            summary.different,
            summary.identical,
            summary.excluded
        );

        outcome
    }

    fn classify(&self, pair: Pair<'_>, mappings: &IdMappingTable) -> ComparisonResult {
        let excluded = self.exclusions.excludes_entity(&pair.key)
            || pair
                .target
                .map(|t| self.exclusions.excludes_entity(&t.key()))
                .unwrap_or(false);

        let (state, changed_fields) = match (pair.source, pair.target) {
            _ if excluded => (ComparisonState::Excluded, Vec::new()),
            (Some(_), None) => (ComparisonState::OnlyInSource, Vec::new()),
            (None, Some(_)) => (ComparisonState::OnlyInTarget, Vec::new()),
            (Some(source), Some(target)) => {
                let fields = if source.is_media() {
                    media::media_differences(self.snapshot, source, target, &self.similarity, self.exclusions)
                } else {
                    records::entry_differences(source, target, self.snapshot, mappings, self.exclusions)
                };
                if fields.is_empty() {
                    (ComparisonState::Identical, fields)
                } else {
                    (ComparisonState::Different, fields)
                }
            }
            (None, None) => (ComparisonState::Identical, Vec::new()),
        };

        let target_document_id = match (pair.source, pair.target) {
            (Some(s), Some(t)) if s.document_id != t.document_id => Some(t.document_id.clone()),
            _ => None,
        };

        ComparisonResult {
            key: pair.key,
            content_kind: pair.kind,
            state,
            source: pair.source.cloned(),
            target: pair.target.cloned(),
            target_document_id,
            changed_fields,
        }
    }
}

/// Compare a snapshot, refusing to run when the schemas are incompatible
pub fn compare(
    snapshot: &Snapshot,
    schema_check: &SchemaCheck,
    mappings: &mut IdMappingTable,
    exclusions: &ExclusionSet,
    similarity: SimilarityConfig,
) -> Result<ComparisonOutcome, SyncError> {
    schema_check.ensure_compatible()?;
    Ok(Comparator::new(snapshot, exclusions, similarity).run(mappings))
}
