//! Cross-instance id mappings
//!
//! Pairs a source document with the target document it was matched to or
//! created as. The table is loaded from the repository at pass start,
//! sanitized against the fresh snapshot, mutated by the comparator and the
//! merge processor, and written back through [`IdMappingTable::take_changes`].
//!
//! Mappings stay one-to-one per (type, locale): pairing a source document with
//! a new target evicts any mapping that previously claimed either side.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::snapshot::Snapshot;
use crate::sync::types::EntityKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdMapping {
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub source_document_id: String,
    pub source_id: i64,
    pub target_document_id: String,
    pub target_id: i64,
    pub updated_at: DateTime<Utc>,
}

impl IdMapping {
    pub fn new(
        content_type: impl Into<String>,
        locale: Option<String>,
        source: (&str, i64),
        target: (&str, i64),
    ) -> Self {
        Self {
            content_type: content_type.into(),
            locale,
            source_document_id: source.0.to_string(),
            source_id: source.1,
            target_document_id: target.0.to_string(),
            target_id: target.1,
            updated_at: Utc::now(),
        }
    }

    pub fn source_key(&self) -> EntityKey {
        EntityKey::new(&self.content_type, &self.source_document_id)
            .with_locale(self.locale.clone())
    }

    pub fn target_key(&self) -> EntityKey {
        EntityKey::new(&self.content_type, &self.target_document_id)
            .with_locale(self.locale.clone())
    }
}

/// In-memory mapping table for one instance pair
#[derive(Debug, Clone, Default)]
pub struct IdMappingTable {
    /// Keyed by the source-side entity key
    by_source: HashMap<EntityKey, IdMapping>,
    /// Target-side entity key -> source-side entity key
    by_target: HashMap<EntityKey, EntityKey>,
    dirty: BTreeSet<EntityKey>,
    removed: Vec<IdMapping>,
}

impl IdMappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from persisted mappings without marking anything dirty
    pub fn from_mappings(mappings: Vec<IdMapping>) -> Self {
        let mut table = Self::new();
        for mapping in mappings {
            table.insert(mapping);
        }
        table.dirty.clear();
        table.removed.clear();
        table
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdMapping> {
        self.by_source.values()
    }

    /// Mapping for a source document
    pub fn target_for(&self, source: &EntityKey) -> Option<&IdMapping> {
        self.by_source.get(source)
    }

    /// Mapping for a target document
    pub fn source_for(&self, target: &EntityKey) -> Option<&IdMapping> {
        self.by_target
            .get(target)
            .and_then(|source| self.by_source.get(source))
    }

    /// Record a pairing, evicting any mapping that conflicts on either side
    pub fn upsert(&mut self, mapping: IdMapping) {
        if let Some(existing) = self.by_source.get(&mapping.source_key()) {
            if existing.target_document_id == mapping.target_document_id
                && existing.source_id == mapping.source_id
                && existing.target_id == mapping.target_id
            {
                return;
            }
        }
        self.insert(mapping);
    }

    fn insert(&mut self, mapping: IdMapping) {
        let source_key = mapping.source_key();
        let target_key = mapping.target_key();

        if let Some(previous) = self.by_source.remove(&source_key) {
            self.by_target.remove(&previous.target_key());
            if previous.target_document_id != mapping.target_document_id {
                self.removed.push(previous);
            }
        }
        if let Some(other_source) = self.by_target.remove(&target_key) {
            if let Some(previous) = self.by_source.remove(&other_source) {
                log::debug!(
                    "Target {} re-paired from {} to {}",
                    target_key,
                    previous.source_document_id,
                    mapping.source_document_id
                );
                self.dirty.remove(&other_source);
                self.removed.push(previous);
            }
        }

        self.by_target.insert(target_key, source_key.clone());
        self.by_source.insert(source_key.clone(), mapping);
        self.dirty.insert(source_key);
    }

    /// Drop the mapping of a source document
    pub fn remove_source(&mut self, source: &EntityKey) -> Option<IdMapping> {
        let mapping = self.by_source.remove(source)?;
        self.by_target.remove(&mapping.target_key());
        self.dirty.remove(source);
        self.removed.push(mapping.clone());
        Some(mapping)
    }

    /// Drop the mapping of a target document
    pub fn remove_target(&mut self, target: &EntityKey) -> Option<IdMapping> {
        let source = self.by_target.get(target)?.clone();
        self.remove_source(&source)
    }

    /// Prune mappings whose documents vanished from a fresh snapshot
    ///
    /// Only content types that loaded on both sides are judged; a type that
    /// failed to load keeps its mappings untouched. Surviving mappings get their
    /// internal ids refreshed.
    pub fn sanitize(&mut self, snapshot: &Snapshot) -> usize {
        let mut stale = Vec::new();
        let mut refreshed = Vec::new();

        for (key, mapping) in &self.by_source {
            if !snapshot.source.is_loaded(&mapping.content_type)
                || !snapshot.target.is_loaded(&mapping.content_type)
            {
                continue;
            }

            let source = snapshot.source.get_by_key(key);
            let target = snapshot.target.get_by_key(&mapping.target_key());
            match (source, target) {
                (Some(source), Some(target)) => {
                    if source.id != mapping.source_id || target.id != mapping.target_id {
                        let mut updated = mapping.clone();
                        updated.source_id = source.id;
                        updated.target_id = target.id;
                        updated.updated_at = Utc::now();
                        refreshed.push(updated);
                    }
                }
                _ => stale.push(key.clone()),
            }
        }

        for key in &stale {
            self.remove_source(key);
        }
        for mapping in refreshed {
            self.insert(mapping);
        }

        if !stale.is_empty() {
            log::info!("Pruned {} stale id mapping(s)", stale.len());
        }
        stale.len()
    }

    /// Mappings changed since the last call, and mappings removed since then
    pub fn take_changes(&mut self) -> (Vec<IdMapping>, Vec<IdMapping>) {
        let upserts = std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|key| self.by_source.get(&key).cloned())
            .collect();
        let removed = std::mem::take(&mut self.removed);
        (upserts, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::snapshot::test_support::{entity, snapshot};
    use serde_json::json;

    const ARTICLE: &str = "api::article.article";

    #[test]
    fn test_upsert_and_lookup_both_ways() {
        let mut table = IdMappingTable::new();
        table.upsert(IdMapping::new(ARTICLE, None, ("s1", 1), ("t1", 10)));

        let mapping = table.target_for(&EntityKey::new(ARTICLE, "s1")).unwrap();
        assert_eq!(mapping.target_id, 10);
        let mapping = table.source_for(&EntityKey::new(ARTICLE, "t1")).unwrap();
        assert_eq!(mapping.source_document_id, "s1");
    }

    #[test]
    fn test_repairing_target_evicts_previous_source() {
        let mut table = IdMappingTable::new();
        table.upsert(IdMapping::new(ARTICLE, None, ("s1", 1), ("t1", 10)));
        table.upsert(IdMapping::new(ARTICLE, None, ("s2", 2), ("t1", 10)));

        assert_eq!(table.len(), 1);
        assert!(table.target_for(&EntityKey::new(ARTICLE, "s1")).is_none());

        let (upserts, removed) = table.take_changes();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].source_document_id, "s2");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].source_document_id, "s1");
    }

    #[test]
    fn test_loaded_mappings_are_not_dirty() {
        let mut table =
            IdMappingTable::from_mappings(vec![IdMapping::new(ARTICLE, None, ("s1", 1), ("t1", 10))]);
        let (upserts, removed) = table.take_changes();
        assert!(upserts.is_empty());
        assert!(removed.is_empty());

        table.upsert(IdMapping::new(ARTICLE, None, ("s1", 1), ("t1", 10)));
        assert!(table.take_changes().0.is_empty());
    }

    #[test]
    fn test_sanitize_prunes_vanished_and_refreshes_ids() {
        let mut table = IdMappingTable::from_mappings(vec![
            IdMapping::new(ARTICLE, None, ("s1", 1), ("t1", 10)),
            IdMapping::new(ARTICLE, None, ("s2", 2), ("gone", 20)),
            IdMapping::new("api::tag.tag", None, ("x", 3), ("y", 30)),
        ]);

        let snap = snapshot(
            vec![
                entity(ARTICLE, 5, "s1", json!({})),
                entity(ARTICLE, 2, "s2", json!({})),
            ],
            vec![entity(ARTICLE, 10, "t1", json!({}))],
        );

        assert_eq!(table.sanitize(&snap), 1);
        assert_eq!(table.target_for(&EntityKey::new(ARTICLE, "s1")).unwrap().source_id, 5);
        // tags did not load, their mapping stays
        assert!(table.target_for(&EntityKey::new("api::tag.tag", "x")).is_some());

        let (upserts, removed) = table.take_changes();
        assert_eq!(upserts.len(), 1);
        assert_eq!(removed[0].target_document_id, "gone");
    }

    #[test]
    fn test_remove_target() {
        let mut table = IdMappingTable::new();
        table.upsert(IdMapping::new(ARTICLE, None, ("s1", 1), ("t1", 10)));
        assert!(table.remove_target(&EntityKey::new(ARTICLE, "t1")).is_some());
        assert!(table.is_empty());
    }
}
