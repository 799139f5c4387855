//! Immutable per-pass view of both instances
//!
//! A [`Snapshot`] is produced once by the loader and then shared by reference
//! with the comparator, the extractor and the planner. Nothing in it changes
//! after construction; a new pass builds a new snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::metadata::SchemaRegistry;
use crate::sync::fingerprint::Fingerprint;
use crate::sync::types::{Entity, EntityKey, InstanceSide, Link, MediaMeta};

/// Entities, media metadata and fingerprints of one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "InstanceDataRepr", into = "InstanceDataRepr")]
pub struct InstanceData {
    pub side: InstanceSide,
    entities: Vec<Entity>,
    media: BTreeMap<i64, MediaMeta>,
    fingerprints: BTreeMap<i64, Fingerprint>,
    /// Content types whose rows were fetched successfully
    loaded_types: BTreeSet<String>,
    by_id: HashMap<(String, i64), usize>,
    by_key: HashMap<EntityKey, usize>,
    by_document: HashMap<String, Vec<usize>>,
}

#[derive(Serialize, Deserialize)]
struct InstanceDataRepr {
    side: InstanceSide,
    entities: Vec<Entity>,
    media: BTreeMap<i64, MediaMeta>,
    #[serde(default)]
    fingerprints: BTreeMap<i64, Fingerprint>,
    loaded_types: BTreeSet<String>,
}

impl From<InstanceDataRepr> for InstanceData {
    fn from(repr: InstanceDataRepr) -> Self {
        let mut data = InstanceData::new(repr.side, repr.entities, repr.media, repr.loaded_types);
        data.fingerprints = repr.fingerprints;
        data
    }
}

impl From<InstanceData> for InstanceDataRepr {
    fn from(data: InstanceData) -> Self {
        Self {
            side: data.side,
            entities: data.entities,
            media: data.media,
            fingerprints: data.fingerprints,
            loaded_types: data.loaded_types,
        }
    }
}

impl InstanceData {
    pub fn new(
        side: InstanceSide,
        entities: Vec<Entity>,
        media: BTreeMap<i64, MediaMeta>,
        loaded_types: BTreeSet<String>,
    ) -> Self {
        let mut data = Self {
            side,
            entities,
            media,
            fingerprints: BTreeMap::new(),
            loaded_types,
            by_id: HashMap::new(),
            by_key: HashMap::new(),
            by_document: HashMap::new(),
        };
        data.reindex();
        data
    }

    pub fn empty(side: InstanceSide) -> Self {
        Self::new(side, Vec::new(), BTreeMap::new(), BTreeSet::new())
    }

    fn reindex(&mut self) {
        self.by_id.clear();
        self.by_key.clear();
        self.by_document.clear();

        for (idx, entity) in self.entities.iter().enumerate() {
            self.by_id
                .insert((entity.content_type.clone(), entity.id), idx);
            if self.by_key.insert(entity.key(), idx).is_some() {
                log::warn!(
                    "Duplicate document {} on {}, keeping the last row",
                    entity.key(),
                    self.side.label()
                );
            }
            self.by_document
                .entry(entity.document_id.clone())
                .or_default()
                .push(idx);
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Entities of one content type, in load order
    pub fn entities_of<'a>(&'a self, content_type: &str) -> impl Iterator<Item = &'a Entity> + use<'a> {
        let content_type = content_type.to_string();
        self.entities
            .iter()
            .filter(move |e| e.content_type == content_type)
    }

    /// Content types present in this instance's entities
    pub fn content_types(&self) -> BTreeSet<&str> {
        self.entities.iter().map(|e| e.content_type.as_str()).collect()
    }

    pub fn get(&self, content_type: &str, id: i64) -> Option<&Entity> {
        self.by_id
            .get(&(content_type.to_string(), id))
            .map(|idx| &self.entities[*idx])
    }

    pub fn get_by_key(&self, key: &EntityKey) -> Option<&Entity> {
        self.by_key.get(key).map(|idx| &self.entities[*idx])
    }

    /// All entities (any type, any locale) carrying a document id
    pub fn find_by_document_id(&self, document_id: &str) -> Vec<&Entity> {
        self.by_document
            .get(document_id)
            .map(|idxs| idxs.iter().map(|idx| &self.entities[*idx]).collect())
            .unwrap_or_default()
    }

    /// Document id of the entity addressed by (type, internal id)
    pub fn document_id_of(&self, content_type: &str, id: i64) -> Option<&str> {
        self.get(content_type, id).map(|e| e.document_id.as_str())
    }

    pub fn media_meta(&self, file_id: i64) -> Option<&MediaMeta> {
        self.media.get(&file_id)
    }

    pub fn media(&self) -> impl Iterator<Item = (&i64, &MediaMeta)> {
        self.media.iter()
    }

    pub fn fingerprint(&self, file_id: i64) -> Option<&Fingerprint> {
        self.fingerprints.get(&file_id)
    }

    /// Attach extracted links, one list per entity in load order
    pub fn attach_links(&mut self, links: Vec<Vec<Link>>) {
        for (entity, links) in self.entities.iter_mut().zip(links) {
            entity.links = links;
        }
    }

    pub fn set_fingerprints(&mut self, fingerprints: BTreeMap<i64, Fingerprint>) {
        self.fingerprints = fingerprints;
    }

    pub fn is_loaded(&self, content_type: &str) -> bool {
        self.loaded_types.contains(content_type)
    }

    pub fn loaded_types(&self) -> &BTreeSet<String> {
        &self.loaded_types
    }
}

/// Both instances as seen at the start of a pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub source: InstanceData,
    pub target: InstanceData,
    pub source_schema: SchemaRegistry,
    pub target_schema: SchemaRegistry,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn side(&self, side: InstanceSide) -> &InstanceData {
        match side {
            InstanceSide::Source => &self.source,
            InstanceSide::Target => &self.target,
        }
    }

    pub fn schema(&self, side: InstanceSide) -> &SchemaRegistry {
        match side {
            InstanceSide::Source => &self.source_schema,
            InstanceSide::Target => &self.target_schema,
        }
    }

    /// Copy of the snapshot with source and target roles exchanged
    pub fn swapped(&self) -> Snapshot {
        let mut source = self.target.clone();
        source.side = InstanceSide::Source;
        let mut target = self.source.clone();
        target.side = InstanceSide::Target;

        Snapshot {
            source,
            target,
            source_schema: self.target_schema.clone(),
            target_schema: self.source_schema.clone(),
            captured_at: self.captured_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use serde_json::Value;

    pub fn entity(content_type: &str, id: i64, document_id: &str, cleaned: Value) -> Entity {
        Entity {
            content_type: content_type.to_string(),
            id,
            document_id: document_id.to_string(),
            locale: None,
            updated_at: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            raw: cleaned.clone(),
            cleaned,
            links: Vec::new(),
        }
    }

    pub fn instance(side: InstanceSide, entities: Vec<Entity>) -> InstanceData {
        let loaded = entities.iter().map(|e| e.content_type.clone()).collect();
        InstanceData::new(side, entities, BTreeMap::new(), loaded)
    }

    pub fn snapshot(source: Vec<Entity>, target: Vec<Entity>) -> Snapshot {
        Snapshot {
            source: instance(InstanceSide::Source, source),
            target: instance(InstanceSide::Target, target),
            source_schema: SchemaRegistry::default(),
            target_schema: SchemaRegistry::default(),
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookups() {
        let data = instance(
            InstanceSide::Source,
            vec![
                entity("api::article.article", 1, "a1", json!({"title": "x"})),
                entity("api::author.author", 2, "b2", json!({"name": "y"})),
            ],
        );

        assert_eq!(data.document_id_of("api::article.article", 1), Some("a1"));
        assert!(data.get("api::article.article", 2).is_none());
        assert_eq!(data.find_by_document_id("b2").len(), 1);
        assert_eq!(data.entities_of("api::author.author").count(), 1);
        assert!(data.is_loaded("api::article.article"));
        assert!(!data.is_loaded("api::tag.tag"));
    }

    #[test]
    fn test_entities_of_outlives_type_name() {
        let data = instance(
            InstanceSide::Source,
            vec![entity("api::article.article", 1, "a1", json!({}))],
        );
        let articles = {
            let content_type = format!("api::{}.{}", "article", "article");
            data.entities_of(&content_type)
        };
        assert_eq!(articles.map(|e| e.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_indexes_survive_serde() {
        let data = instance(
            InstanceSide::Target,
            vec![entity("api::article.article", 7, "a7", json!({}))],
        );
        let json = serde_json::to_string(&data).unwrap();
        let restored: InstanceData = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.side, InstanceSide::Target);
        assert_eq!(restored.document_id_of("api::article.article", 7), Some("a7"));
    }

    #[test]
    fn test_swapped_exchanges_roles() {
        let snap = snapshot(
            vec![entity("api::article.article", 1, "a1", json!({}))],
            Vec::new(),
        );
        let swapped = snap.swapped();

        assert_eq!(swapped.source.entities().len(), 0);
        assert_eq!(swapped.target.entities().len(), 1);
        assert_eq!(swapped.target.side, InstanceSide::Target);
    }
}
