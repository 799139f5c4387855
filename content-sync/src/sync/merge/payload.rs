//! Target payload preparation
//!
//! Starts from the cleaned source payload (technical fields and component ids
//! already gone, references marked) and rewrites every reference into the
//! target's id space through the mapping table:
//! - relations become the target document id
//! - media becomes the target file id
//! - legacy `documentId` objects in JSON fields get the target document id
//!
//! A reference with no mapping is left out and reported, so a later pass can
//! patch it in once the referenced entity exists on the target.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sync::exclusions::ExclusionSet;
use crate::sync::id_mapping::IdMappingTable;
use crate::sync::paths;
use crate::sync::references;
use crate::sync::relationships::legacy;
use crate::sync::snapshot::InstanceData;
use crate::sync::types::{Entity, EntityKey, MEDIA_TYPE};

/// A reference that could not be translated yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedReference {
    pub field_path: String,
    /// Referenced entity on the source, when it resolves at all
    pub target: Option<EntityKey>,
}

/// Payload ready to send to the target
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPayload {
    pub data: Value,
    pub dropped: Vec<DroppedReference>,
}

impl PreparedPayload {
    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }
}

/// Build the target payload for a source entry
pub fn prepare_payload(
    entity: &Entity,
    source: &InstanceData,
    mappings: &IdMappingTable,
    exclusions: &ExclusionSet,
    target_document_id: Option<&str>,
) -> PreparedPayload {
    let mut data = entity.cleaned.clone();
    exclusions.strip_fields(&mut data, &entity.content_type, &entity.document_id);
    if let Some(doc) = target_document_id {
        exclusions.strip_fields(&mut data, &entity.content_type, doc);
    }

    let mut rewriter = Rewriter {
        source,
        mappings,
        dropped: Vec::new(),
    };
    let data = match data {
        Value::Object(map) => Value::Object(rewriter.object(map, "")),
        other => other,
    };

    if !rewriter.dropped.is_empty() {
        log::debug!(
            "{}: {} reference(s) left out of the payload",
            entity.key(),
            rewriter.dropped.len()
        );
    }

    PreparedPayload {
        data,
        dropped: rewriter.dropped,
    }
}

struct Rewriter<'a> {
    source: &'a InstanceData,
    mappings: &'a IdMappingTable,
    dropped: Vec<DroppedReference>,
}

impl Rewriter<'_> {
    fn object(&mut self, map: Map<String, Value>, path: &str) -> Map<String, Value> {
        let legacy_target = map
            .get("documentId")
            .map(|doc| {
                let mut lookup = Map::new();
                lookup.insert("documentId".to_string(), doc.clone());
                Value::Object(lookup)
            })
            .and_then(|lookup| legacy::legacy_reference(&lookup, self.source))
            .and_then(|(content_type, id)| self.source.get(content_type, id))
            .map(Entity::key);

        let mut out = Map::new();
        for (field, value) in map {
            let field_path = paths::join(path, &field);
            if field == "documentId" {
                if let Some(key) = &legacy_target {
                    match self.mappings.target_for(key) {
                        Some(mapping) => {
                            out.insert(field, Value::from(mapping.target_document_id.clone()));
                        }
                        None => {
                            self.drop_reference(field_path, Some(key.clone()));
                            out.insert(field, value);
                        }
                    }
                    continue;
                }
            }
            if let Some(value) = self.value(value, &field_path) {
                out.insert(field, value);
            }
        }
        out
    }

    /// Rewritten value, or `None` when the whole value must be left out
    fn value(&mut self, value: Value, path: &str) -> Option<Value> {
        if references::parse_marker(&value).is_some() {
            return self.reference(&value, path);
        }

        match value {
            Value::Object(map) => Some(Value::Object(self.object(map, path))),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (idx, item) in items.into_iter().enumerate() {
                    let item_path = paths::join(path, &idx.to_string());
                    if let Some(item) = self.value(item, &item_path) {
                        out.push(item);
                    }
                }
                Some(Value::Array(out))
            }
            other => Some(other),
        }
    }

    fn reference(&mut self, marker: &Value, path: &str) -> Option<Value> {
        let (content_type, id) = references::parse_marker(marker)?;
        let Some(entity) = self.source.get(content_type, id) else {
            self.drop_reference(path.to_string(), None);
            return None;
        };
        let key = entity.key();

        match self.mappings.target_for(&key) {
            Some(mapping) if content_type == MEDIA_TYPE => Some(Value::from(mapping.target_id)),
            Some(mapping) => Some(Value::from(mapping.target_document_id.clone())),
            None => {
                self.drop_reference(path.to_string(), Some(key));
                None
            }
        }
    }

    fn drop_reference(&mut self, field_path: String, target: Option<EntityKey>) {
        self.dropped.push(DroppedReference { field_path, target });
    }
}
