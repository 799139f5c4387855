//! Payload cleaning
//!
//! Produces the comparable form of an entity payload:
//! - technical fields (ids, timestamps, authorship, locale bookkeeping) removed
//! - relation and media values replaced by reference markers
//! - embedded components cleaned recursively, bounded by the component depth
//!
//! Object keys come out ordered because `serde_json::Map` is a sorted map.

use serde_json::{Map, Value};

use crate::api::metadata::{Attribute, SchemaRegistry, effective_attribute};
use crate::sync::references::{self, REF_MARKER};
use crate::sync::types::{MEDIA_TYPE, MediaMeta};

/// Fields maintained by the backend that never take part in a comparison
pub const TECHNICAL_FIELDS: &[&str] = &[
    "id",
    "documentId",
    "createdAt",
    "updatedAt",
    "publishedAt",
    "createdBy",
    "updatedBy",
    "locale",
    "localizations",
];

/// Tag naming the component type of a dynamic zone entry
pub const COMPONENT_TAG: &str = "__component";

pub fn is_technical_field(name: &str) -> bool {
    TECHNICAL_FIELDS.contains(&name)
}

/// Clean a resolved entry payload of `content_type`
pub fn clean_entry(raw: &Value, content_type: &str, schema: &SchemaRegistry, max_depth: usize) -> Value {
    let Some(obj) = raw.as_object() else {
        return Value::Null;
    };
    clean_object(obj, content_type, schema, 0, max_depth, false)
}

/// Comparable form of a media file: the metadata an operator edits
pub fn clean_media(meta: &MediaMeta) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::from(meta.name.clone()));
    map.insert(
        "alternativeText".to_string(),
        meta.alternative_text.clone().map(Value::from).unwrap_or(Value::Null),
    );
    map.insert(
        "caption".to_string(),
        meta.caption.clone().map(Value::from).unwrap_or(Value::Null),
    );
    map.insert(
        "folder".to_string(),
        meta.folder_path.clone().map(Value::from).unwrap_or(Value::Null),
    );
    Value::Object(map)
}

fn clean_object(
    obj: &Map<String, Value>,
    owner: &str,
    schema: &SchemaRegistry,
    depth: usize,
    max_depth: usize,
    in_seo_block: bool,
) -> Value {
    let attributes = schema.attributes_of(owner);
    let mut cleaned = Map::new();

    for (field, value) in obj {
        if is_technical_field(field) {
            continue;
        }
        if field == COMPONENT_TAG {
            cleaned.insert(field.clone(), value.clone());
            continue;
        }

        let attribute = effective_attribute(attributes, field, in_seo_block);
        let value = match attribute.as_deref() {
            Some(Attribute::Relation { target, many, .. }) => {
                mark_references(value, target, *many)
            }
            Some(Attribute::Media { many }) => mark_references(value, MEDIA_TYPE, *many),
            Some(Attribute::Component {
                component,
                repeatable,
            }) => clean_component_value(
                value,
                component,
                *repeatable,
                schema,
                depth,
                max_depth,
                in_seo_block,
            ),
            Some(Attribute::DynamicZone { components }) => {
                clean_dynamic_zone(value, components, schema, depth, max_depth)
            }
            Some(Attribute::Scalar { .. }) | None => value.clone(),
        };
        cleaned.insert(field.clone(), value);
    }

    Value::Object(cleaned)
}

fn mark_references(value: &Value, target_type: &str, many: bool) -> Value {
    let ids = references::reference_ids(value);
    if many {
        Value::Array(
            ids.into_iter()
                .map(|id| references::marker(target_type, id))
                .collect(),
        )
    } else {
        ids.first()
            .map(|id| references::marker(target_type, *id))
            .unwrap_or(Value::Null)
    }
}

fn clean_component_value(
    value: &Value,
    component: &str,
    repeatable: bool,
    schema: &SchemaRegistry,
    depth: usize,
    max_depth: usize,
    in_seo_block: bool,
) -> Value {
    if depth >= max_depth {
        return Value::Null;
    }
    let seo = in_seo_block
        || schema
            .component(component)
            .map(|c| c.is_seo_block())
            .unwrap_or(false);

    match value {
        Value::Array(items) if repeatable => Value::Array(
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|item| clean_object(item, component, schema, depth + 1, max_depth, seo))
                .collect(),
        ),
        Value::Object(item) => clean_object(item, component, schema, depth + 1, max_depth, seo),
        _ => Value::Null,
    }
}

fn clean_dynamic_zone(
    value: &Value,
    allowed: &[String],
    schema: &SchemaRegistry,
    depth: usize,
    max_depth: usize,
) -> Value {
    if depth >= max_depth {
        return Value::Null;
    }
    let Some(items) = value.as_array() else {
        return Value::Array(Vec::new());
    };

    let mut cleaned = Vec::with_capacity(items.len());
    for item in items.iter().filter_map(Value::as_object) {
        let Some(tag) = item.get(COMPONENT_TAG).and_then(Value::as_str) else {
            continue;
        };
        if !allowed.iter().any(|c| c == tag) {
            log::debug!("Skipping dynamic zone entry with unexpected component '{}'", tag);
            continue;
        }
        let seo = schema.component(tag).map(|c| c.is_seo_block()).unwrap_or(false);
        cleaned.push(clean_object(item, tag, schema, depth + 1, max_depth, seo));
    }
    Value::Array(cleaned)
}

/// Whether a cleaned value is a reference marker
pub fn is_marker(value: &Value) -> bool {
    value
        .as_object()
        .map(|m| m.len() == 1 && m.contains_key(REF_MARKER))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::metadata::parse_schema;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        parse_schema(
            &json!([{
                "uid": "api::article.article",
                "schema": {
                    "kind": "collectionType",
                    "attributes": {
                        "title": {"type": "string"},
                        "author": {"type": "relation", "relation": "manyToOne", "target": "api::author.author"},
                        "tags": {"type": "relation", "relation": "manyToMany", "target": "api::tag.tag"},
                        "cover": {"type": "media"},
                        "seo": {"type": "component", "component": "shared.seo"},
                        "blocks": {"type": "dynamiczone", "components": ["shared.quote"]}
                    }
                }
            }]),
            &json!([
                {"uid": "shared.seo", "schema": {"attributes": {"metaTitle": {"type": "string"}}}},
                {"uid": "shared.quote", "schema": {"attributes": {"body": {"type": "text"}}}}
            ]),
        )
        .unwrap()
    }

    #[test]
    fn test_strips_technical_fields_and_marks_references() {
        let raw = json!({
            "id": 4,
            "documentId": "abc",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-02T00:00:00Z",
            "locale": "en",
            "title": "Hello",
            "author": {"id": 9, "name": "Ann"},
            "tags": [{"id": 1}, {"id": 2}],
            "cover": {"id": 30},
            "seo": {"id": 77, "metaTitle": "Hi", "shareImage": {"id": 31}},
            "blocks": [
                {"id": 5, "__component": "shared.quote", "body": "q"},
                {"id": 6, "__component": "shared.unknown", "body": "x"}
            ]
        });

        let cleaned = clean_entry(&raw, "api::article.article", &registry(), 10);

        assert_eq!(
            cleaned,
            json!({
                "title": "Hello",
                "author": {"__ref": "api::author.author#9"},
                "tags": [{"__ref": "api::tag.tag#1"}, {"__ref": "api::tag.tag#2"}],
                "cover": {"__ref": "plugin::upload.file#30"},
                "seo": {"metaTitle": "Hi", "shareImage": {"__ref": "plugin::upload.file#31"}},
                "blocks": [{"__component": "shared.quote", "body": "q"}]
            })
        );
    }

    #[test]
    fn test_depth_bound_nulls_components() {
        let raw = json!({"title": "t", "seo": {"metaTitle": "x"}});
        let cleaned = clean_entry(&raw, "api::article.article", &registry(), 0);
        assert_eq!(cleaned["seo"], Value::Null);
    }

    #[test]
    fn test_empty_single_relation_is_null() {
        let raw = json!({"author": null, "tags": []});
        let cleaned = clean_entry(&raw, "api::article.article", &registry(), 10);
        assert_eq!(cleaned, json!({"author": null, "tags": []}));
    }

    #[test]
    fn test_clean_media_keeps_editable_metadata() {
        let meta = MediaMeta {
            name: "hero.png".to_string(),
            alternative_text: Some("Hero".to_string()),
            size_kb: 12.0,
            ..Default::default()
        };
        assert_eq!(
            clean_media(&meta),
            json!({"name": "hero.png", "alternativeText": "Hero", "caption": null, "folder": null})
        );
    }
}
