//! Fallback reference detection for untyped payloads
//!
//! JSON attributes (and attributes missing from the schema) sometimes embed
//! copies of other entries. The only shape recognised is an object carrying a
//! `documentId` that looks like a generated document id and resolves to
//! exactly one entity of the same instance. Anything else is left alone.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::sync::clean::is_technical_field;
use crate::sync::paths;
use crate::sync::snapshot::InstanceData;
use crate::sync::types::{Link, LinkKind, LinkOrigin, MEDIA_TYPE};

static DOCUMENT_ID_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]{24}$").unwrap());

/// Whether a string looks like a generated document id
pub fn looks_like_document_id(value: &str) -> bool {
    DOCUMENT_ID_SHAPE.is_match(value)
}

/// The single entity a legacy object points at, if unambiguous
pub fn legacy_reference<'a>(value: &Value, data: &'a InstanceData) -> Option<(&'a str, i64)> {
    let document_id = value.as_object()?.get("documentId")?.as_str()?;
    if !looks_like_document_id(document_id) {
        return None;
    }

    match data.find_by_document_id(document_id).as_slice() {
        [only] => Some((only.content_type.as_str(), only.id)),
        [] => None,
        many => {
            log::debug!(
                "Ignoring legacy reference {}: {} candidates",
                document_id,
                many.len()
            );
            None
        }
    }
}

/// Walk an untyped value collecting legacy references
pub fn scan(value: &Value, path: &str, origin: &LinkOrigin, data: &InstanceData, links: &mut Vec<Link>) {
    if let Some((target_type, target_id)) = legacy_reference(value, data) {
        links.push(Link {
            field_path: path.to_string(),
            target_type: target_type.to_string(),
            target_id,
            kind: if target_type == MEDIA_TYPE {
                LinkKind::Media
            } else {
                LinkKind::Relation
            },
            origin: origin.clone(),
            position: 0,
        });
        return;
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if is_technical_field(key) {
                    continue;
                }
                scan(child, &paths::join(path, key), origin, data, links);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                scan(child, &paths::join(path, &idx.to_string()), origin, data, links);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::snapshot::test_support::{entity, instance};
    use crate::sync::types::InstanceSide;
    use serde_json::json;

    const DOC: &str = "abcdefghij0123456789klmn";

    #[test]
    fn test_document_id_shape() {
        assert!(looks_like_document_id(DOC));
        assert!(!looks_like_document_id("ABCDEFGHIJ0123456789KLMN"));
        assert!(!looks_like_document_id("short"));
    }

    #[test]
    fn test_resolves_unique_document() {
        let data = instance(
            InstanceSide::Source,
            vec![entity("api::author.author", 3, DOC, json!({}))],
        );

        let mut links = Vec::new();
        scan(
            &json!({"featured": [{"documentId": DOC, "name": "Ann"}], "label": "x"}),
            "extra",
            &LinkOrigin::Direct,
            &data,
            &mut links,
        );

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].field_path, "extra.featured.0");
        assert_eq!(links[0].target_id, 3);
    }

    #[test]
    fn test_ambiguous_or_unknown_is_ignored() {
        let data = instance(
            InstanceSide::Source,
            vec![
                entity("api::author.author", 3, DOC, json!({})),
                entity("api::page.page", 4, DOC, json!({})),
            ],
        );
        assert!(legacy_reference(&json!({"documentId": DOC}), &data).is_none());
        assert!(legacy_reference(&json!({"documentId": "zzzzzzzzzzzzzzzzzzzzzzzz"}), &data).is_none());
    }
}
