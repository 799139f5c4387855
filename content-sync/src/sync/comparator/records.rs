//! Pairing and diffing of content entries

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use super::Pair;
use crate::sync::exclusions::ExclusionSet;
use crate::sync::id_mapping::{IdMapping, IdMappingTable};
use crate::sync::references;
use crate::sync::relationships::legacy;
use crate::sync::snapshot::Snapshot;
use crate::sync::types::{ContentKind, Entity, EntityKey, InstanceSide};

/// Pair the rows of a single type: the most recent row per side and locale
pub(super) fn pair_single<'s>(
    snapshot: &'s Snapshot,
    content_type: &str,
    mappings: &mut IdMappingTable,
) -> Vec<Pair<'s>> {
    let mut by_locale: BTreeMap<Option<String>, (Option<&'s Entity>, Option<&'s Entity>)> =
        BTreeMap::new();

    for entity in snapshot.source.entities_of(content_type) {
        let slot = &mut by_locale.entry(entity.locale.clone()).or_default().0;
        *slot = Some(most_recent(*slot, entity));
    }
    for entity in snapshot.target.entities_of(content_type) {
        let slot = &mut by_locale.entry(entity.locale.clone()).or_default().1;
        *slot = Some(most_recent(*slot, entity));
    }

    by_locale
        .into_values()
        .filter_map(|(source, target)| {
            let key = source.or(target)?.key();
            if let (Some(s), Some(t)) = (source, target) {
                record_mapping(mappings, s, t);
            }
            Some(Pair {
                key,
                kind: ContentKind::SingleType,
                source,
                target,
            })
        })
        .collect()
}

/// Latest by `updatedAt`, ties broken by the highest internal id
fn most_recent<'s>(current: Option<&'s Entity>, candidate: &'s Entity) -> &'s Entity {
    match current {
        Some(current) if (current.updated_at, current.id) >= (candidate.updated_at, candidate.id) => {
            current
        }
        _ => candidate,
    }
}

/// Pair the rows of a collection type
///
/// Rows are matched by existing mapping, then by schema-declared unique
/// attributes, then by document id. Each target row pairs at most once.
pub(super) fn pair_collection<'s>(
    snapshot: &'s Snapshot,
    content_type: &str,
    unique_fields: &[&str],
    mappings: &mut IdMappingTable,
) -> Vec<Pair<'s>> {
    let sources: Vec<&Entity> = snapshot.source.entities_of(content_type).collect();
    let targets: Vec<&Entity> = snapshot.target.entities_of(content_type).collect();

    let target_pos: HashMap<EntityKey, usize> = targets
        .iter()
        .enumerate()
        .map(|(idx, t)| (t.key(), idx))
        .collect();
    let mut taken = vec![false; targets.len()];
    let mut matched: Vec<Option<usize>> = vec![None; sources.len()];

    for (i, source) in sources.iter().enumerate() {
        let Some(mapping) = mappings.target_for(&source.key()) else {
            continue;
        };
        if let Some(&j) = target_pos.get(&mapping.target_key()) {
            if !taken[j] {
                matched[i] = Some(j);
                taken[j] = true;
            }
        }
    }

    for field in unique_fields {
        let mut index: HashMap<(Option<&str>, String), Vec<usize>> = HashMap::new();
        for (j, target) in targets.iter().enumerate() {
            if let Some(value) = unique_value(target, field) {
                index
                    .entry((target.locale.as_deref(), value))
                    .or_default()
                    .push(j);
            }
        }

        for (i, source) in sources.iter().enumerate() {
            if matched[i].is_some() {
                continue;
            }
            let Some(value) = unique_value(source, field) else {
                continue;
            };
            if let Some([j]) = index.get(&(source.locale.as_deref(), value)).map(Vec::as_slice) {
                if !taken[*j] {
                    matched[i] = Some(*j);
                    taken[*j] = true;
                }
            }
        }
    }

    for (i, source) in sources.iter().enumerate() {
        if matched[i].is_some() {
            continue;
        }
        if let Some(&j) = target_pos.get(&source.key()) {
            if !taken[j] {
                matched[i] = Some(j);
                taken[j] = true;
            }
        }
    }

    let mut pairs = Vec::with_capacity(sources.len() + targets.len());
    for (i, source) in sources.iter().enumerate() {
        let target = matched[i].map(|j| targets[j]);
        if let Some(target) = target {
            record_mapping(mappings, source, target);
        }
        pairs.push(Pair {
            key: source.key(),
            kind: ContentKind::CollectionType,
            source: Some(*source),
            target,
        });
    }
    for (j, target) in targets.iter().enumerate() {
        if !taken[j] {
            pairs.push(Pair {
                key: target.key(),
                kind: ContentKind::CollectionType,
                source: None,
                target: Some(*target),
            });
        }
    }

    pairs
}

fn unique_value(entity: &Entity, field: &str) -> Option<String> {
    match entity.cleaned.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(super) fn record_mapping(mappings: &mut IdMappingTable, source: &Entity, target: &Entity) {
    mappings.upsert(IdMapping::new(
        &source.content_type,
        source.locale.clone(),
        (&source.document_id, source.id),
        (&target.document_id, target.id),
    ));
}

/// Top-level fields whose canonical values differ between the two rows
pub(super) fn entry_differences(
    source: &Entity,
    target: &Entity,
    snapshot: &Snapshot,
    mappings: &IdMappingTable,
    exclusions: &ExclusionSet,
) -> Vec<String> {
    let mut a = canonicalize(&source.cleaned, InstanceSide::Source, snapshot, mappings);
    let mut b = canonicalize(&target.cleaned, InstanceSide::Target, snapshot, mappings);
    for doc in [&source.document_id, &target.document_id] {
        exclusions.strip_fields(&mut a, &source.content_type, doc);
        exclusions.strip_fields(&mut b, &target.content_type, doc);
    }
    top_level_differences(&a, &b)
}

/// Keys of two objects whose values are not equal, sorted
pub(super) fn top_level_differences(a: &Value, b: &Value) -> Vec<String> {
    let empty = Map::new();
    let a = a.as_object().unwrap_or(&empty);
    let b = b.as_object().unwrap_or(&empty);

    let mut fields: Vec<String> = a
        .keys()
        .chain(b.keys())
        .filter(|key| a.get(*key).unwrap_or(&Value::Null) != b.get(*key).unwrap_or(&Value::Null))
        .cloned()
        .collect();
    fields.sort();
    fields.dedup();
    fields
}

/// Rewrite reference markers into instance-independent tokens
///
/// Target references become `type#target_doc`. Source references are
/// translated through the mapping table to the same form; a source reference
/// without a mapping gets a source-tagged token that never equals a target one.
pub fn canonicalize(
    value: &Value,
    side: InstanceSide,
    snapshot: &Snapshot,
    mappings: &IdMappingTable,
) -> Value {
    if let Some((content_type, id)) = references::parse_marker(value) {
        return Value::String(reference_token(side, content_type, id, snapshot, mappings));
    }

    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                out.insert(key.clone(), canonicalize(child, side, snapshot, mappings));
            }
            if let Some((content_type, id)) = legacy::legacy_reference(value, snapshot.side(side)) {
                out.insert(
                    "documentId".to_string(),
                    Value::String(reference_token(side, content_type, id, snapshot, mappings)),
                );
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| canonicalize(item, side, snapshot, mappings))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn reference_token(
    side: InstanceSide,
    content_type: &str,
    id: i64,
    snapshot: &Snapshot,
    mappings: &IdMappingTable,
) -> String {
    let Some(entity) = snapshot.side(side).get(content_type, id) else {
        return format!("{}:{}#id:{}", side.label(), content_type, id);
    };

    match side {
        InstanceSide::Target => format!("{}#{}", content_type, entity.document_id),
        InstanceSide::Source => match mappings.target_for(&entity.key()) {
            Some(mapping) => format!("{}#{}", content_type, mapping.target_document_id),
            None => format!("source:{}#{}", content_type, entity.document_id),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::snapshot::test_support::{entity, snapshot};
    use serde_json::json;

    const ARTICLE: &str = "api::article.article";
    const AUTHOR: &str = "api::author.author";

    #[test]
    fn test_canonical_tokens_follow_mappings() {
        let snap = snapshot(
            vec![entity(AUTHOR, 1, "s-author", json!({}))],
            vec![entity(AUTHOR, 50, "t-author", json!({}))],
        );
        let marker = references::marker(AUTHOR, 1);

        let mut mappings = IdMappingTable::new();
        assert_eq!(
            canonicalize(&marker, InstanceSide::Source, &snap, &mappings),
            json!("source:api::author.author#s-author")
        );

        mappings.upsert(IdMapping::new(AUTHOR, None, ("s-author", 1), ("t-author", 50)));
        assert_eq!(
            canonicalize(&marker, InstanceSide::Source, &snap, &mappings),
            json!("api::author.author#t-author")
        );
        assert_eq!(
            canonicalize(&references::marker(AUTHOR, 50), InstanceSide::Target, &snap, &mappings),
            json!("api::author.author#t-author")
        );
    }

    #[test]
    fn test_top_level_differences() {
        let a = json!({"title": "a", "body": "same", "only_a": 1});
        let b = json!({"title": "b", "body": "same", "only_b": null});
        assert_eq!(top_level_differences(&a, &b), vec!["only_a", "title"]);
    }

    #[test]
    fn test_unique_field_pairs_across_document_ids() {
        let snap = snapshot(
            vec![entity(ARTICLE, 1, "s1", json!({"slug": "hello"}))],
            vec![
                entity(ARTICLE, 7, "t7", json!({"slug": "hello"})),
                entity(ARTICLE, 8, "t8", json!({"slug": "other"})),
            ],
        );
        let mut mappings = IdMappingTable::new();

        let pairs = pair_collection(&snap, ARTICLE, &["slug"], &mut mappings);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].target.unwrap().document_id, "t7");
        assert!(pairs[1].source.is_none());
        assert_eq!(
            mappings.target_for(&EntityKey::new(ARTICLE, "s1")).unwrap().target_id,
            7
        );
    }

    #[test]
    fn test_single_type_uses_most_recent_row() {
        let mut older = entity("api::global.global", 1, "g-old", json!({"title": "old"}));
        older.updated_at = older.updated_at - chrono::Duration::days(1);
        let newer = entity("api::global.global", 2, "g-new", json!({"title": "new"}));
        let snap = snapshot(
            vec![older, newer],
            vec![entity("api::global.global", 9, "g-target", json!({"title": "new"}))],
        );
        let mut mappings = IdMappingTable::new();

        let pairs = pair_single(&snap, "api::global.global", &mut mappings);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].key.document_id, "g-new");
        assert_eq!(pairs[0].target.unwrap().document_id, "g-target");
    }
}
