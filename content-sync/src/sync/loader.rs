//! Prefetch of both instances into a [`Snapshot`]
//!
//! Per instance, everything is fetched concurrently under one limiter:
//! - the schema (a failure here aborts the load)
//! - rows of every content type and component type
//! - media files and the media relation rows
//!
//! A content type whose rows cannot be fetched degrades to empty and is left
//! out of the loaded set, so mapping sanitation does not treat its documents
//! as deleted. Component references are resolved against an arena keyed by
//! component uid and row id, up to a fixed depth.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};

use crate::api::content::{ContentApi, MediaLinkRow, parse_timestamp};
use crate::api::metadata::{Attribute, SchemaRegistry};
use crate::api::resilience::ConcurrencyLimiter;
use crate::sync::clean::{COMPONENT_TAG, clean_entry, clean_media};
use crate::sync::fingerprint::{self, Fingerprint};
use crate::sync::references;
use crate::sync::relationships::extract_links;
use crate::sync::snapshot::{InstanceData, Snapshot};
use crate::sync::types::{Entity, InstanceSide, MEDIA_TYPE, MediaMeta};

pub const DEFAULT_COMPONENT_DEPTH: usize = 10;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;
pub const DEFAULT_FINGERPRINT_CONCURRENCY: usize = 8;
const MAX_FINGERPRINT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Deepest component nesting resolved; anything below becomes null
    pub max_depth: usize,
    /// Concurrent fetches per instance
    pub fetch_concurrency: usize,
    /// Concurrent downloads while fingerprinting media
    pub fingerprint_concurrency: usize,
    pub fingerprint_media: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_COMPONENT_DEPTH,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            fingerprint_concurrency: DEFAULT_FINGERPRINT_CONCURRENCY,
            fingerprint_media: true,
        }
    }
}

/// One instance after loading
pub struct LoadedInstance {
    pub data: InstanceData,
    pub schema: SchemaRegistry,
}

/// Load both instances concurrently
pub async fn prefetch(
    source: &dyn ContentApi,
    target: &dyn ContentApi,
    config: &LoaderConfig,
) -> Result<Arc<Snapshot>> {
    let (source, target) = tokio::try_join!(
        load_instance(source, InstanceSide::Source, config),
        load_instance(target, InstanceSide::Target, config),
    )?;

    Ok(Arc::new(Snapshot {
        source: source.data,
        target: target.data,
        source_schema: source.schema,
        target_schema: target.schema,
        captured_at: Utc::now(),
    }))
}

async fn limited<T>(limiter: &ConcurrencyLimiter, fetch: impl Future<Output = Result<T>>) -> Result<T> {
    let _permit = limiter.acquire().await?;
    fetch.await
}

/// Load one instance
pub async fn load_instance(
    api: &dyn ContentApi,
    side: InstanceSide,
    config: &LoaderConfig,
) -> Result<LoadedInstance> {
    let schema = api
        .fetch_schema()
        .await
        .with_context(|| format!("Failed to fetch schema from {}", api.name()))?;
    let limiter = ConcurrencyLimiter::with_permits(config.fetch_concurrency);
    let limiter = &limiter;

    let row_fetches = schema.content_types.keys().map(|uid| async move {
        (uid.as_str(), limited(limiter, api.fetch_rows(uid)).await)
    });
    let component_fetches = schema.components.keys().map(|uid| async move {
        (uid.as_str(), limited(limiter, api.fetch_component_rows(uid)).await)
    });

    let (rows, components, media, media_links) = futures::join!(
        join_all(row_fetches),
        join_all(component_fetches),
        limited(limiter, api.fetch_media()),
        limited(limiter, api.fetch_media_links()),
    );

    let stats = limiter.stats();
    log::debug!(
        "Fetched {} with {} request(s), {:.0}% waited for a permit",
        api.name(),
        stats.requests_acquired,
        stats.wait_rate() * 100.0
    );

    let mut loaded_types = BTreeSet::new();
    let mut rows_by_type = Vec::new();
    for (uid, result) in rows {
        match result {
            Ok(rows) => {
                loaded_types.insert(uid.to_string());
                rows_by_type.push((uid, rows));
            }
            Err(e) => log::warn!(
                "Failed to fetch {} from {}, treating it as empty: {:#}",
                uid,
                api.name(),
                e
            ),
        }
    }

    let attachments = MediaAttachments::new(media_links.unwrap_or_else(|e| {
        log::warn!("Failed to fetch media relations from {}: {:#}", api.name(), e);
        Vec::new()
    }));

    let mut arena = ComponentArena::default();
    for (uid, result) in components {
        match result {
            Ok(rows) => {
                for row in rows {
                    if let Value::Object(mut row) = row {
                        attachments.attach(&mut row, uid, &schema);
                        arena.insert(uid, row);
                    }
                }
            }
            Err(e) => log::warn!("Failed to fetch component {} from {}: {:#}", uid, api.name(), e),
        }
    }

    let resolver = ComponentResolver {
        arena: &arena,
        schema: &schema,
        max_depth: config.max_depth,
    };
    let mut entities = Vec::new();
    for (uid, rows) in rows_by_type {
        for row in rows {
            let Value::Object(mut row) = row else {
                continue;
            };
            attachments.attach(&mut row, uid, &schema);
            let row = resolver.resolve_object(row, uid, 0);
            match entity_from_row(uid, row, &schema, config.max_depth) {
                Ok(entity) => entities.push(entity),
                Err(e) => log::warn!("Skipping {} row from {}: {:#}", uid, api.name(), e),
            }
        }
    }

    let mut media_meta = BTreeMap::new();
    match media {
        Ok(files) => {
            loaded_types.insert(MEDIA_TYPE.to_string());
            for file in files {
                entities.push(Entity {
                    content_type: MEDIA_TYPE.to_string(),
                    id: file.id,
                    document_id: file.document_id,
                    locale: None,
                    updated_at: file.updated_at,
                    raw: serde_json::to_value(&file.meta).unwrap_or(Value::Null),
                    cleaned: clean_media(&file.meta),
                    links: Vec::new(),
                });
                media_meta.insert(file.id, file.meta);
            }
        }
        Err(e) => log::warn!("Failed to fetch media from {}: {:#}", api.name(), e),
    }

    let mut data = InstanceData::new(side, entities, media_meta, loaded_types);
    let links = data
        .entities()
        .iter()
        .map(|e| extract_links(&e.raw, &e.content_type, &schema, &data, config.max_depth))
        .collect();
    data.attach_links(links);

    if config.fingerprint_media {
        let fingerprints = fingerprint_media(api, &data, config.fingerprint_concurrency).await;
        data.set_fingerprints(fingerprints);
    }

    log::info!(
        "Loaded {} from {}: {} entities across {} type(s)",
        side.label(),
        api.name(),
        data.entities().len(),
        data.loaded_types().len()
    );

    Ok(LoadedInstance { data, schema })
}

fn entity_from_row(
    content_type: &str,
    row: Map<String, Value>,
    schema: &SchemaRegistry,
    max_depth: usize,
) -> Result<Entity> {
    let id = row
        .get("id")
        .and_then(Value::as_i64)
        .context("row without numeric id")?;
    let document_id = row
        .get("documentId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("row {} without documentId", id))?;
    let updated_at = parse_timestamp(row.get("updatedAt"))
        .with_context(|| format!("row {} without a valid updatedAt", id))?;
    let locale = row.get("locale").and_then(Value::as_str).map(str::to_string);

    let raw = Value::Object(row);
    let cleaned = clean_entry(&raw, content_type, schema, max_depth);

    Ok(Entity {
        content_type: content_type.to_string(),
        id,
        document_id,
        locale,
        updated_at,
        raw,
        cleaned,
        links: Vec::new(),
    })
}

/// Component rows keyed by uid and row id
#[derive(Debug, Default)]
struct ComponentArena {
    rows: HashMap<String, HashMap<i64, Map<String, Value>>>,
}

impl ComponentArena {
    fn insert(&mut self, uid: &str, row: Map<String, Value>) {
        let Some(id) = row.get("id").and_then(Value::as_i64) else {
            return;
        };
        self.rows.entry(uid.to_string()).or_default().insert(id, row);
    }

    fn get(&self, uid: &str, id: i64) -> Option<&Map<String, Value>> {
        self.rows.get(uid)?.get(&id)
    }
}

/// `{"id": n}` or `{"__component": uid, "id": n}` with nothing else
fn is_reference(map: &Map<String, Value>) -> bool {
    map.contains_key("id") && map.keys().all(|k| k == "id" || k == COMPONENT_TAG)
}

struct ComponentResolver<'a> {
    arena: &'a ComponentArena,
    schema: &'a SchemaRegistry,
    max_depth: usize,
}

impl ComponentResolver<'_> {
    fn resolve_object(&self, mut obj: Map<String, Value>, owner: &str, depth: usize) -> Map<String, Value> {
        let Some(attributes) = self.schema.attributes_of(owner) else {
            return obj;
        };

        for (field, attribute) in attributes {
            let Some(value) = obj.remove(field) else {
                continue;
            };
            let resolved = match attribute {
                Attribute::Component {
                    component,
                    repeatable,
                } => self.resolve_component(value, component, *repeatable, depth),
                Attribute::DynamicZone { .. } => self.resolve_zone(value, depth),
                _ => value,
            };
            obj.insert(field.clone(), resolved);
        }
        obj
    }

    fn depth_exceeded(&self, uid: &str, depth: usize) -> bool {
        if depth >= self.max_depth {
            log::warn!(
                "Component {} nested deeper than {} levels, replaced by null",
                uid,
                self.max_depth
            );
            return true;
        }
        false
    }

    fn resolve_component(&self, value: Value, component: &str, repeatable: bool, depth: usize) -> Value {
        if value.is_null() || self.depth_exceeded(component, depth) {
            return Value::Null;
        }
        match value {
            Value::Array(items) if repeatable => Value::Array(
                items
                    .into_iter()
                    .filter_map(|item| self.resolve_one(item, component, depth))
                    .collect(),
            ),
            other => self.resolve_one(other, component, depth).unwrap_or(Value::Null),
        }
    }

    fn resolve_zone(&self, value: Value, depth: usize) -> Value {
        let Value::Array(items) = value else {
            return Value::Array(Vec::new());
        };
        if self.depth_exceeded("dynamic zone", depth) {
            return Value::Null;
        }

        let mut resolved = Vec::with_capacity(items.len());
        for item in items {
            let Some(tag) = item.get(COMPONENT_TAG).and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            if let Some(Value::Object(mut entry)) = self.resolve_one(item, &tag, depth) {
                entry.insert(COMPONENT_TAG.to_string(), Value::from(tag));
                resolved.push(Value::Object(entry));
            }
        }
        Value::Array(resolved)
    }

    fn resolve_one(&self, item: Value, component: &str, depth: usize) -> Option<Value> {
        let row = match item {
            Value::Number(n) => self.lookup(component, n.as_i64()?)?,
            Value::Object(map) if is_reference(&map) => {
                self.lookup(component, map.get("id").and_then(Value::as_i64)?)?
            }
            Value::Object(map) => map,
            _ => return None,
        };
        Some(Value::Object(self.resolve_object(row, component, depth + 1)))
    }

    fn lookup(&self, component: &str, id: i64) -> Option<Map<String, Value>> {
        let row = self.arena.get(component, id).cloned();
        if row.is_none() {
            log::debug!("Component row {}#{} not found", component, id);
        }
        row
    }
}

/// Media relation rows grouped by owning row and field
struct MediaAttachments {
    by_owner: HashMap<(String, i64), BTreeMap<String, Vec<(i64, i64)>>>,
}

impl MediaAttachments {
    fn new(rows: Vec<MediaLinkRow>) -> Self {
        let mut by_owner: HashMap<(String, i64), BTreeMap<String, Vec<(i64, i64)>>> = HashMap::new();
        for row in rows {
            by_owner
                .entry((row.related_type, row.related_id))
                .or_default()
                .entry(row.field)
                .or_default()
                .push((row.order, row.file_id));
        }
        for fields in by_owner.values_mut() {
            for files in fields.values_mut() {
                files.sort();
            }
        }
        Self { by_owner }
    }

    /// Set the media fields of one row from the relation rows
    fn attach(&self, row: &mut Map<String, Value>, owner: &str, schema: &SchemaRegistry) {
        let Some(id) = row.get("id").and_then(Value::as_i64) else {
            return;
        };
        let Some(fields) = self.by_owner.get(&(owner.to_string(), id)) else {
            return;
        };

        for (field, files) in fields {
            let declared_many = match schema.attributes_of(owner).and_then(|a| a.get(field)) {
                Some(Attribute::Media { many }) => Some(*many),
                _ => None,
            };
            let many = declared_many.unwrap_or(files.len() > 1);
            let value = if many {
                Value::Array(files.iter().map(|(_, file)| references::id_object(*file)).collect())
            } else {
                files
                    .first()
                    .map(|(_, file)| references::id_object(*file))
                    .unwrap_or(Value::Null)
            };
            row.insert(field.clone(), value);
        }
    }
}

/// Download and fingerprint every media file, bounded by `concurrency`
async fn fingerprint_media(
    api: &dyn ContentApi,
    data: &InstanceData,
    concurrency: usize,
) -> BTreeMap<i64, Fingerprint> {
    let fingerprints: Vec<Option<(i64, Fingerprint)>> = stream::iter(data.media())
        .map(|(id, meta)| fingerprint_one(api, *id, meta))
        .buffer_unordered(concurrency.clamp(1, MAX_FINGERPRINT_CONCURRENCY))
        .collect()
        .await;

    let fingerprints: BTreeMap<i64, Fingerprint> = fingerprints.into_iter().flatten().collect();
    log::debug!(
        "Fingerprinted {} file(s) from {}",
        fingerprints.len(),
        api.name()
    );
    fingerprints
}

async fn fingerprint_one(api: &dyn ContentApi, id: i64, meta: &MediaMeta) -> Option<(i64, Fingerprint)> {
    let bytes = match api.download_media(&meta.url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("Could not download {} for fingerprinting: {:#}", meta.url, e);
            return None;
        }
    };

    let (mime, ext) = (meta.mime.clone(), meta.ext.clone());
    match tokio::task::spawn_blocking(move || fingerprint::compute(&bytes, &mime, &ext)).await {
        Ok(fingerprint) => Some((id, fingerprint)),
        Err(e) => {
            log::warn!("Fingerprinting {} panicked: {}", meta.url, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::content::MediaFile;
    use crate::api::memory::MemoryContentApi;
    use crate::api::metadata::parse_schema;
    use crate::sync::references::marker;
    use serde_json::json;

    const ARTICLE: &str = "api::article.article";

    fn schema() -> SchemaRegistry {
        parse_schema(
            &json!([
                {"uid": ARTICLE, "schema": {"kind": "collectionType", "attributes": {
                    "title": {"type": "string"},
                    "cover": {"type": "media"},
                    "seo": {"type": "component", "component": "shared.seo"},
                    "blocks": {"type": "dynamiczone", "components": ["shared.quote", "shared.gallery"]},
                    "tree": {"type": "component", "component": "shared.node"}
                }}},
                {"uid": "api::tag.tag", "schema": {"kind": "collectionType", "attributes": {
                    "name": {"type": "string"}
                }}}
            ]),
            &json!([
                {"uid": "shared.seo", "schema": {"attributes": {"metaTitle": {"type": "string"}}}},
                {"uid": "shared.quote", "schema": {"attributes": {"body": {"type": "text"}}}},
                {"uid": "shared.gallery", "schema": {"attributes": {"images": {"type": "media", "multiple": true}}}},
                {"uid": "shared.node", "schema": {"attributes": {
                    "label": {"type": "string"},
                    "child": {"type": "component", "component": "shared.node"}
                }}}
            ]),
        )
        .unwrap()
    }

    fn file(id: i64, name: &str) -> MediaFile {
        MediaFile {
            id,
            document_id: format!("file{}", id),
            updated_at: Utc::now(),
            meta: MediaMeta {
                name: name.to_string(),
                mime: "image/png".to_string(),
                ext: ".png".to_string(),
                size_kb: 1.0,
                url: format!("/uploads/{}", name),
                ..Default::default()
            },
        }
    }

    fn link(related_type: &str, related_id: i64, field: &str, file_id: i64, order: i64) -> MediaLinkRow {
        MediaLinkRow {
            related_type: related_type.to_string(),
            related_id,
            field: field.to_string(),
            file_id,
            order,
        }
    }

    fn source_api() -> MemoryContentApi {
        let api = MemoryContentApi::new("staging");
        api.set_schema(schema());
        api.add_row(
            ARTICLE,
            json!({
                "id": 1,
                "documentId": "art1",
                "updatedAt": "2024-01-01T00:00:00.000Z",
                "title": "Hello",
                "seo": {"id": 5},
                "blocks": [
                    {"__component": "shared.quote", "id": 6},
                    {"__component": "shared.gallery", "id": 7}
                ]
            }),
        );
        api.add_row("api::tag.tag", json!({"id": 3, "documentId": "tag3", "updatedAt": "2024-01-01T00:00:00Z", "name": "news"}));
        api.add_component_row("shared.seo", json!({"id": 5, "metaTitle": "M"}));
        api.add_component_row("shared.quote", json!({"id": 6, "body": "B"}));
        api.add_component_row("shared.gallery", json!({"id": 7}));
        for (id, name) in [(30, "cover.png"), (31, "share.png"), (32, "one.png"), (33, "two.png")] {
            api.add_media(file(id, name), vec![id as u8; 4]);
        }
        api.add_media_link(link(ARTICLE, 1, "cover", 30, 0));
        api.add_media_link(link("shared.seo", 5, "shareImage", 31, 0));
        api.add_media_link(link("shared.gallery", 7, "images", 33, 1));
        api.add_media_link(link("shared.gallery", 7, "images", 32, 0));
        api
    }

    fn target_api() -> MemoryContentApi {
        let api = MemoryContentApi::new("production");
        api.set_schema(schema());
        api
    }

    #[tokio::test]
    async fn test_prefetch_resolves_components_and_media() {
        let (source, target) = (source_api(), target_api());
        let snapshot = prefetch(&source, &target, &LoaderConfig::default()).await.unwrap();

        let article = snapshot.source.get(ARTICLE, 1).unwrap();
        assert_eq!(article.raw["cover"], json!({"id": 30}));
        assert_eq!(article.raw["seo"]["shareImage"], json!({"id": 31}));
        assert_eq!(article.raw["blocks"][1]["images"], json!([{"id": 32}, {"id": 33}]));
        assert_eq!(article.raw["blocks"][0]["__component"], json!("shared.quote"));

        assert_eq!(
            article.cleaned["seo"],
            json!({"metaTitle": "M", "shareImage": marker(MEDIA_TYPE, 31)})
        );
        assert_eq!(
            article.cleaned["blocks"][0],
            json!({"__component": "shared.quote", "body": "B"})
        );

        let paths: Vec<&str> = article.links.iter().map(|l| l.field_path.as_str()).collect();
        assert_eq!(paths, vec!["blocks.1.images", "blocks.1.images", "cover", "seo.shareImage"]);
        assert_eq!(article.links[1].target_id, 33);
        assert_eq!(article.links[1].position, 1);

        assert_eq!(snapshot.source.entities_of(MEDIA_TYPE).count(), 4);
        assert!(snapshot.source.fingerprint(30).is_some());
        assert!(snapshot.target.is_loaded(ARTICLE));
        assert!(snapshot.target.entities().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_type_to_empty() {
        let (source, target) = (source_api(), target_api());
        source.fail_fetches_for("api::tag.tag");

        let snapshot = prefetch(&source, &target, &LoaderConfig::default()).await.unwrap();

        assert_eq!(snapshot.source.entities_of("api::tag.tag").count(), 0);
        assert!(!snapshot.source.is_loaded("api::tag.tag"));
        assert!(snapshot.source.is_loaded(ARTICLE));
    }

    #[tokio::test]
    async fn test_schema_failure_aborts() {
        let (source, target) = (source_api(), target_api());
        target.fail_schema();

        let err = prefetch(&source, &target, &LoaderConfig::default())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("production"));
    }

    #[tokio::test]
    async fn test_component_nesting_is_bounded() {
        let api = target_api();
        api.add_row(
            ARTICLE,
            json!({"id": 1, "documentId": "deep", "updatedAt": "2024-01-01T00:00:00Z", "tree": {"id": 1}}),
        );
        api.add_component_row("shared.node", json!({"id": 1, "label": "a", "child": {"id": 2}}));
        api.add_component_row("shared.node", json!({"id": 2, "label": "b", "child": {"id": 3}}));
        api.add_component_row("shared.node", json!({"id": 3, "label": "c"}));

        let config = LoaderConfig {
            max_depth: 2,
            fingerprint_media: false,
            ..Default::default()
        };
        let loaded = load_instance(&api, InstanceSide::Target, &config).await.unwrap();
        let entity = loaded.data.get(ARTICLE, 1).unwrap();

        assert_eq!(entity.raw["tree"]["label"], json!("a"));
        assert_eq!(entity.raw["tree"]["child"]["label"], json!("b"));
        assert_eq!(entity.raw["tree"]["child"]["child"], Value::Null);
        assert!(loaded.data.fingerprint(30).is_none());
    }
}
