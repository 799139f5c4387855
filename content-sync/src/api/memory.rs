//! In-memory content instance for tests
//!
//! Holds rows, component rows and media files in memory, records every write
//! in order and can be told to fail fetches or writes for chosen types.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use super::content::{ContentApi, CreatedEntry, EntryTarget, MediaFile, MediaLinkRow, MediaUpload};
use super::metadata::SchemaRegistry;
use crate::sync::types::{MEDIA_TYPE, MediaMeta};

#[derive(Default)]
struct MemoryState {
    schema: SchemaRegistry,
    rows: BTreeMap<String, Vec<Value>>,
    component_rows: BTreeMap<String, Vec<Value>>,
    media: Vec<MediaFile>,
    media_links: Vec<MediaLinkRow>,
    blobs: HashMap<String, Vec<u8>>,
    folders: BTreeMap<String, i64>,
    next_id: i64,
    failing_fetches: HashSet<String>,
    failing_writes: HashSet<String>,
    failing_documents: HashSet<String>,
    fail_schema: bool,
    writes: Vec<String>,
}

pub struct MemoryContentApi {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemoryContentApi {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState {
                next_id: 1000,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    pub fn set_schema(&self, schema: SchemaRegistry) {
        self.state().schema = schema;
    }

    pub fn add_row(&self, content_type: &str, row: Value) {
        self.state()
            .rows
            .entry(content_type.to_string())
            .or_default()
            .push(row);
    }

    pub fn add_component_row(&self, component: &str, row: Value) {
        self.state()
            .component_rows
            .entry(component.to_string())
            .or_default()
            .push(row);
    }

    pub fn add_media(&self, file: MediaFile, bytes: Vec<u8>) {
        let mut state = self.state();
        state.blobs.insert(file.meta.url.clone(), bytes);
        state.media.push(file);
    }

    pub fn add_media_link(&self, link: MediaLinkRow) {
        self.state().media_links.push(link);
    }

    pub fn fail_fetches_for(&self, content_type: &str) {
        self.state().failing_fetches.insert(content_type.to_string());
    }

    pub fn fail_writes_for(&self, content_type: &str) {
        self.state().failing_writes.insert(content_type.to_string());
    }

    /// Fail creates whose payload carries this title, and writes to this document id
    pub fn fail_document(&self, marker: &str) {
        self.state().failing_documents.insert(marker.to_string());
    }

    pub fn fail_schema(&self) {
        self.state().fail_schema = true;
    }

    pub fn rows_of(&self, content_type: &str) -> Vec<Value> {
        self.state()
            .rows
            .get(content_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row_by_document(&self, content_type: &str, document_id: &str) -> Option<Value> {
        self.rows_of(content_type)
            .into_iter()
            .find(|row| row.get("documentId").and_then(Value::as_str) == Some(document_id))
    }

    pub fn media_files(&self) -> Vec<MediaFile> {
        self.state().media.clone()
    }

    pub fn folders(&self) -> Vec<String> {
        self.state().folders.keys().cloned().collect()
    }

    /// Every write, in call order, as "<operation> <type> <document>"
    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    fn check_write(state: &MemoryState, content_type: &str, document: &str) -> Result<()> {
        if state.failing_writes.contains(content_type) || state.failing_documents.contains(document)
        {
            bail!("Injected write failure for {} {}", content_type, document);
        }
        Ok(())
    }
}

fn stamp(data: &Value, id: i64, document_id: &str, locale: Option<&str>) -> Value {
    let mut row = data.as_object().cloned().unwrap_or_else(Map::new);
    row.insert("id".to_string(), Value::from(id));
    row.insert("documentId".to_string(), Value::from(document_id));
    row.insert("updatedAt".to_string(), Value::from(Utc::now().to_rfc3339()));
    if let Some(locale) = locale {
        row.insert("locale".to_string(), Value::from(locale));
    }
    Value::Object(row)
}

fn title_of(data: &Value) -> &str {
    data.get("title").and_then(Value::as_str).unwrap_or("")
}

#[async_trait]
impl ContentApi for MemoryContentApi {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_schema(&self) -> Result<SchemaRegistry> {
        let state = self.state();
        if state.fail_schema {
            bail!("{} is unreachable", self.name);
        }
        Ok(state.schema.clone())
    }

    async fn fetch_rows(&self, content_type: &str) -> Result<Vec<Value>> {
        let state = self.state();
        if state.failing_fetches.contains(content_type) {
            bail!("Injected fetch failure for {}", content_type);
        }
        Ok(state.rows.get(content_type).cloned().unwrap_or_default())
    }

    async fn fetch_component_rows(&self, component: &str) -> Result<Vec<Value>> {
        Ok(self
            .state()
            .component_rows
            .get(component)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_media(&self) -> Result<Vec<MediaFile>> {
        let state = self.state();
        if state.failing_fetches.contains(MEDIA_TYPE) {
            bail!("Injected fetch failure for media");
        }
        Ok(state.media.clone())
    }

    async fn fetch_media_links(&self) -> Result<Vec<MediaLinkRow>> {
        Ok(self.state().media_links.clone())
    }

    async fn download_media(&self, url: &str) -> Result<Vec<u8>> {
        self.state()
            .blobs
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("No file at {}", url))
    }

    async fn create_entry(&self, entry: &EntryTarget, data: &Value) -> Result<CreatedEntry> {
        let mut state = self.state();
        Self::check_write(&state, &entry.content_type, title_of(data))?;

        state.next_id += 1;
        let id = state.next_id;
        let document_id = format!("doc-{}", id);
        let row = stamp(data, id, &document_id, entry.locale.as_deref());
        state
            .rows
            .entry(entry.content_type.clone())
            .or_default()
            .push(row);
        state
            .writes
            .push(format!("create {} {}", entry.content_type, title_of(data)));
        Ok(CreatedEntry { id, document_id })
    }

    async fn update_entry(
        &self,
        entry: &EntryTarget,
        document_id: &str,
        data: &Value,
    ) -> Result<CreatedEntry> {
        let mut state = self.state();
        Self::check_write(&state, &entry.content_type, document_id)?;

        let rows = state.rows.entry(entry.content_type.clone()).or_default();
        let row = rows
            .iter_mut()
            .find(|row| row.get("documentId").and_then(Value::as_str) == Some(document_id))
            .ok_or_else(|| anyhow!("{} {} not found", entry.content_type, document_id))?;
        let id = row.get("id").and_then(Value::as_i64).unwrap_or_default();
        *row = stamp(data, id, document_id, entry.locale.as_deref());

        state
            .writes
            .push(format!("update {} {}", entry.content_type, document_id));
        Ok(CreatedEntry {
            id,
            document_id: document_id.to_string(),
        })
    }

    async fn delete_entry(&self, entry: &EntryTarget, document_id: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&state, &entry.content_type, document_id)?;

        let rows = state.rows.entry(entry.content_type.clone()).or_default();
        let before = rows.len();
        rows.retain(|row| row.get("documentId").and_then(Value::as_str) != Some(document_id));
        if rows.len() == before {
            bail!("{} {} not found", entry.content_type, document_id);
        }
        state
            .writes
            .push(format!("delete {} {}", entry.content_type, document_id));
        Ok(())
    }

    async fn upload_media(&self, upload: &MediaUpload) -> Result<CreatedEntry> {
        let mut state = self.state();
        Self::check_write(&state, MEDIA_TYPE, &upload.name)?;

        state.next_id += 1;
        let id = state.next_id;
        let document_id = format!("file-{}", id);
        let url = format!("/uploads/{}", upload.name);
        if let Some(bytes) = &upload.bytes {
            state.blobs.insert(url.clone(), bytes.clone());
        }
        state.media.push(MediaFile {
            id,
            document_id: document_id.clone(),
            updated_at: Utc::now(),
            meta: MediaMeta {
                name: upload.name.clone(),
                alternative_text: upload.alternative_text.clone(),
                caption: upload.caption.clone(),
                mime: upload.mime.clone(),
                size_kb: upload.bytes.as_ref().map(|b| b.len() as f64 / 1024.0).unwrap_or(0.0),
                url,
                ..Default::default()
            },
        });
        state.writes.push(format!("upload {} {}", MEDIA_TYPE, upload.name));
        Ok(CreatedEntry { id, document_id })
    }

    async fn update_media(&self, file_id: i64, upload: &MediaUpload) -> Result<CreatedEntry> {
        let mut state = self.state();
        Self::check_write(&state, MEDIA_TYPE, &upload.name)?;

        let file = state
            .media
            .iter_mut()
            .find(|f| f.id == file_id)
            .ok_or_else(|| anyhow!("File {} not found", file_id))?;
        file.meta.name = upload.name.clone();
        file.meta.alternative_text = upload.alternative_text.clone();
        file.meta.caption = upload.caption.clone();
        let created = CreatedEntry {
            id: file.id,
            document_id: file.document_id.clone(),
        };
        let url = file.meta.url.clone();
        if let Some(bytes) = &upload.bytes {
            state.blobs.insert(url, bytes.clone());
        }
        state.writes.push(format!("update {} {}", MEDIA_TYPE, upload.name));
        Ok(created)
    }

    async fn delete_media(&self, file_id: i64) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&state, MEDIA_TYPE, &file_id.to_string())?;

        let before = state.media.len();
        state.media.retain(|f| f.id != file_id);
        if state.media.len() == before {
            bail!("File {} not found", file_id);
        }
        state.writes.push(format!("delete {} {}", MEDIA_TYPE, file_id));
        Ok(())
    }

    async fn create_folder(&self, path: &str) -> Result<i64> {
        let mut state = self.state();
        if let Some(id) = state.folders.get(path) {
            return Ok(*id);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.folders.insert(path.to_string(), id);
        Ok(id)
    }
}
