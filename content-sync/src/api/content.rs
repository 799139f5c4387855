//! Content backend interface
//!
//! Everything the sync engine needs from an instance goes through
//! [`ContentApi`]: schema and row extraction for the loader, and entry/media
//! writes for the merge processor. Rows are returned as raw JSON; the engine
//! only relies on `id`, `documentId` and `updatedAt` being present.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::metadata::SchemaRegistry;
use crate::sync::types::{ContentKind, MediaMeta};

/// Address of an entry collection on an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTarget {
    pub content_type: String,
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl EntryTarget {
    pub fn new(content_type: impl Into<String>, kind: ContentKind, locale: Option<String>) -> Self {
        Self {
            content_type: content_type.into(),
            kind,
            locale,
        }
    }
}

/// Identity of an entry or file after a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEntry {
    pub id: i64,
    pub document_id: String,
}

/// Uploaded file as listed by the media library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: i64,
    pub document_id: String,
    pub updated_at: DateTime<Utc>,
    pub meta: MediaMeta,
}

impl MediaFile {
    /// Parse one row of the media library listing
    pub fn from_row(row: &Value) -> Result<Self> {
        let id = row
            .get("id")
            .and_then(Value::as_i64)
            .context("Media file without id")?;
        let document_id = row
            .get("documentId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("file-{}", id));
        let updated_at = parse_timestamp(row.get("updatedAt"))
            .with_context(|| format!("Media file {} has no valid updatedAt", id))?;

        let text = |key: &str| row.get(key).and_then(Value::as_str).map(str::to_string);
        let dimension = |key: &str| row.get(key).and_then(Value::as_u64).map(|v| v as u32);

        Ok(Self {
            id,
            document_id,
            updated_at,
            meta: MediaMeta {
                name: text("name").unwrap_or_default(),
                alternative_text: text("alternativeText"),
                caption: text("caption"),
                mime: text("mime").unwrap_or_default(),
                ext: text("ext").unwrap_or_default(),
                size_kb: row.get("size").and_then(Value::as_f64).unwrap_or(0.0),
                width: dimension("width"),
                height: dimension("height"),
                url: text("url").unwrap_or_default(),
                folder_path: text("folderPath").filter(|p| !p.is_empty() && p != "/"),
            },
        })
    }
}

/// One row of the media relation table: a file attached to a field of an entry or component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLinkRow {
    /// Content type or component uid owning the field
    pub related_type: String,
    pub related_id: i64,
    pub field: String,
    pub file_id: i64,
    pub order: i64,
}

/// File metadata (and optionally new bytes) for an upload or replacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUpload {
    pub name: String,
    pub alternative_text: Option<String>,
    pub caption: Option<String>,
    pub mime: String,
    pub folder_id: Option<i64>,
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
}

impl MediaUpload {
    pub fn from_meta(meta: &MediaMeta, folder_id: Option<i64>, bytes: Option<Vec<u8>>) -> Self {
        Self {
            name: meta.name.clone(),
            alternative_text: meta.alternative_text.clone(),
            caption: meta.caption.clone(),
            mime: meta.mime.clone(),
            folder_id,
            bytes,
        }
    }
}

/// Parse an RFC 3339 timestamp field
pub fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Read and write access to one content instance
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Name of the instance, for logging
    fn name(&self) -> &str;

    async fn fetch_schema(&self) -> Result<SchemaRegistry>;

    /// All rows of a content type; components may be inline or `{"id"}` references
    async fn fetch_rows(&self, content_type: &str) -> Result<Vec<Value>>;

    /// All rows of a component type, for resolving component references
    async fn fetch_component_rows(&self, component: &str) -> Result<Vec<Value>>;

    async fn fetch_media(&self) -> Result<Vec<MediaFile>>;

    async fn fetch_media_links(&self) -> Result<Vec<MediaLinkRow>>;

    async fn download_media(&self, url: &str) -> Result<Vec<u8>>;

    async fn create_entry(&self, entry: &EntryTarget, data: &Value) -> Result<CreatedEntry>;

    async fn update_entry(
        &self,
        entry: &EntryTarget,
        document_id: &str,
        data: &Value,
    ) -> Result<CreatedEntry>;

    async fn delete_entry(&self, entry: &EntryTarget, document_id: &str) -> Result<()>;

    async fn upload_media(&self, upload: &MediaUpload) -> Result<CreatedEntry>;

    /// Update a file's metadata, replacing its bytes when the upload carries some
    async fn update_media(&self, file_id: i64, upload: &MediaUpload) -> Result<CreatedEntry>;

    async fn delete_media(&self, file_id: i64) -> Result<()>;

    /// Ensure a slash-separated folder path exists and return the leaf folder id
    async fn create_folder(&self, path: &str) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_media_file_from_row() {
        let file = MediaFile::from_row(&json!({
            "id": 3,
            "documentId": "f3",
            "name": "hero.png",
            "alternativeText": "Hero",
            "caption": null,
            "mime": "image/png",
            "ext": ".png",
            "size": 12.5,
            "width": 640,
            "height": 480,
            "url": "/uploads/hero.png",
            "folderPath": "/",
            "updatedAt": "2024-03-01T10:00:00.000Z"
        }))
        .unwrap();

        assert_eq!(file.document_id, "f3");
        assert_eq!(file.meta.alternative_text.as_deref(), Some("Hero"));
        assert_eq!(file.meta.caption, None);
        assert_eq!(file.meta.width, Some(640));
        assert_eq!(file.meta.folder_path, None);
    }

    #[test]
    fn test_media_file_requires_timestamp() {
        assert!(MediaFile::from_row(&json!({"id": 1})).is_err());
    }
}
