//! HTTP client for a content instance
//!
//! Talks to the instance's REST API with a bearer token. Every request goes
//! through the concurrency limiter and the retry policy; throttling (429),
//! server errors and transport failures are retried.
//!
//! Rows are read with `populate=*`, so components and media arrive inline and
//! the component and media-relation listings come back empty.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};

use super::content::{ContentApi, CreatedEntry, EntryTarget, MediaFile, MediaLinkRow, MediaUpload};
use super::metadata::{SchemaRegistry, parse_schema};
use super::resilience::{ConcurrencyLimiter, ResilienceConfig, RetryPolicy, RetryableError};
use crate::sync::types::ContentKind;

const PAGE_SIZE: usize = 100;

/// Failure of a single request
#[derive(Debug)]
pub enum ApiError {
    Transport(reqwest::Error),
    Status {
        status: StatusCode,
        request: String,
        body: String,
    },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Transport(e) => write!(f, "transport error: {}", e),
            ApiError::Status {
                status,
                request,
                body,
            } => {
                let body: String = body.chars().take(300).collect();
                write!(f, "{} returned {}: {}", request, status, body)
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl RetryableError for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
        }
    }
}

pub struct HttpContentApi {
    name: String,
    base_url: String,
    token: Option<String>,
    http: Client,
    retry: RetryPolicy,
    limiter: ConcurrencyLimiter,
    schema: RwLock<Option<SchemaRegistry>>,
    folders: Mutex<Option<HashMap<String, i64>>>,
}

impl HttpContentApi {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
        resilience: &ResilienceConfig,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            http,
            retry: RetryPolicy::new(resilience.retry.clone()),
            limiter: ConcurrencyLimiter::new(resilience.concurrency.clone()),
            schema: RwLock::new(None),
            folders: Mutex::new(None),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn asset_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    /// Send a request built by `build`, retrying per policy
    async fn send<F>(&self, label: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let _permit = self.limiter.acquire().await?;
        let build = &build;

        let response = self
            .retry
            .execute(label, move || async move {
                let mut request = build(&self.http);
                if let Some(token) = &self.token {
                    request = request.bearer_auth(token);
                }
                let response = request.send().await.map_err(ApiError::Transport)?;
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let body = response.text().await.unwrap_or_default();
                Err(ApiError::Status {
                    status,
                    request: label.to_string(),
                    body,
                })
            })
            .await?;
        Ok(response)
    }

    async fn send_json<F>(&self, label: &str, build: F) -> Result<Value>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.send(label, build).await?;
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response of {}", label))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON from {}", label))
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.api_url(path);
        let label = format!("GET {} on {}", path, self.name);
        self.send_json(&label, |http| http.get(&url).query(query)).await
    }

    async fn schema(&self) -> Result<SchemaRegistry> {
        if let Some(schema) = self.schema.read().await.as_ref() {
            return Ok(schema.clone());
        }
        let schema = self.fetch_schema().await?;
        Ok(schema)
    }

    /// REST path of an entry collection, plus the document when given
    async fn entry_path(&self, entry: &EntryTarget, document_id: Option<&str>) -> Result<String> {
        let schema = self.schema().await?;
        let content_type = schema
            .content_type(&entry.content_type)
            .ok_or_else(|| anyhow!("{} has no content type {}", self.name, entry.content_type))?;

        Ok(match (entry.kind, document_id) {
            (ContentKind::SingleType, _) => content_type.singular_name.clone(),
            (ContentKind::CollectionType, Some(doc)) => {
                format!("{}/{}", content_type.plural_name, urlencoding::encode(doc))
            }
            (ContentKind::CollectionType, None) => content_type.plural_name.clone(),
        })
    }

    async fn write_entry(
        &self,
        method: reqwest::Method,
        entry: &EntryTarget,
        document_id: Option<&str>,
        data: &Value,
    ) -> Result<CreatedEntry> {
        let path = self.entry_path(entry, document_id).await?;
        let url = self.api_url(&path);
        let query = locale_query(entry.locale.as_deref());
        let body = json!({ "data": data });
        let label = format!("{} {} on {}", method, path, self.name);

        let response = self
            .send_json(&label, |http| {
                http.request(method.clone(), &url).query(&query).json(&body)
            })
            .await?;
        created_from(response.get("data").unwrap_or(&response))
            .with_context(|| format!("Unexpected response to {}", label))
    }

    async fn fetch_collection(&self, path: &str) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        let mut page = 1;
        loop {
            let body = self
                .get_json(
                    path,
                    &[
                        ("populate", "*".to_string()),
                        ("locale", "all".to_string()),
                        ("pagination[page]", page.to_string()),
                        ("pagination[pageSize]", PAGE_SIZE.to_string()),
                    ],
                )
                .await?;
            if let Some(Value::Array(items)) = body.get("data") {
                rows.extend(items.iter().cloned());
            }
            if page >= page_count(&body) {
                break;
            }
            page += 1;
        }
        Ok(rows)
    }

    async fn folder_index(&self) -> Result<HashMap<String, i64>> {
        let body = self
            .get_json("upload/folders", &[("populate", "parent".to_string())])
            .await?;
        let rows = match body.get("data") {
            Some(Value::Array(rows)) => rows.clone(),
            _ => body.as_array().cloned().unwrap_or_default(),
        };
        Ok(folder_paths(&rows))
    }

    /// Folder name paths keyed by folder id, loaded once per client
    async fn folder_names(&self) -> Result<HashMap<i64, String>> {
        let mut guard = self.folders.lock().await;
        if guard.is_none() {
            *guard = Some(self.folder_index().await?);
        }
        Ok(guard
            .iter()
            .flatten()
            .map(|(path, id)| (*id, path.clone()))
            .collect())
    }
}

fn locale_query(locale: Option<&str>) -> Vec<(&'static str, String)> {
    locale
        .map(|locale| vec![("locale", locale.to_string())])
        .unwrap_or_default()
}

fn created_from(data: &Value) -> Result<CreatedEntry> {
    let id = data.get("id").and_then(Value::as_i64).context("missing id")?;
    let document_id = data
        .get("documentId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("file-{}", id));
    Ok(CreatedEntry { id, document_id })
}

/// Multipart body of an upload; forms are consumed on send, so every attempt builds one
fn upload_form(upload: &MediaUpload) -> Form {
    let info = json!({
        "name": upload.name,
        "alternativeText": upload.alternative_text,
        "caption": upload.caption,
        "folder": upload.folder_id,
    });
    let mut form = Form::new().text("fileInfo", info.to_string());
    if let Some(bytes) = &upload.bytes {
        form = form.part("files", file_part(bytes, &upload.name, &upload.mime));
    }
    form
}

/// Upload responses carry a list of files, updates a single one
fn file_from(response: &Value) -> Result<CreatedEntry> {
    let file = match response {
        Value::Array(files) => files.first().context("no file in response")?,
        other => other,
    };
    created_from(file)
}

fn page_count(body: &Value) -> usize {
    body.pointer("/meta/pagination/pageCount")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(1)
}

fn file_part(bytes: &[u8], name: &str, mime: &str) -> Part {
    let part = Part::bytes(bytes.to_vec()).file_name(name.to_string());
    match part.mime_str(mime) {
        Ok(part) => part,
        Err(_) => Part::bytes(bytes.to_vec()).file_name(name.to_string()),
    }
}

/// Name paths ("/a/b") of media folders from a listing with parents populated
pub(crate) fn folder_paths(rows: &[Value]) -> HashMap<String, i64> {
    let folders: HashMap<i64, (String, Option<i64>)> = rows
        .iter()
        .filter_map(|row| {
            let id = row.get("id").and_then(Value::as_i64)?;
            let name = row.get("name").and_then(Value::as_str)?.to_string();
            let parent = row.pointer("/parent/id").and_then(Value::as_i64);
            Some((id, (name, parent)))
        })
        .collect();

    let mut paths = HashMap::new();
    for id in folders.keys() {
        let mut segments = Vec::new();
        let mut current = Some(*id);
        while let Some(folder) = current {
            let Some((name, parent)) = folders.get(&folder) else {
                break;
            };
            if segments.len() > folders.len() {
                break;
            }
            segments.push(name.as_str());
            current = *parent;
        }
        segments.reverse();
        paths.insert(format!("/{}", segments.join("/")), *id);
    }
    paths
}

/// Name path of a file's folder from its id path ("/1/3")
///
/// Ids differ between instances, names do not.
pub(crate) fn named_folder_path(id_path: &str, names: &HashMap<i64, String>) -> Option<String> {
    let last = id_path.rsplit('/').find(|s| !s.is_empty())?;
    let id = last.parse::<i64>().ok()?;
    names.get(&id).cloned()
}

#[async_trait]
impl ContentApi for HttpContentApi {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_schema(&self) -> Result<SchemaRegistry> {
        let content_types = self
            .get_json("content-type-builder/content-types", &[])
            .await?;
        let components = self.get_json("content-type-builder/components", &[]).await?;
        let schema = parse_schema(&content_types, &components)
            .with_context(|| format!("Invalid schema from {}", self.name))?;

        *self.schema.write().await = Some(schema.clone());
        Ok(schema)
    }

    async fn fetch_rows(&self, content_type: &str) -> Result<Vec<Value>> {
        let schema = self.schema().await?;
        let definition = schema
            .content_type(content_type)
            .ok_or_else(|| anyhow!("{} has no content type {}", self.name, content_type))?;

        match definition.kind {
            ContentKind::CollectionType => self.fetch_collection(&definition.plural_name).await,
            ContentKind::SingleType => {
                let result = self
                    .get_json(
                        &definition.singular_name,
                        &[("populate", "*".to_string()), ("locale", "all".to_string())],
                    )
                    .await;
                match result {
                    Ok(body) => Ok(match body.get("data") {
                        Some(Value::Array(rows)) => rows.clone(),
                        Some(row @ Value::Object(_)) => vec![row.clone()],
                        _ => Vec::new(),
                    }),
                    Err(e) if is_not_found(&e) => Ok(Vec::new()),
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn fetch_component_rows(&self, _component: &str) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn fetch_media(&self) -> Result<Vec<MediaFile>> {
        let body = self
            .get_json("upload/files", &[("sort", "id:asc".to_string())])
            .await?;
        let rows = match &body {
            Value::Array(rows) => rows.as_slice(),
            _ => body
                .get("data")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        };
        let mut files = rows
            .iter()
            .map(MediaFile::from_row)
            .collect::<Result<Vec<_>>>()?;
        if files.iter().all(|f| f.meta.folder_path.is_none()) {
            return Ok(files);
        }

        let names = match self.folder_names().await {
            Ok(names) => names,
            Err(e) => {
                log::warn!("Folder listing failed on {}, ignoring folders: {:#}", self.name, e);
                HashMap::new()
            }
        };
        for file in &mut files {
            file.meta.folder_path = file
                .meta
                .folder_path
                .as_deref()
                .and_then(|p| named_folder_path(p, &names));
        }
        Ok(files)
    }

    async fn fetch_media_links(&self) -> Result<Vec<MediaLinkRow>> {
        Ok(Vec::new())
    }

    async fn download_media(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.asset_url(url);
        let label = format!("download {}", url);
        let response = self.send(&label, |http| http.get(&url)).await?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read {}", url))?;
        Ok(bytes.to_vec())
    }

    async fn create_entry(&self, entry: &EntryTarget, data: &Value) -> Result<CreatedEntry> {
        let method = match entry.kind {
            ContentKind::SingleType => reqwest::Method::PUT,
            ContentKind::CollectionType => reqwest::Method::POST,
        };
        self.write_entry(method, entry, None, data).await
    }

    async fn update_entry(
        &self,
        entry: &EntryTarget,
        document_id: &str,
        data: &Value,
    ) -> Result<CreatedEntry> {
        self.write_entry(reqwest::Method::PUT, entry, Some(document_id), data)
            .await
    }

    async fn delete_entry(&self, entry: &EntryTarget, document_id: &str) -> Result<()> {
        let path = self.entry_path(entry, Some(document_id)).await?;
        let url = self.api_url(&path);
        let query = locale_query(entry.locale.as_deref());
        let label = format!("DELETE {} on {}", path, self.name);
        self.send(&label, |http| http.delete(&url).query(&query))
            .await?;
        Ok(())
    }

    async fn upload_media(&self, upload: &MediaUpload) -> Result<CreatedEntry> {
        let url = self.api_url("upload");
        let label = format!("upload {} to {}", upload.name, self.name);
        let response = self
            .send_json(&label, |http| http.post(&url).multipart(upload_form(upload)))
            .await?;
        file_from(&response).with_context(|| format!("Unexpected response to {}", label))
    }

    async fn update_media(&self, file_id: i64, upload: &MediaUpload) -> Result<CreatedEntry> {
        let url = self.api_url("upload");
        let label = format!("update file {} on {}", file_id, self.name);
        let query = [("id", file_id.to_string())];
        let response = self
            .send_json(&label, |http| {
                http.post(&url).query(&query).multipart(upload_form(upload))
            })
            .await?;
        file_from(&response).with_context(|| format!("Unexpected response to {}", label))
    }

    async fn delete_media(&self, file_id: i64) -> Result<()> {
        let url = self.api_url(&format!("upload/files/{}", file_id));
        let label = format!("delete file {} on {}", file_id, self.name);
        self.send(&label, |http| http.delete(&url)).await?;
        Ok(())
    }

    async fn create_folder(&self, path: &str) -> Result<i64> {
        let mut guard = self.folders.lock().await;
        if guard.is_none() {
            *guard = Some(self.folder_index().await?);
        }
        let Some(index) = guard.as_mut() else {
            return Err(anyhow!("Folder index unavailable on {}", self.name));
        };

        let mut current = String::new();
        let mut parent: Option<i64> = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = format!("{}/{}", current, segment);
            if let Some(id) = index.get(&current) {
                parent = Some(*id);
                continue;
            }

            let url = self.api_url("upload/folders");
            let body = json!({ "name": segment, "parent": parent });
            let label = format!("create folder {} on {}", current, self.name);
            let response = self
                .send_json(&label, |http| http.post(&url).json(&body))
                .await?;
            let id = response
                .get("data")
                .unwrap_or(&response)
                .get("id")
                .and_then(Value::as_i64)
                .with_context(|| format!("Unexpected response to {}", label))?;

            log::info!("Created folder {} on {}", current, self.name);
            index.insert(current.clone(), id);
            parent = Some(id);
        }

        parent.ok_or_else(|| anyhow!("Empty folder path '{}'", path))
    }
}

fn is_not_found(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<ApiError>(),
        Some(ApiError::Status { status, .. }) if *status == StatusCode::NOT_FOUND
    )
}
