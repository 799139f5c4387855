//! Write operations against a target instance

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::content::{ContentApi, CreatedEntry, EntryTarget, MediaUpload};

/// A single write the merge processor sends to the target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    /// Create a new entry
    CreateEntry {
        entry: EntryTarget,
        /// Entry payload with references already translated
        data: Value,
    },
    /// Update an existing entry
    UpdateEntry {
        entry: EntryTarget,
        /// Document id of the entry on the target
        document_id: String,
        data: Value,
    },
    /// Delete an entry
    DeleteEntry {
        entry: EntryTarget,
        document_id: String,
    },
    /// Upload a new file
    UploadMedia { upload: MediaUpload },
    /// Update a file's metadata, replacing the binary when bytes are attached
    UpdateMedia { file_id: i64, upload: MediaUpload },
    /// Delete a file
    DeleteMedia { file_id: i64 },
    /// Ensure a media folder path exists
    CreateFolder { path: String },
}

/// Result of executing an Operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// The operation that was executed
    pub operation: Operation,
    pub success: bool,
    /// Identity of the written entry or file (creates, updates and folders)
    pub created: Option<CreatedEntry>,
    /// Error message if operation failed
    pub error: Option<String>,
}

impl Operation {
    pub fn create_entry(entry: EntryTarget, data: Value) -> Self {
        Self::CreateEntry { entry, data }
    }

    pub fn update_entry(entry: EntryTarget, document_id: impl Into<String>, data: Value) -> Self {
        Self::UpdateEntry {
            entry,
            document_id: document_id.into(),
            data,
        }
    }

    pub fn delete_entry(entry: EntryTarget, document_id: impl Into<String>) -> Self {
        Self::DeleteEntry {
            entry,
            document_id: document_id.into(),
        }
    }

    pub fn upload_media(upload: MediaUpload) -> Self {
        Self::UploadMedia { upload }
    }

    pub fn update_media(file_id: i64, upload: MediaUpload) -> Self {
        Self::UpdateMedia { file_id, upload }
    }

    pub fn delete_media(file_id: i64) -> Self {
        Self::DeleteMedia { file_id }
    }

    pub fn create_folder(path: impl Into<String>) -> Self {
        Self::CreateFolder { path: path.into() }
    }

    /// Content type the operation writes to
    pub fn entity(&self) -> &str {
        match self {
            Operation::CreateEntry { entry, .. }
            | Operation::UpdateEntry { entry, .. }
            | Operation::DeleteEntry { entry, .. } => &entry.content_type,
            Operation::UploadMedia { .. }
            | Operation::UpdateMedia { .. }
            | Operation::DeleteMedia { .. } => crate::sync::types::MEDIA_TYPE,
            Operation::CreateFolder { .. } => "plugin::upload.folder",
        }
    }

    pub fn operation_type(&self) -> &'static str {
        match self {
            Operation::CreateEntry { .. } => "CreateEntry",
            Operation::UpdateEntry { .. } => "UpdateEntry",
            Operation::DeleteEntry { .. } => "DeleteEntry",
            Operation::UploadMedia { .. } => "UploadMedia",
            Operation::UpdateMedia { .. } => "UpdateMedia",
            Operation::DeleteMedia { .. } => "DeleteMedia",
            Operation::CreateFolder { .. } => "CreateFolder",
        }
    }

    /// Payload sent with the operation, if any
    pub fn data(&self) -> Option<&Value> {
        match self {
            Operation::CreateEntry { data, .. } | Operation::UpdateEntry { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Execute against an instance; failures are captured in the result
    pub async fn execute(&self, api: &dyn ContentApi) -> OperationResult {
        let outcome = match self {
            Operation::CreateEntry { entry, data } => api.create_entry(entry, data).await.map(Some),
            Operation::UpdateEntry {
                entry,
                document_id,
                data,
            } => api.update_entry(entry, document_id, data).await.map(Some),
            Operation::DeleteEntry { entry, document_id } => {
                api.delete_entry(entry, document_id).await.map(|_| None)
            }
            Operation::UploadMedia { upload } => api.upload_media(upload).await.map(Some),
            Operation::UpdateMedia { file_id, upload } => {
                api.update_media(*file_id, upload).await.map(Some)
            }
            Operation::DeleteMedia { file_id } => api.delete_media(*file_id).await.map(|_| None),
            Operation::CreateFolder { path } => api.create_folder(path).await.map(|id| {
                Some(CreatedEntry {
                    id,
                    document_id: path.clone(),
                })
            }),
        };

        match outcome {
            Ok(created) => OperationResult::success(self.clone(), created),
            Err(e) => {
                log::debug!(
                    "{} on {} failed against {}: {:#}",
                    self.operation_type(),
                    self.entity(),
                    api.name(),
                    e
                );
                OperationResult::error(self.clone(), format!("{:#}", e))
            }
        }
    }
}

impl OperationResult {
    pub fn success(operation: Operation, created: Option<CreatedEntry>) -> Self {
        Self {
            operation,
            success: true,
            created,
            error: None,
        }
    }

    pub fn error(operation: Operation, error: String) -> Self {
        Self {
            operation,
            success: false,
            created: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_error(&self) -> bool {
        !self.success
    }

    /// Convert to a Result, failing with the recorded error message
    pub fn into_result(self) -> anyhow::Result<Option<CreatedEntry>> {
        if self.success {
            Ok(self.created)
        } else {
            Err(anyhow::anyhow!(
                "{} failed: {}",
                self.operation.operation_type(),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemoryContentApi;
    use crate::sync::types::ContentKind;
    use serde_json::json;

    fn articles() -> EntryTarget {
        EntryTarget::new("api::article.article", ContentKind::CollectionType, None)
    }

    #[tokio::test]
    async fn test_execute_create_and_delete() {
        let api = MemoryContentApi::new("target");

        let created = Operation::create_entry(articles(), json!({"title": "Hello"}))
            .execute(&api)
            .await
            .into_result()
            .unwrap()
            .unwrap();
        assert_eq!(api.rows_of("api::article.article").len(), 1);

        let deleted = Operation::delete_entry(articles(), created.document_id)
            .execute(&api)
            .await;
        assert!(deleted.is_success());
        assert!(api.rows_of("api::article.article").is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_captured() {
        let api = MemoryContentApi::new("target");
        api.fail_writes_for("api::article.article");

        let result = Operation::create_entry(articles(), json!({}))
            .execute(&api)
            .await;
        assert!(result.is_error());
        assert!(result.into_result().is_err());
    }

    #[test]
    fn test_operation_labels() {
        let op = Operation::update_media(4, MediaUpload {
            name: "a.png".to_string(),
            alternative_text: None,
            caption: None,
            mime: "image/png".to_string(),
            folder_id: None,
            bytes: None,
        });
        assert_eq!(op.operation_type(), "UpdateMedia");
        assert_eq!(op.entity(), "plugin::upload.file");
        assert!(op.data().is_none());
    }
}
