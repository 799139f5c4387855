//! Core data types for content sync
//!
//! These types define the data model shared by the comparator, the
//! relationship extractor, the dependency planner and the merge processor
//! when reconciling content between a source and a target instance.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved content type under which media files are addressed
pub const MEDIA_TYPE: &str = "plugin::upload.file";

/// Which of the two instances a piece of data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstanceSide {
    Source,
    Target,
}

impl InstanceSide {
    pub fn other(self) -> Self {
        match self {
            Self::Source => Self::Target,
            Self::Target => Self::Source,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Target => "target",
        }
    }
}

/// Whether a content type holds one row or many
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentKind {
    SingleType,
    CollectionType,
}

impl ContentKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SingleType => "single",
            Self::CollectionType => "collection",
        }
    }
}

/// Cross-instance identity of an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub content_type: String,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl EntityKey {
    pub fn new(content_type: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            document_id: document_id.into(),
            locale: None,
        }
    }

    pub fn with_locale(mut self, locale: Option<String>) -> Self {
        self.locale = locale;
        self
    }

    pub fn is_media(&self) -> bool {
        self.content_type == MEDIA_TYPE
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locale {
            Some(locale) => write!(f, "{}#{}@{}", self.content_type, self.document_id, locale),
            None => write!(f, "{}#{}", self.content_type, self.document_id),
        }
    }
}

/// What a link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    Relation,
    Media,
}

impl LinkKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Relation => "relation",
            Self::Media => "media",
        }
    }
}

/// Where in the payload a link was discovered
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkOrigin {
    /// Declared directly on the entity's own attributes
    Direct,
    /// Found inside an embedded structure (component or dynamic zone entry)
    Embedded { component: String },
}

/// Outgoing reference from a field of an entity to another entity in the same instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Dot-joined path of the referencing field (e.g. "blocks.0.image")
    pub field_path: String,
    pub target_type: String,
    /// Internal id of the target within the same instance
    pub target_id: i64,
    pub kind: LinkKind,
    pub origin: LinkOrigin,
    /// Position within a multi-valued field
    pub position: usize,
}

/// A fully resolved entity from one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub content_type: String,
    pub id: i64,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Payload with components inlined and media attached
    pub raw: Value,
    /// Payload with technical fields stripped and references marked
    pub cleaned: Value,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.content_type, &self.document_id).with_locale(self.locale.clone())
    }

    pub fn is_media(&self) -> bool {
        self.content_type == MEDIA_TYPE
    }
}

/// File metadata carried by media entities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMeta {
    pub name: String,
    pub alternative_text: Option<String>,
    pub caption: Option<String>,
    pub mime: String,
    pub ext: String,
    /// Size in kilobytes, as reported by the backend
    pub size_kb: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub url: String,
    pub folder_path: Option<String>,
}

/// Classification of an entity after comparing both instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonState {
    OnlyInSource,
    OnlyInTarget,
    Different,
    Identical,
    Excluded,
}

impl ComparisonState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::OnlyInSource => "Only in source",
            Self::OnlyInTarget => "Only in target",
            Self::Different => "Different",
            Self::Identical => "Identical",
            Self::Excluded => "Excluded",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::OnlyInSource => "+",
            Self::OnlyInTarget => "-",
            Self::Different => "~",
            Self::Identical => "=",
            Self::Excluded => "×",
        }
    }

    /// State seen from the other instance's point of view
    pub fn mirrored(self) -> Self {
        match self {
            Self::OnlyInSource => Self::OnlyInTarget,
            Self::OnlyInTarget => Self::OnlyInSource,
            other => other,
        }
    }
}

/// Per-entity comparison outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub key: EntityKey,
    pub content_kind: ContentKind,
    pub state: ComparisonState,
    pub source: Option<Entity>,
    pub target: Option<Entity>,
    /// Set when the paired target row carries a different document id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_document_id: Option<String>,
    /// Top-level fields whose values differ (DIFFERENT results only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
}

impl ComparisonResult {
    /// Document id of the row on the target, if any
    pub fn target_document(&self) -> Option<&str> {
        self.target_document_id
            .as_deref()
            .or_else(|| self.target.as_ref().map(|t| t.document_id.as_str()))
    }
}

/// Operator intent for one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Create,
    Update,
    Delete,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Execution state of a single selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionStatus {
    Pending,
    Success,
    Failure,
}

impl SelectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// Operator selection plus its post-execution outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub key: EntityKey,
    pub direction: Direction,
    pub status: SelectionStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Selection {
    pub fn new(key: EntityKey, direction: Direction) -> Self {
        Self {
            key,
            direction,
            status: SelectionStatus::Pending,
            executed_at: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == SelectionStatus::Success
    }
}
