//! Content schema models
//!
//! The schema drives every traversal of entity payloads: which attributes are
//! plain values, which reference other entities or media, and which embed
//! nested structures.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sync::types::{ContentKind, MEDIA_TYPE};

/// Declared attribute of a content type or component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Attribute {
    /// Plain value (string, number, boolean, json, ...)
    Scalar {
        data_type: String,
        #[serde(default)]
        unique: bool,
    },
    /// Reference to entries of another content type
    Relation {
        target: String,
        many: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inversed_by: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mapped_by: Option<String>,
    },
    /// Reference to uploaded files
    Media { many: bool },
    /// Embedded structure of a single component type
    Component { component: String, repeatable: bool },
    /// Ordered list of tagged structures drawn from several component types
    DynamicZone { components: Vec<String> },
}

impl Attribute {
    /// Short label used when comparing schemas across instances
    pub fn kind_label(&self) -> String {
        match self {
            Attribute::Scalar { data_type, .. } => data_type.clone(),
            Attribute::Relation { target, many, .. } => {
                format!("relation({}{})", target, if *many { ", many" } else { "" })
            }
            Attribute::Media { many } => {
                if *many {
                    "media(many)".to_string()
                } else {
                    "media".to_string()
                }
            }
            Attribute::Component {
                component,
                repeatable,
            } => format!(
                "component({}{})",
                component,
                if *repeatable { ", repeatable" } else { "" }
            ),
            Attribute::DynamicZone { .. } => "dynamiczone".to_string(),
        }
    }

    /// Whether values of this attribute are untyped JSON
    pub fn is_json(&self) -> bool {
        matches!(self, Attribute::Scalar { data_type, .. } if data_type == "json")
    }

    /// Target content type for relation and media attributes
    pub fn reference_target(&self) -> Option<&str> {
        match self {
            Attribute::Relation { target, .. } => Some(target),
            Attribute::Media { .. } => Some(MEDIA_TYPE),
            _ => None,
        }
    }
}

/// Schema of a content type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTypeSchema {
    pub uid: String,
    pub kind: ContentKind,
    pub singular_name: String,
    pub plural_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub localized: bool,
    pub attributes: BTreeMap<String, Attribute>,
}

impl ContentTypeSchema {
    /// Attributes declared unique, in name order
    pub fn unique_fields(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(_, attr)| matches!(attr, Attribute::Scalar { unique: true, .. }))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Schema of a reusable embedded structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSchema {
    pub uid: String,
    pub attributes: BTreeMap<String, Attribute>,
}

impl ComponentSchema {
    /// SEO blocks carry share images that are always treated as media
    pub fn is_seo_block(&self) -> bool {
        self.uid.ends_with(".seo")
    }
}

/// Fields inside SEO blocks that always hold a single media reference
pub const SEO_MEDIA_FIELDS: &[&str] = &["shareImage", "metaImage", "image"];

/// Attribute a traversal should apply to `field`
///
/// Inside SEO blocks the share/meta images are media regardless of how (or
/// whether) the schema tags them.
pub fn effective_attribute<'a>(
    attributes: Option<&'a BTreeMap<String, Attribute>>,
    field: &str,
    in_seo_block: bool,
) -> Option<Cow<'a, Attribute>> {
    if in_seo_block && SEO_MEDIA_FIELDS.contains(&field) {
        return Some(Cow::Owned(Attribute::Media { many: false }));
    }
    attributes.and_then(|attrs| attrs.get(field)).map(Cow::Borrowed)
}

/// All content types and components of one instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    pub content_types: BTreeMap<String, ContentTypeSchema>,
    pub components: BTreeMap<String, ComponentSchema>,
}

impl SchemaRegistry {
    pub fn content_type(&self, uid: &str) -> Option<&ContentTypeSchema> {
        self.content_types.get(uid)
    }

    pub fn component(&self, uid: &str) -> Option<&ComponentSchema> {
        self.components.get(uid)
    }

    pub fn kind_of(&self, uid: &str) -> ContentKind {
        if uid == MEDIA_TYPE {
            return ContentKind::CollectionType;
        }
        self.content_types
            .get(uid)
            .map(|ct| ct.kind)
            .unwrap_or(ContentKind::CollectionType)
    }

    /// Attributes declared on a content type or component uid
    pub fn attributes_of(&self, uid: &str) -> Option<&BTreeMap<String, Attribute>> {
        self.content_types
            .get(uid)
            .map(|ct| &ct.attributes)
            .or_else(|| self.components.get(uid).map(|c| &c.attributes))
    }

    /// Name of the field on `target` that pairs with `field` on `owner`, if declared
    pub fn reciprocal_field(&self, owner: &str, field: &str) -> Option<String> {
        match self.attributes_of(owner)?.get(field)? {
            Attribute::Relation {
                inversed_by: Some(other),
                ..
            }
            | Attribute::Relation {
                mapped_by: Some(other),
                ..
            } => Some(other.clone()),
            _ => None,
        }
    }
}
