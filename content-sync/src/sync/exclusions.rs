//! Exclusion rules
//!
//! A rule names a content type and optionally narrows it to one document and/or
//! one field path. Rules without a field path exclude whole entities; rules
//! with one only hide that field from comparison and from merge payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sync::paths;
use crate::sync::types::EntityKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRule {
    /// Repository row id, absent for rules not yet persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
}

impl ExclusionRule {
    pub fn for_type(content_type: impl Into<String>) -> Self {
        Self {
            id: None,
            content_type: content_type.into(),
            document_id: None,
            field_path: None,
        }
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_field(mut self, field_path: impl Into<String>) -> Self {
        self.field_path = Some(field_path.into());
        self
    }

    fn applies_to(&self, content_type: &str, document_id: &str) -> bool {
        self.content_type == content_type
            && self
                .document_id
                .as_deref()
                .map(|doc| doc == document_id)
                .unwrap_or(true)
    }

    pub fn describe(&self) -> String {
        let mut text = self.content_type.clone();
        if let Some(doc) = &self.document_id {
            text.push('#');
            text.push_str(doc);
        }
        if let Some(field) = &self.field_path {
            text.push_str(" :: ");
            text.push_str(field);
        }
        text
    }
}

/// Active rules for one instance pair
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    rules: Vec<ExclusionRule>,
}

impl ExclusionSet {
    pub fn new(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    /// Whether the whole entity is excluded
    pub fn excludes_entity(&self, key: &EntityKey) -> bool {
        self.rules.iter().any(|rule| {
            rule.field_path.is_none() && rule.applies_to(&key.content_type, &key.document_id)
        })
    }

    /// Field paths hidden for one entity
    pub fn excluded_fields(&self, content_type: &str, document_id: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(content_type, document_id))
            .filter_map(|rule| rule.field_path.as_deref())
            .collect()
    }

    /// Remove hidden fields from a payload in place
    pub fn strip_fields(&self, payload: &mut Value, content_type: &str, document_id: &str) {
        for field in self.excluded_fields(content_type, document_id) {
            if paths::remove(payload, field).is_some() {
                log::trace!("Stripped excluded field {} from {}#{}", field, content_type, document_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_and_document_rules() {
        let set = ExclusionSet::new(vec![
            ExclusionRule::for_type("api::log.log"),
            ExclusionRule::for_type("api::article.article").with_document("a1"),
        ]);

        assert!(set.excludes_entity(&EntityKey::new("api::log.log", "anything")));
        assert!(set.excludes_entity(&EntityKey::new("api::article.article", "a1")));
        assert!(!set.excludes_entity(&EntityKey::new("api::article.article", "a2")));
    }

    #[test]
    fn test_field_rule_strips_but_does_not_exclude() {
        let set = ExclusionSet::new(vec![
            ExclusionRule::for_type("api::article.article").with_field("seo.metaTitle"),
            ExclusionRule::for_type("api::article.article")
                .with_document("a2")
                .with_field("views"),
        ]);
        assert!(!set.excludes_entity(&EntityKey::new("api::article.article", "a1")));

        let mut payload = json!({"title": "t", "views": 3, "seo": {"metaTitle": "m"}});
        set.strip_fields(&mut payload, "api::article.article", "a1");
        assert_eq!(payload, json!({"title": "t", "views": 3, "seo": {}}));

        set.strip_fields(&mut payload, "api::article.article", "a2");
        assert_eq!(payload, json!({"title": "t", "seo": {}}));
    }

    #[test]
    fn test_describe() {
        let rule = ExclusionRule::for_type("api::page.page")
            .with_document("p1")
            .with_field("body");
        assert_eq!(rule.describe(), "api::page.page#p1 :: body");
    }
}
