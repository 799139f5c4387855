//! Parsing of content-type-builder responses into a [`SchemaRegistry`]

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde_json::Value;

use super::models::{Attribute, ComponentSchema, ContentTypeSchema, SchemaRegistry};
use crate::sync::types::ContentKind;

/// Build a registry from the content-types and components listings
///
/// Only application content types (`api::*`) are synced; admin and plugin
/// types are skipped, media is handled separately.
pub fn parse_schema(content_types: &Value, components: &Value) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::default();

    for item in data_items(content_types).context("Invalid content-types listing")? {
        let uid = item
            .get("uid")
            .and_then(Value::as_str)
            .context("Content type without uid")?;

        if !uid.starts_with("api::") {
            continue;
        }

        let schema = item.get("schema").unwrap_or(item);
        let kind = match schema.get("kind").and_then(Value::as_str) {
            Some("singleType") => ContentKind::SingleType,
            _ => ContentKind::CollectionType,
        };
        let localized = schema
            .pointer("/pluginOptions/i18n/localized")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let content_type = ContentTypeSchema {
            uid: uid.to_string(),
            kind,
            singular_name: string_field(schema, "singularName")
                .unwrap_or_else(|| uid.rsplit('.').next().unwrap_or(uid).to_string()),
            plural_name: string_field(schema, "pluralName")
                .unwrap_or_else(|| format!("{}s", uid.rsplit('.').next().unwrap_or(uid))),
            display_name: string_field(schema, "displayName"),
            localized,
            attributes: parse_attributes(schema.get("attributes"))
                .with_context(|| format!("Invalid attributes on {}", uid))?,
        };
        registry.content_types.insert(uid.to_string(), content_type);
    }

    for item in data_items(components).context("Invalid components listing")? {
        let uid = item
            .get("uid")
            .and_then(Value::as_str)
            .context("Component without uid")?;
        let schema = item.get("schema").unwrap_or(item);

        registry.components.insert(
            uid.to_string(),
            ComponentSchema {
                uid: uid.to_string(),
                attributes: parse_attributes(schema.get("attributes"))
                    .with_context(|| format!("Invalid attributes on component {}", uid))?,
            },
        );
    }

    log::debug!(
        "Parsed schema: {} content types, {} components",
        registry.content_types.len(),
        registry.components.len()
    );

    Ok(registry)
}

fn data_items(listing: &Value) -> Result<&Vec<Value>> {
    listing
        .get("data")
        .unwrap_or(listing)
        .as_array()
        .context("Expected an array of schema entries")
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_attributes(attributes: Option<&Value>) -> Result<BTreeMap<String, Attribute>> {
    let mut parsed = BTreeMap::new();
    let Some(attributes) = attributes.and_then(Value::as_object) else {
        return Ok(parsed);
    };

    for (name, definition) in attributes {
        let data_type = definition
            .get("type")
            .and_then(Value::as_str)
            .with_context(|| format!("Attribute '{}' has no type", name))?;

        let attribute = match data_type {
            "relation" => {
                let Some(target) = string_field(definition, "target") else {
                    // Polymorphic morph relations carry no single target
                    log::debug!("Treating untargeted relation '{}' as JSON", name);
                    parsed.insert(
                        name.clone(),
                        Attribute::Scalar {
                            data_type: "json".to_string(),
                            unique: false,
                        },
                    );
                    continue;
                };
                let relation = definition.get("relation").and_then(Value::as_str).unwrap_or("");
                Attribute::Relation {
                    target,
                    many: matches!(relation, "oneToMany" | "manyToMany" | "manyWay"),
                    inversed_by: string_field(definition, "inversedBy"),
                    mapped_by: string_field(definition, "mappedBy"),
                }
            }
            "media" => Attribute::Media {
                many: definition.get("multiple").and_then(Value::as_bool).unwrap_or(false),
            },
            "component" => Attribute::Component {
                component: string_field(definition, "component")
                    .with_context(|| format!("Component attribute '{}' has no component", name))?,
                repeatable: definition.get("repeatable").and_then(Value::as_bool).unwrap_or(false),
            },
            "dynamiczone" => Attribute::DynamicZone {
                components: definition
                    .get("components")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            other => Attribute::Scalar {
                data_type: other.to_string(),
                unique: definition.get("unique").and_then(Value::as_bool).unwrap_or(false)
                    || other == "uid",
            },
        };

        parsed.insert(name.clone(), attribute);
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_content_types_and_components() {
        let content_types = json!({
            "data": [
                {
                    "uid": "api::article.article",
                    "schema": {
                        "kind": "collectionType",
                        "singularName": "article",
                        "pluralName": "articles",
                        "pluginOptions": {"i18n": {"localized": true}},
                        "attributes": {
                            "title": {"type": "string"},
                            "slug": {"type": "uid", "targetField": "title"},
                            "cover": {"type": "media", "multiple": false},
                            "gallery": {"type": "media", "multiple": true},
                            "author": {
                                "type": "relation",
                                "relation": "manyToOne",
                                "target": "api::author.author",
                                "inversedBy": "articles"
                            },
                            "tags": {"type": "relation", "relation": "manyToMany", "target": "api::tag.tag"},
                            "seo": {"type": "component", "component": "shared.seo", "repeatable": false},
                            "blocks": {"type": "dynamiczone", "components": ["shared.quote", "shared.media"]}
                        }
                    }
                },
                {
                    "uid": "api::global.global",
                    "schema": {"kind": "singleType", "singularName": "global", "pluralName": "globals", "attributes": {}}
                },
                {
                    "uid": "plugin::users-permissions.user",
                    "schema": {"kind": "collectionType", "attributes": {}}
                }
            ]
        });
        let components = json!({
            "data": [
                {"uid": "shared.seo", "schema": {"attributes": {"shareImage": {"type": "media"}}}}
            ]
        });

        let registry = parse_schema(&content_types, &components).unwrap();

        assert_eq!(registry.content_types.len(), 2);
        let article = registry.content_type("api::article.article").unwrap();
        assert!(article.localized);
        assert_eq!(article.plural_name, "articles");
        assert_eq!(article.unique_fields(), vec!["slug"]);
        assert_eq!(article.attributes["cover"], Attribute::Media { many: false });
        assert_eq!(article.attributes["gallery"], Attribute::Media { many: true });
        assert!(matches!(
            &article.attributes["tags"],
            Attribute::Relation { many: true, .. }
        ));
        assert!(matches!(
            &article.attributes["author"],
            Attribute::Relation { many: false, inversed_by: Some(f), .. } if f == "articles"
        ));
        assert!(matches!(
            &article.attributes["blocks"],
            Attribute::DynamicZone { components } if components.len() == 2
        ));

        assert_eq!(registry.kind_of("api::global.global"), ContentKind::SingleType);
        assert!(registry.component("shared.seo").unwrap().is_seo_block());
    }

    #[test]
    fn test_untargeted_relation_becomes_json() {
        let content_types = json!([{
            "uid": "api::page.page",
            "schema": {"attributes": {"related": {"type": "relation", "relation": "morphToMany"}}}
        }]);

        let registry = parse_schema(&content_types, &json!([])).unwrap();
        let page = registry.content_type("api::page.page").unwrap();
        assert!(page.attributes["related"].is_json());
    }
}
