//! Link extraction from resolved payloads
//!
//! Walks a payload guided by the declared schema and emits one [`Link`] per
//! referenced entity. Components and dynamic zones are descended into with a
//! dot-joined field path; untyped values go through the legacy heuristic.
//! A link is only emitted when its target resolves inside the same instance.

use serde_json::Value;

use crate::api::metadata::{Attribute, SchemaRegistry, effective_attribute};
use crate::sync::clean::{COMPONENT_TAG, is_technical_field};
use crate::sync::paths;
use crate::sync::references;
use crate::sync::relationships::legacy;
use crate::sync::snapshot::InstanceData;
use crate::sync::types::{Link, LinkKind, LinkOrigin, MEDIA_TYPE};

/// Walks payloads of one instance
pub struct LinkExtractor<'a> {
    schema: &'a SchemaRegistry,
    data: &'a InstanceData,
    max_depth: usize,
}

impl<'a> LinkExtractor<'a> {
    pub fn new(schema: &'a SchemaRegistry, data: &'a InstanceData, max_depth: usize) -> Self {
        Self {
            schema,
            data,
            max_depth,
        }
    }

    /// Links of an entry payload of `content_type`
    pub fn extract(&self, payload: &Value, content_type: &str) -> Vec<Link> {
        let mut links = Vec::new();
        if content_type == MEDIA_TYPE {
            return links;
        }
        self.walk_object(payload, content_type, "", &LinkOrigin::Direct, 0, false, &mut links);
        links
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_object(
        &self,
        value: &Value,
        owner: &str,
        prefix: &str,
        origin: &LinkOrigin,
        depth: usize,
        in_seo_block: bool,
        links: &mut Vec<Link>,
    ) {
        let Some(obj) = value.as_object() else {
            return;
        };
        let attributes = self.schema.attributes_of(owner);

        for (field, child) in obj {
            if is_technical_field(field) || field == COMPONENT_TAG {
                continue;
            }
            let path = paths::join(prefix, field);

            match effective_attribute(attributes, field, in_seo_block).as_deref() {
                Some(Attribute::Relation { target, .. }) => {
                    self.push_references(child, &path, target, LinkKind::Relation, origin, links)
                }
                Some(Attribute::Media { .. }) => {
                    self.push_references(child, &path, MEDIA_TYPE, LinkKind::Media, origin, links)
                }
                Some(Attribute::Component {
                    component,
                    repeatable,
                }) => {
                    if depth >= self.max_depth {
                        log::debug!("Component depth limit reached at {}", path);
                        continue;
                    }
                    let embedded = LinkOrigin::Embedded {
                        component: component.clone(),
                    };
                    let seo = in_seo_block
                        || self
                            .schema
                            .component(component)
                            .map(|c| c.is_seo_block())
                            .unwrap_or(false);

                    match child {
                        Value::Array(items) if *repeatable => {
                            for (idx, item) in items.iter().enumerate() {
                                let item_path = paths::join(&path, &idx.to_string());
                                self.walk_object(item, component, &item_path, &embedded, depth + 1, seo, links);
                            }
                        }
                        Value::Object(_) => {
                            self.walk_object(child, component, &path, &embedded, depth + 1, seo, links)
                        }
                        _ => {}
                    }
                }
                Some(Attribute::DynamicZone { components }) => {
                    if depth >= self.max_depth {
                        log::debug!("Component depth limit reached at {}", path);
                        continue;
                    }
                    let Some(items) = child.as_array() else {
                        continue;
                    };
                    for (idx, item) in items.iter().enumerate() {
                        let Some(tag) = item.get(COMPONENT_TAG).and_then(Value::as_str) else {
                            continue;
                        };
                        if !components.iter().any(|c| c == tag) {
                            log::debug!("Dynamic zone {} holds unexpected component '{}'", path, tag);
                            continue;
                        }
                        let embedded = LinkOrigin::Embedded {
                            component: tag.to_string(),
                        };
                        let seo = self.schema.component(tag).map(|c| c.is_seo_block()).unwrap_or(false);
                        let item_path = paths::join(&path, &idx.to_string());
                        self.walk_object(item, tag, &item_path, &embedded, depth + 1, seo, links);
                    }
                }
                Some(attr @ Attribute::Scalar { .. }) if !attr.is_json() => {}
                Some(_) | None => legacy::scan(child, &path, origin, self.data, links),
            }
        }
    }

    fn push_references(
        &self,
        value: &Value,
        path: &str,
        target_type: &str,
        kind: LinkKind,
        origin: &LinkOrigin,
        links: &mut Vec<Link>,
    ) {
        for (position, id) in references::reference_ids(value).into_iter().enumerate() {
            if self.data.get(target_type, id).is_none() {
                log::debug!(
                    "Dropping unresolvable {} link {} -> {}#{} on {}",
                    kind.label(),
                    path,
                    target_type,
                    id,
                    self.data.side.label()
                );
                continue;
            }
            links.push(Link {
                field_path: path.to_string(),
                target_type: target_type.to_string(),
                target_id: id,
                kind,
                origin: origin.clone(),
                position,
            });
        }
    }
}

/// Extract the links of one payload
pub fn extract_links(
    payload: &Value,
    content_type: &str,
    schema: &SchemaRegistry,
    data: &InstanceData,
    max_depth: usize,
) -> Vec<Link> {
    LinkExtractor::new(schema, data, max_depth).extract(payload, content_type)
}
