//! Schema compatibility between two instances
//!
//! This module provides functions to:
//! - Compare content type and component schemas attribute by attribute
//! - Categorize attributes as in both, source-only, target-only, or kind mismatch
//! - Decide whether the pair is safe to compare and merge

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::metadata::{Attribute, SchemaRegistry};
use crate::sync::error::SyncError;

/// Status of one attribute across both schemas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeStatus {
    InBoth,
    SourceOnly,
    TargetOnly,
    KindMismatch { source_kind: String, target_kind: String },
}

impl AttributeStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::InBoth => "=",
            Self::SourceOnly => "+",
            Self::TargetOnly => "-",
            Self::KindMismatch { .. } => "!",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDiff {
    pub name: String,
    pub status: AttributeStatus,
}

/// Diff of one content type or component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDiff {
    pub uid: String,
    pub attributes: Vec<AttributeDiff>,
}

impl StructureDiff {
    fn count(&self, pred: impl Fn(&AttributeStatus) -> bool) -> usize {
        self.attributes.iter().filter(|a| pred(&a.status)).count()
    }
}

/// Result of a compatibility check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCheck {
    pub structures: Vec<StructureDiff>,
    pub source_only_types: Vec<String>,
    pub target_only_types: Vec<String>,
    /// Problems that block comparison
    pub incompatibilities: Vec<String>,
    /// Differences that are reported but tolerated
    pub warnings: Vec<String>,
}

impl SchemaCheck {
    pub fn is_compatible(&self) -> bool {
        self.incompatibilities.is_empty()
    }

    /// Fail with [`SyncError::SchemaIncompatible`] when anything blocks comparison
    pub fn ensure_compatible(&self) -> Result<(), SyncError> {
        if self.is_compatible() {
            Ok(())
        } else {
            Err(SyncError::SchemaIncompatible {
                issues: self.incompatibilities.clone(),
            })
        }
    }

    pub fn mismatch_count(&self) -> usize {
        self.structures
            .iter()
            .map(|s| s.count(|status| matches!(status, AttributeStatus::KindMismatch { .. })))
            .sum()
    }
}

/// Compare both registries
pub fn check_compatibility(source: &SchemaRegistry, target: &SchemaRegistry) -> SchemaCheck {
    let mut check = SchemaCheck::default();

    for (uid, source_type) in &source.content_types {
        match target.content_types.get(uid) {
            Some(target_type) => {
                if source_type.kind != target_type.kind {
                    check.incompatibilities.push(format!(
                        "{} is a {} type on source but a {} type on target",
                        uid,
                        source_type.kind.label(),
                        target_type.kind.label()
                    ));
                }
                let diff = compare_attributes(uid, &source_type.attributes, &target_type.attributes);
                record(&mut check, &diff, "content type");
                check.structures.push(diff);
            }
            None => {
                check.source_only_types.push(uid.clone());
                check
                    .incompatibilities
                    .push(format!("Content type {} does not exist on target", uid));
            }
        }
    }

    for uid in target.content_types.keys() {
        if !source.content_types.contains_key(uid) {
            check.target_only_types.push(uid.clone());
            check
                .warnings
                .push(format!("Content type {} only exists on target", uid));
        }
    }

    for (uid, source_component) in &source.components {
        match target.components.get(uid) {
            Some(target_component) => {
                let diff = compare_attributes(
                    uid,
                    &source_component.attributes,
                    &target_component.attributes,
                );
                record(&mut check, &diff, "component");
                check.structures.push(diff);
            }
            None => check
                .incompatibilities
                .push(format!("Component {} does not exist on target", uid)),
        }
    }

    log::info!(
        "Schema check: {} structure(s), {} incompatibilit(ies), {} warning(s)",
        check.structures.len(),
        check.incompatibilities.len(),
        check.warnings.len()
    );

    check
}

/// Compare the attributes of one structure
pub fn compare_attributes(
    uid: &str,
    source: &BTreeMap<String, Attribute>,
    target: &BTreeMap<String, Attribute>,
) -> StructureDiff {
    let mut diff = StructureDiff {
        uid: uid.to_string(),
        ..Default::default()
    };

    for (name, source_attr) in source {
        let status = match target.get(name) {
            Some(target_attr) if attributes_match(source_attr, target_attr) => {
                AttributeStatus::InBoth
            }
            Some(target_attr) => AttributeStatus::KindMismatch {
                source_kind: source_attr.kind_label(),
                target_kind: target_attr.kind_label(),
            },
            None => AttributeStatus::SourceOnly,
        };
        diff.attributes.push(AttributeDiff {
            name: name.clone(),
            status,
        });
    }

    for name in target.keys() {
        if !source.contains_key(name) {
            diff.attributes.push(AttributeDiff {
                name: name.clone(),
                status: AttributeStatus::TargetOnly,
            });
        }
    }

    diff.attributes.sort_by(|a, b| a.name.cmp(&b.name));
    diff
}

/// Attributes are compatible when they carry the same kind of value
///
/// Uniqueness and the reciprocal field names do not affect what can be written.
fn attributes_match(source: &Attribute, target: &Attribute) -> bool {
    match (source, target) {
        (Attribute::Scalar { data_type: a, .. }, Attribute::Scalar { data_type: b, .. }) => a == b,
        (
            Attribute::Relation {
                target: a,
                many: many_a,
                ..
            },
            Attribute::Relation {
                target: b,
                many: many_b,
                ..
            },
        ) => a == b && many_a == many_b,
        (Attribute::DynamicZone { components: a }, Attribute::DynamicZone { components: b }) => {
            let mut a = a.clone();
            let mut b = b.clone();
            a.sort();
            b.sort();
            a == b
        }
        (a, b) => a == b,
    }
}

fn record(check: &mut SchemaCheck, diff: &StructureDiff, what: &str) {
    for attr in &diff.attributes {
        match &attr.status {
            AttributeStatus::InBoth => {}
            AttributeStatus::SourceOnly => check.incompatibilities.push(format!(
                "Attribute {}.{} ({}) does not exist on target",
                diff.uid, attr.name, what
            )),
            AttributeStatus::TargetOnly => check.warnings.push(format!(
                "Attribute {}.{} ({}) only exists on target",
                diff.uid, attr.name, what
            )),
            AttributeStatus::KindMismatch {
                source_kind,
                target_kind,
            } => check.incompatibilities.push(format!(
                "Attribute {}.{} is {} on source but {} on target",
                diff.uid, attr.name, source_kind, target_kind
            )),
        }
    }
}
