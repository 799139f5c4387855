//! Relationship status propagation
//!
//! Turns per-instance links into entry relationships keyed in comparison
//! space, and gives each one a status derived from the classification of both
//! endpoints. The status is what the operator sees next to a dependency; it is
//! never used to decide that an edge is safe when an endpoint is unknown.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::sync::comparator::ComparisonOutcome;
use crate::sync::exclusions::ExclusionSet;
use crate::sync::paths;
use crate::sync::snapshot::Snapshot;
use crate::sync::types::{ComparisonState, EntityKey, InstanceSide, Link, LinkKind, LinkOrigin};

/// A link between two entities, expressed with comparison keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRelationship {
    /// Instance the link was read from
    pub side: InstanceSide,
    /// Referencing entity
    pub source: EntityKey,
    pub field_path: String,
    /// Referenced entity
    pub target: EntityKey,
    pub kind: LinkKind,
    pub origin: LinkOrigin,
    pub position: usize,
    /// Combined status of both endpoints, `None` when either is unknown
    pub status: Option<ComparisonState>,
    /// Paired field on the referenced type for bidirectional relations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reciprocal_field: Option<String>,
}

fn precedence(state: ComparisonState) -> u8 {
    match state {
        ComparisonState::OnlyInSource => 0,
        ComparisonState::OnlyInTarget => 1,
        ComparisonState::Different => 2,
        ComparisonState::Excluded => 3,
        ComparisonState::Identical => 4,
    }
}

/// Status of an edge given both endpoint states
///
/// The more urgent state wins; only two IDENTICAL endpoints give IDENTICAL.
pub fn combine(a: Option<ComparisonState>, b: Option<ComparisonState>) -> Option<ComparisonState> {
    let (a, b) = (a?, b?);
    Some(if precedence(a) <= precedence(b) { a } else { b })
}

/// Derive relationships from the links in a snapshot
///
/// Source-side links are taken from every source entity; target-side links
/// only from entities that exist solely on the target. Links under an
/// excluded field are never synced and give no relationship.
pub fn propagate(
    snapshot: &Snapshot,
    comparison: &ComparisonOutcome,
    exclusions: &ExclusionSet,
) -> Vec<EntryRelationship> {
    let mut relationships = Vec::new();

    for entity in snapshot.source.entities() {
        let owner = entity.key();
        for link in included_links(exclusions, &owner, &entity.links) {
            if let Some(rel) = relate(snapshot, comparison, InstanceSide::Source, &owner, link) {
                relationships.push(rel);
            }
        }
    }

    for entity in snapshot.target.entities() {
        let Some(owner) = comparison.key_for_target(&entity.key()).cloned() else {
            continue;
        };
        if comparison.state_of(&owner) != Some(ComparisonState::OnlyInTarget) {
            continue;
        }
        for link in included_links(exclusions, &owner, &entity.links) {
            if let Some(rel) = relate(snapshot, comparison, InstanceSide::Target, &owner, link) {
                relationships.push(rel);
            }
        }
    }

    log::debug!("Propagated {} relationship(s)", relationships.len());
    relationships
}

fn included_links<'a>(
    exclusions: &ExclusionSet,
    owner: &EntityKey,
    links: &'a [Link],
) -> impl Iterator<Item = &'a Link> + use<'a> {
    let excluded: Vec<String> = exclusions
        .excluded_fields(&owner.content_type, &owner.document_id)
        .into_iter()
        .map(str::to_string)
        .collect();
    links
        .iter()
        .filter(move |link| !excluded.iter().any(|field| paths::starts_with(&link.field_path, field)))
}

fn relate(
    snapshot: &Snapshot,
    comparison: &ComparisonOutcome,
    side: InstanceSide,
    owner: &EntityKey,
    link: &Link,
) -> Option<EntryRelationship> {
    let referenced = snapshot.side(side).get(&link.target_type, link.target_id)?;
    let target = match side {
        InstanceSide::Source => referenced.key(),
        InstanceSide::Target => comparison
            .key_for_target(&referenced.key())
            .cloned()
            .unwrap_or_else(|| referenced.key()),
    };

    let reciprocal_field = match link.origin {
        LinkOrigin::Direct => snapshot
            .schema(side)
            .reciprocal_field(&owner.content_type, &link.field_path),
        LinkOrigin::Embedded { .. } => None,
    };

    Some(EntryRelationship {
        side,
        source: owner.clone(),
        field_path: link.field_path.clone(),
        status: combine(comparison.state_of(owner), comparison.state_of(&target)),
        target,
        kind: link.kind,
        origin: link.origin.clone(),
        position: link.position,
        reciprocal_field,
    })
}

/// Lookups over a relationship list
#[derive(Debug, Clone, Default)]
pub struct RelationshipIndex {
    relationships: Vec<EntryRelationship>,
    outgoing: HashMap<EntityKey, Vec<usize>>,
    incoming: HashMap<EntityKey, Vec<usize>>,
}

impl RelationshipIndex {
    pub fn new(relationships: Vec<EntryRelationship>) -> Self {
        let mut index = Self {
            relationships,
            ..Default::default()
        };
        for (idx, rel) in index.relationships.iter().enumerate() {
            index.outgoing.entry(rel.source.clone()).or_default().push(idx);
            index.incoming.entry(rel.target.clone()).or_default().push(idx);
        }
        index
    }

    pub fn all(&self) -> &[EntryRelationship] {
        &self.relationships
    }

    /// Relationships whose referencing entity is `key`
    pub fn outgoing(&self, key: &EntityKey) -> impl Iterator<Item = &EntryRelationship> {
        self.outgoing
            .get(key)
            .into_iter()
            .flatten()
            .map(|idx| &self.relationships[*idx])
    }

    /// Relationships pointing at `key`
    pub fn incoming(&self, key: &EntityKey) -> impl Iterator<Item = &EntryRelationship> {
        self.incoming
            .get(key)
            .into_iter()
            .flatten()
            .map(|idx| &self.relationships[*idx])
    }
}
