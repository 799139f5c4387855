//! Dependency planning for selected operations
//!
//! This module provides functions to:
//! - Build a dependency graph between selected entities from their relationships
//! - Order creates and updates into layers with Kahn's algorithm
//! - Isolate entities caught in reference cycles instead of failing
//! - Schedule deletions after everything else

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::sync::comparator::ComparisonOutcome;
use crate::sync::id_mapping::IdMappingTable;
use crate::sync::relationships::RelationshipIndex;
use crate::sync::types::{Direction, EntityKey, Selection};

/// Entities known to exist on the target before the run starts
#[derive(Debug, Clone, Default)]
pub struct TargetPresence {
    present: HashSet<EntityKey>,
}

impl TargetPresence {
    /// Everything paired or found on the target, mapped, or already synced
    pub fn collect<'a>(
        comparison: &ComparisonOutcome,
        mappings: &IdMappingTable,
        synced: impl IntoIterator<Item = &'a EntityKey>,
    ) -> Self {
        let mut present: HashSet<EntityKey> = comparison
            .results()
            .filter(|r| r.target.is_some())
            .map(|r| r.key.clone())
            .collect();
        present.extend(mappings.iter().map(|m| m.source_key()));
        present.extend(synced.into_iter().cloned());
        Self { present }
    }

    pub fn insert(&mut self, key: EntityKey) {
        self.present.insert(key);
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.present.contains(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub key: EntityKey,
    pub direction: Direction,
}

/// Dependency edge: `from` must exist before `to` can reference it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanEdge {
    pub from: EntityKey,
    pub to: EntityKey,
    pub field_path: String,
}

/// Reference to an entity that is neither selected nor present on the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    pub key: EntityKey,
    pub field_path: String,
    pub target: EntityKey,
}

/// Ordered execution plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Layers to execute in order; items within a layer are independent
    pub batches: Vec<Vec<PlanItem>>,
    /// Items caught in (or behind) a reference cycle, unordered
    pub cyclic: Vec<PlanItem>,
    /// Deletions, run after every other item
    pub deletions: Vec<PlanItem>,
    pub missing_dependencies: Vec<MissingDependency>,
    /// Edges between two cyclic items
    pub circular_edges: Vec<PlanEdge>,
    pub edges: Vec<PlanEdge>,
}

impl Plan {
    pub fn item_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum::<usize>() + self.cyclic.len() + self.deletions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

/// Build the execution plan for a set of selections
pub fn plan(
    selections: &[Selection],
    relationships: &RelationshipIndex,
    presence: &TargetPresence,
) -> Plan {
    let mut result = Plan::default();

    let nodes: BTreeMap<EntityKey, Direction> = selections
        .iter()
        .filter(|s| s.direction != Direction::Delete)
        .map(|s| (s.key.clone(), s.direction))
        .collect();
    let deleted: BTreeSet<&EntityKey> = selections
        .iter()
        .filter(|s| s.direction == Direction::Delete)
        .map(|s| &s.key)
        .collect();

    // dependency -> dependents, and the number of distinct dependencies per node
    let mut dependents: BTreeMap<&EntityKey, BTreeSet<&EntityKey>> = BTreeMap::new();
    let mut dependencies: BTreeMap<&EntityKey, BTreeSet<&EntityKey>> =
        nodes.keys().map(|k| (k, BTreeSet::new())).collect();
    let mut edges: BTreeSet<PlanEdge> = BTreeSet::new();

    for node in nodes.keys() {
        for rel in relationships.outgoing(node) {
            let target = &rel.target;
            if target == node {
                continue;
            }

            if let Some((dependency, _)) = nodes.get_key_value(target) {
                edges.insert(PlanEdge {
                    from: dependency.clone(),
                    to: node.clone(),
                    field_path: rel.field_path.clone(),
                });
                dependents.entry(dependency).or_default().insert(node);
                dependencies.entry(node).or_default().insert(dependency);
            } else if presence.contains(target) && !deleted.contains(target) {
                continue;
            } else {
                result.missing_dependencies.push(MissingDependency {
                    key: node.clone(),
                    field_path: rel.field_path.clone(),
                    target: target.clone(),
                });
            }
        }
    }

    // Kahn's algorithm, draining one layer at a time
    let mut in_degree: BTreeMap<&EntityKey, usize> =
        dependencies.iter().map(|(k, deps)| (*k, deps.len())).collect();
    let mut ready: Vec<&EntityKey> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(k, _)| *k)
        .collect();
    let mut drained: HashSet<&EntityKey> = HashSet::new();

    while !ready.is_empty() {
        ready.sort();
        let mut next = Vec::new();
        for key in &ready {
            drained.insert(*key);
            for dependent in dependents.get(key).into_iter().flatten() {
                if let Some(count) = in_degree.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        result.batches.push(
            ready
                .iter()
                .map(|k| PlanItem {
                    key: (*k).clone(),
                    direction: nodes[*k],
                })
                .collect(),
        );
        ready = next;
    }

    let stuck: BTreeSet<&EntityKey> = nodes.keys().filter(|k| !drained.contains(k)).collect();
    result.cyclic = stuck
        .iter()
        .map(|k| PlanItem {
            key: (*k).clone(),
            direction: nodes[*k],
        })
        .collect();
    result.circular_edges = edges
        .iter()
        .filter(|e| stuck.contains(&e.from) && stuck.contains(&e.to))
        .cloned()
        .collect();
    result.edges = edges.into_iter().collect();
    result.deletions = deleted
        .into_iter()
        .map(|k| PlanItem {
            key: k.clone(),
            direction: Direction::Delete,
        })
        .collect();

    if !result.cyclic.is_empty() {
        log::warn!(
            "{} item(s) involved in reference cycles, deferring to the circular pass",
            result.cyclic.len()
        );
    }
    log::info!(
        "Planned {} batch(es), {} cyclic item(s), {} deletion(s), {} missing dependenc(ies)",
        result.batches.len(),
        result.cyclic.len(),
        result.deletions.len(),
        result.missing_dependencies.len()
    );

    result
}
