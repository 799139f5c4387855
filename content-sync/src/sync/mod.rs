//! Content diff and dependency-aware sync engine
//!
//! Leaf-first:
//! - `fingerprint`, `clean`, `paths`, `references`: pure helpers over payloads and bytes
//! - `loader` / `snapshot`: both instances materialized into an immutable snapshot
//! - `schema`: structural compatibility of the two schemas
//! - `comparator`: per-entity classification, with id mappings and exclusions
//! - `relationships`: links between entities and their derived status
//! - `planner`: selections ordered into batches, cycles isolated
//! - `merge`: plan execution against the target
//! - `merge_request`, `pipeline`: lifecycle and orchestration of one run

pub mod clean;
pub mod comparator;
pub mod error;
pub mod exclusions;
pub mod fingerprint;
pub mod id_mapping;
pub mod loader;
pub mod merge;
pub mod merge_request;
pub mod paths;
pub mod pipeline;
pub mod planner;
pub mod references;
pub mod relationships;
pub mod schema;
pub mod snapshot;
pub mod types;

pub use comparator::{ComparisonOutcome, ComparisonSummary, compare};
pub use error::SyncError;
pub use exclusions::{ExclusionRule, ExclusionSet};
pub use id_mapping::{IdMapping, IdMappingTable};
pub use loader::{LoaderConfig, prefetch};
pub use merge::{MergeProcessor, MergeReport};
pub use merge_request::{MergeRequest, MergeRequestStatus};
pub use pipeline::SyncPipeline;
pub use planner::{Plan, plan};
pub use schema::{SchemaCheck, check_compatibility};
pub use snapshot::{InstanceData, Snapshot};
pub use types::{
    ComparisonResult, ComparisonState, Direction, Entity, EntityKey, InstanceSide, Selection,
    SelectionStatus,
};
