//! Merge execution
//!
//! This module provides:
//! - Translation of source payloads into the target's id space
//! - Ordered, bounded-parallel execution of a plan against the target
//! - A per-item report feeding selection outcomes and the merge request status

pub mod payload;
pub mod processor;

pub use payload::{DroppedReference, PreparedPayload, prepare_payload};
pub use processor::{
    DEFAULT_MERGE_PARALLELISM, ItemOutcome, MergePhase, MergeProcessor, MergeReport,
};
