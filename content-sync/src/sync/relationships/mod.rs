//! Entity-to-entity relationships
//!
//! - `extractor`: links read from resolved payloads, guided by the schema
//! - `legacy`: the narrow fallback for untyped payloads
//! - `propagator`: links lifted into comparison space with a derived status

pub mod extractor;
pub mod legacy;
pub mod propagator;

pub use extractor::{LinkExtractor, extract_links};
pub use propagator::{EntryRelationship, RelationshipIndex, propagate};
