//! Content instance access
//!
//! A [`ContentApi`] is the only way the sync engine reaches an instance. The
//! HTTP implementation talks to the instance's REST API; tests use an
//! in-memory double.

pub mod client;
pub mod content;
#[cfg(test)]
pub mod memory;
pub mod metadata;
pub mod operations;
pub mod resilience;

pub use client::{ApiError, HttpContentApi};
pub use content::{
    ContentApi, CreatedEntry, EntryTarget, MediaFile, MediaLinkRow, MediaUpload, parse_timestamp,
};
pub use metadata::{Attribute, ComponentSchema, ContentTypeSchema, SchemaRegistry, parse_schema};
pub use operations::{Operation, OperationResult};
pub use resilience::{
    ConcurrencyConfig, ConcurrencyLimiter, ResilienceConfig, RetryConfig, RetryPolicy,
    RetryableError,
};
