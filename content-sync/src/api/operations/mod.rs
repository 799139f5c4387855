//! Target write operations
//!
//! This module provides a unified interface for the entry and media writes the
//! merge processor issues against a target instance.

pub mod operation;

pub use operation::{Operation, OperationResult};
