//! Error taxonomy for the sync engine

use super::merge_request::MergeRequestStatus;

/// Errors raised by the sync engine itself
///
/// Transport failures during prefetch and apply are usually absorbed (the
/// affected type degrades to empty, the affected item is marked FAILURE); they
/// only surface here when they abort a whole step.
#[derive(Debug, Clone)]
pub enum SyncError {
    /// A fetch or write against an instance failed
    Transport { operation: String, message: String },
    /// The two instances' schemas are structurally incompatible
    SchemaIncompatible { issues: Vec<String> },
    /// Comparison requested before a schema check was recorded
    SchemaNotChecked,
    /// Mutation attempted on a merge request in a state that forbids it
    InvalidState {
        operation: String,
        status: MergeRequestStatus,
    },
    /// A referenced merge request, selection or entity does not exist
    NotFound { what: String },
}

impl SyncError {
    pub fn transport(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_state(operation: impl Into<String>, status: MergeRequestStatus) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            status,
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Transport { operation, message } => {
                write!(f, "Transport failure during {}: {}", operation, message)
            }
            SyncError::SchemaIncompatible { issues } => {
                write!(
                    f,
                    "Schemas are incompatible ({} issue(s)): {}",
                    issues.len(),
                    issues.join("; ")
                )
            }
            SyncError::SchemaNotChecked => {
                write!(f, "Schema compatibility has not been checked for this merge request")
            }
            SyncError::InvalidState { operation, status } => {
                write!(
                    f,
                    "Cannot {} while merge request is {}",
                    operation,
                    status.as_str()
                )
            }
            SyncError::NotFound { what } => write!(f, "Not found: {}", what),
        }
    }
}

impl std::error::Error for SyncError {}
