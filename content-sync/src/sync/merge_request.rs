//! Merge request lifecycle
//!
//! A merge request is one named run between two instances. Its status only
//! moves forward:
//!
//! - `CREATED` → `SCHEMA_CHECKED` once a schema check is recorded
//! - `SCHEMA_CHECKED` → `COMPARED` once a comparison is recorded
//! - `COMPARED` → `IN_PROGRESS` when the apply starts
//! - `IN_PROGRESS` → `COMPLETED` or `FAILED` when every item was attempted
//!
//! Once a request is in progress or finished, its schema check, comparison
//! and selections are frozen and the request can no longer be deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::SyncError;
use super::schema::SchemaCheck;
use super::types::{EntityKey, Selection, SelectionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeRequestStatus {
    Created,
    SchemaChecked,
    Compared,
    InProgress,
    Completed,
    Failed,
}

impl MergeRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::SchemaChecked => "SCHEMA_CHECKED",
            Self::Compared => "COMPARED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(Self::Created),
            "SCHEMA_CHECKED" => Some(Self::SchemaChecked),
            "COMPARED" => Some(Self::Compared),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the request's inputs are frozen
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::InProgress | Self::Completed | Self::Failed)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for MergeRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one executed selection, as reported by the merge processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionOutcome {
    pub key: EntityKey,
    pub status: SelectionStatus,
    pub executed_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: Uuid,
    pub name: String,
    pub source_instance: String,
    pub target_instance: String,
    pub status: MergeRequestStatus,
    pub schema_check: Option<SchemaCheck>,
    pub compared_at: Option<DateTime<Utc>>,
    pub selections: Vec<Selection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MergeRequest {
    pub fn new(
        name: impl Into<String>,
        source_instance: impl Into<String>,
        target_instance: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source_instance: source_instance.into(),
            target_instance: target_instance.into(),
            status: MergeRequestStatus::Created,
            schema_check: None,
            compared_at: None,
            selections: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn ensure_unlocked(&self, operation: &str) -> Result<(), SyncError> {
        if self.status.is_locked() {
            return Err(SyncError::invalid_state(operation, self.status));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Store a schema check; a re-check invalidates an earlier comparison
    pub fn record_schema_check(&mut self, check: SchemaCheck) -> Result<(), SyncError> {
        self.ensure_unlocked("record a schema check")?;
        self.schema_check = Some(check);
        self.compared_at = None;
        self.status = MergeRequestStatus::SchemaChecked;
        self.touch();
        Ok(())
    }

    /// Mark the request as compared; needs a compatible schema check first
    pub fn record_comparison(&mut self) -> Result<(), SyncError> {
        self.ensure_unlocked("record a comparison")?;
        let check = self.schema_check.as_ref().ok_or(SyncError::SchemaNotChecked)?;
        check.ensure_compatible()?;

        self.compared_at = Some(Utc::now());
        self.status = MergeRequestStatus::Compared;
        self.touch();
        Ok(())
    }

    /// Replace the selections, resetting their outcomes
    pub fn set_selections(&mut self, selections: Vec<Selection>) -> Result<(), SyncError> {
        self.ensure_unlocked("change selections")?;
        self.selections = selections
            .into_iter()
            .map(|s| Selection::new(s.key, s.direction))
            .collect();
        self.touch();
        Ok(())
    }

    /// Enter IN_PROGRESS; only a compared request can start
    pub fn begin(&mut self) -> Result<(), SyncError> {
        if self.status != MergeRequestStatus::Compared {
            return Err(SyncError::invalid_state("start the merge", self.status));
        }
        self.status = MergeRequestStatus::InProgress;
        self.touch();
        Ok(())
    }

    /// Record per-selection outcomes and settle on COMPLETED or FAILED
    ///
    /// The request completes only when every selection succeeded.
    pub fn finish(&mut self, outcomes: &[SelectionOutcome]) -> Result<MergeRequestStatus, SyncError> {
        if self.status != MergeRequestStatus::InProgress {
            return Err(SyncError::invalid_state("finish the merge", self.status));
        }

        for outcome in outcomes {
            match self.selections.iter_mut().find(|s| s.key == outcome.key) {
                Some(selection) => {
                    selection.status = outcome.status;
                    selection.executed_at = Some(outcome.executed_at);
                    selection.error = outcome.error.clone();
                }
                None => log::warn!("Outcome for unselected entity {} ignored", outcome.key),
            }
        }

        let all_succeeded = self.selections.iter().all(Selection::succeeded);
        self.status = if all_succeeded {
            MergeRequestStatus::Completed
        } else {
            MergeRequestStatus::Failed
        };
        let now = Utc::now();
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(self.status)
    }

    /// Mark a finished merge FAILED when its results could not be recorded
    pub fn mark_failed(&mut self) -> Result<(), SyncError> {
        if !self.status.is_finished() {
            return Err(SyncError::invalid_state("fail the merge", self.status));
        }
        self.status = MergeRequestStatus::Failed;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn ensure_deletable(&self) -> Result<(), SyncError> {
        self.ensure_unlocked("delete the merge request")
    }

    pub fn failed_selections(&self) -> impl Iterator<Item = &Selection> {
        self.selections
            .iter()
            .filter(|s| s.status == SelectionStatus::Failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::Direction;

    fn compared_request() -> MergeRequest {
        let mut request = MergeRequest::new("spring release", "staging", "production");
        request.record_schema_check(SchemaCheck::default()).unwrap();
        request.record_comparison().unwrap();
        request
    }

    fn selection(doc: &str) -> Selection {
        Selection::new(EntityKey::new("api::article.article", doc), Direction::Create)
    }

    fn outcome(doc: &str, status: SelectionStatus) -> SelectionOutcome {
        SelectionOutcome {
            key: EntityKey::new("api::article.article", doc),
            status,
            executed_at: Utc::now(),
            error: (status == SelectionStatus::Failure).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_status_strings_roundtrip() {
        for status in [
            MergeRequestStatus::Created,
            MergeRequestStatus::SchemaChecked,
            MergeRequestStatus::Compared,
            MergeRequestStatus::InProgress,
            MergeRequestStatus::Completed,
            MergeRequestStatus::Failed,
        ] {
            assert_eq!(MergeRequestStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_comparison_requires_schema_check() {
        let mut request = MergeRequest::new("r", "a", "b");
        assert!(matches!(
            request.record_comparison(),
            Err(SyncError::SchemaNotChecked)
        ));
    }

    #[test]
    fn test_incompatible_schema_blocks_comparison() {
        let mut request = MergeRequest::new("r", "a", "b");
        let check = SchemaCheck {
            incompatibilities: vec!["api::tag.tag missing on target".to_string()],
            ..Default::default()
        };
        request.record_schema_check(check).unwrap();

        assert!(matches!(
            request.record_comparison(),
            Err(SyncError::SchemaIncompatible { .. })
        ));
        assert_eq!(request.status, MergeRequestStatus::SchemaChecked);
    }

    #[test]
    fn test_finish_completes_only_without_failures() {
        let mut request = compared_request();
        request.set_selections(vec![selection("a"), selection("b")]).unwrap();
        request.begin().unwrap();

        let status = request
            .finish(&[
                outcome("a", SelectionStatus::Success),
                outcome("b", SelectionStatus::Failure),
            ])
            .unwrap();

        assert_eq!(status, MergeRequestStatus::Failed);
        assert_eq!(request.failed_selections().count(), 1);
        assert!(request.completed_at.is_some());
    }

    #[test]
    fn test_mark_failed_only_after_finish() {
        let mut request = compared_request();
        request.set_selections(vec![selection("a")]).unwrap();
        request.begin().unwrap();
        assert!(request.mark_failed().is_err());

        request.finish(&[outcome("a", SelectionStatus::Success)]).unwrap();
        request.mark_failed().unwrap();
        assert_eq!(request.status, MergeRequestStatus::Failed);
        assert_eq!(request.failed_selections().count(), 0);
    }

    #[test]
    fn test_locked_request_rejects_mutation() {
        let mut request = compared_request();
        request.set_selections(vec![selection("a")]).unwrap();
        request.begin().unwrap();

        assert!(matches!(
            request.set_selections(Vec::new()),
            Err(SyncError::InvalidState { status: MergeRequestStatus::InProgress, .. })
        ));
        assert!(request.record_schema_check(SchemaCheck::default()).is_err());
        assert_eq!(request.selections.len(), 1);
    }

    #[test]
    fn test_completed_request_cannot_be_deleted() {
        let mut request = compared_request();
        request.set_selections(vec![selection("a")]).unwrap();
        request.begin().unwrap();
        request
            .finish(&[outcome("a", SelectionStatus::Success)])
            .unwrap();

        assert_eq!(request.status, MergeRequestStatus::Completed);
        let err = request.ensure_deletable().unwrap_err();
        assert!(err.to_string().contains("COMPLETED"));
    }
}
