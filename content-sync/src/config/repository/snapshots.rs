//! Cached snapshots and comparisons per merge request

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::sync::comparator::ComparisonOutcome;
use crate::sync::snapshot::Snapshot;

/// Snapshot stored for a merge request, with its comparison once one ran
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub snapshot: Snapshot,
    pub comparison: Option<ComparisonOutcome>,
    pub captured_at: DateTime<Utc>,
}

pub async fn save_snapshot(
    pool: &SqlitePool,
    merge_request_id: Uuid,
    snapshot: &Snapshot,
    comparison: Option<&ComparisonOutcome>,
) -> Result<()> {
    let snapshot_json = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
    let comparison_json = comparison
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize comparison")?;

    sqlx::query(
        r#"
        INSERT INTO snapshots (merge_request_id, snapshot_json, comparison_json, captured_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(merge_request_id)
        DO UPDATE SET snapshot_json = excluded.snapshot_json,
                      comparison_json = excluded.comparison_json,
                      captured_at = excluded.captured_at
        "#,
    )
    .bind(merge_request_id.to_string())
    .bind(snapshot_json)
    .bind(comparison_json)
    .bind(snapshot.captured_at)
    .execute(pool)
    .await
    .context("Failed to save snapshot")?;

    Ok(())
}

pub async fn load_snapshot(pool: &SqlitePool, merge_request_id: Uuid) -> Result<Option<CachedSnapshot>> {
    let row = sqlx::query(
        "SELECT snapshot_json, comparison_json, captured_at FROM snapshots WHERE merge_request_id = ?",
    )
    .bind(merge_request_id.to_string())
    .fetch_optional(pool)
    .await
    .context("Failed to load snapshot")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let snapshot_json: String = row.try_get("snapshot_json")?;
    let comparison = match row.try_get::<Option<String>, _>("comparison_json")? {
        Some(json) => Some(serde_json::from_str(&json).context("Failed to deserialize comparison")?),
        None => None,
    };

    Ok(Some(CachedSnapshot {
        snapshot: serde_json::from_str(&snapshot_json).context("Failed to deserialize snapshot")?,
        comparison,
        captured_at: row.try_get("captured_at")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::repository::{memory_pool, merge_requests};
    use crate::sync::merge_request::MergeRequest;
    use crate::sync::snapshot::test_support::{entity, snapshot};
    use serde_json::json;

    #[tokio::test]
    async fn test_snapshot_cached_and_dropped_with_request() {
        let pool = memory_pool().await.unwrap();
        let request = MergeRequest::new("release", "staging", "production");
        merge_requests::insert_merge_request(&pool, &request).await.unwrap();

        let snap = snapshot(
            vec![entity("api::article.article", 1, "a", json!({"title": "A"}))],
            vec![],
        );
        save_snapshot(&pool, request.id, &snap, Some(&ComparisonOutcome::default()))
            .await
            .unwrap();

        let cached = load_snapshot(&pool, request.id).await.unwrap().unwrap();
        assert_eq!(cached.snapshot.source.entities().len(), 1);
        assert!(cached.snapshot.source.get("api::article.article", 1).is_some());
        assert!(cached.comparison.is_some());

        merge_requests::delete_merge_request(&pool, &request).await.unwrap();
        assert!(load_snapshot(&pool, request.id).await.unwrap().is_none());
    }
}
