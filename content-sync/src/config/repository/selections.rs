//! Selections repository

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{locale_column, locale_from_column};
use crate::sync::types::{Direction, EntityKey, Selection, SelectionStatus};

/// Selections of a merge request, in the order they were made
pub async fn list_selections(pool: &SqlitePool, merge_request_id: Uuid) -> Result<Vec<Selection>> {
    let rows = sqlx::query(
        r#"
        SELECT content_type, document_id, locale, direction, status, executed_at, error
        FROM selections
        WHERE merge_request_id = ?
        ORDER BY position
        "#,
    )
    .bind(merge_request_id.to_string())
    .fetch_all(pool)
    .await
    .context("Failed to list selections")?;

    let mut selections = Vec::new();
    for row in rows {
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;
        let key = EntityKey::new(
            row.try_get::<String, _>("content_type")?,
            row.try_get::<String, _>("document_id")?,
        )
        .with_locale(locale_from_column(row.try_get("locale")?));

        selections.push(Selection {
            key,
            direction: Direction::parse(&direction)
                .ok_or_else(|| anyhow!("Unknown selection direction '{}'", direction))?,
            status: SelectionStatus::parse(&status)
                .ok_or_else(|| anyhow!("Unknown selection status '{}'", status))?,
            executed_at: row.try_get::<Option<DateTime<Utc>>, _>("executed_at")?,
            error: row.try_get("error")?,
        });
    }

    Ok(selections)
}

/// Replace every selection of a merge request (inside the caller's transaction)
pub async fn replace_selections(
    conn: &mut SqliteConnection,
    merge_request_id: Uuid,
    selections: &[Selection],
) -> Result<()> {
    let id = merge_request_id.to_string();

    sqlx::query("DELETE FROM selections WHERE merge_request_id = ?")
        .bind(&id)
        .execute(&mut *conn)
        .await
        .context("Failed to clear selections")?;

    for (position, selection) in selections.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO selections
                (merge_request_id, content_type, document_id, locale, direction, status,
                 executed_at, error, position)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(merge_request_id, content_type, document_id, locale)
            DO UPDATE SET direction = excluded.direction,
                          status = excluded.status,
                          executed_at = excluded.executed_at,
                          error = excluded.error
            "#,
        )
        .bind(&id)
        .bind(&selection.key.content_type)
        .bind(&selection.key.document_id)
        .bind(locale_column(selection.key.locale.as_deref()))
        .bind(selection.direction.as_str())
        .bind(selection.status.as_str())
        .bind(selection.executed_at)
        .bind(&selection.error)
        .bind(position as i64)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to save selection {}", selection.key))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::repository::{memory_pool, merge_requests};
    use crate::sync::merge_request::MergeRequest;

    #[tokio::test]
    async fn test_replace_keeps_order_and_outcomes() {
        let pool = memory_pool().await.unwrap();
        let request = MergeRequest::new("release", "staging", "production");
        merge_requests::insert_merge_request(&pool, &request).await.unwrap();

        let mut done = Selection::new(
            EntityKey::new("api::article.article", "b").with_locale(Some("fr".to_string())),
            Direction::Update,
        );
        done.status = SelectionStatus::Failure;
        done.executed_at = Some(Utc::now());
        done.error = Some("boom".to_string());
        let selections = vec![
            Selection::new(EntityKey::new("api::article.article", "z"), Direction::Create),
            done,
        ];

        let mut conn = pool.acquire().await.unwrap();
        replace_selections(&mut conn, request.id, &selections).await.unwrap();
        drop(conn);

        let loaded = list_selections(&pool, request.id).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].key.document_id, "z");
        assert_eq!(loaded[1].key.locale.as_deref(), Some("fr"));
        assert_eq!(loaded[1].status, SelectionStatus::Failure);
        assert_eq!(loaded[1].error.as_deref(), Some("boom"));
    }
}
