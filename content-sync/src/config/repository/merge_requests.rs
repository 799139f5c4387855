//! Repository for merge request operations

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::selections;
use crate::sync::merge_request::{MergeRequest, MergeRequestStatus};
use crate::sync::schema::SchemaCheck;

/// Summary of a merge request (for listing)
#[derive(Debug, Clone)]
pub struct MergeRequestSummary {
    pub id: Uuid,
    pub name: String,
    pub source_instance: String,
    pub target_instance: String,
    pub status: MergeRequestStatus,
    pub selection_count: usize,
    pub updated_at: DateTime<Utc>,
}

fn parse_status(value: &str) -> Result<MergeRequestStatus> {
    MergeRequestStatus::parse(value).ok_or_else(|| anyhow!("Unknown merge request status '{}'", value))
}

fn parse_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid merge request id '{}'", value))
}

/// List all merge requests (summary only)
pub async fn list_merge_requests(pool: &SqlitePool) -> Result<Vec<MergeRequestSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT
            mr.id,
            mr.name,
            mr.source_instance,
            mr.target_instance,
            mr.status,
            mr.updated_at,
            COUNT(s.document_id) as selection_count
        FROM merge_requests mr
        LEFT JOIN selections s ON mr.id = s.merge_request_id
        GROUP BY mr.id
        ORDER BY mr.created_at
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to list merge requests")?;

    let mut requests = Vec::new();
    for row in rows {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        requests.push(MergeRequestSummary {
            id: parse_id(&id)?,
            name: row.try_get("name")?,
            source_instance: row.try_get("source_instance")?,
            target_instance: row.try_get("target_instance")?,
            status: parse_status(&status)?,
            selection_count: row.try_get::<i64, _>("selection_count")? as usize,
            updated_at: row.try_get("updated_at")?,
        });
    }

    Ok(requests)
}

async fn from_row(pool: &SqlitePool, row: SqliteRow) -> Result<MergeRequest> {
    let id = parse_id(&row.try_get::<String, _>("id")?)?;
    let status: String = row.try_get("status")?;
    let schema_check = match row.try_get::<Option<String>, _>("schema_check_json")? {
        Some(json) => Some(
            serde_json::from_str::<SchemaCheck>(&json).context("Failed to deserialize schema check")?,
        ),
        None => None,
    };

    Ok(MergeRequest {
        id,
        name: row.try_get("name")?,
        source_instance: row.try_get("source_instance")?,
        target_instance: row.try_get("target_instance")?,
        status: parse_status(&status)?,
        schema_check,
        compared_at: row.try_get("compared_at")?,
        selections: selections::list_selections(pool, id).await?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Get a merge request by name or id (full structure with selections)
pub async fn get_merge_request(pool: &SqlitePool, name_or_id: &str) -> Result<Option<MergeRequest>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, source_instance, target_instance, status, schema_check_json,
               compared_at, created_at, updated_at, completed_at
        FROM merge_requests
        WHERE name = ? OR id = ?
        "#,
    )
    .bind(name_or_id)
    .bind(name_or_id)
    .fetch_optional(pool)
    .await
    .context("Failed to get merge request")?;

    match row {
        Some(row) => Ok(Some(from_row(pool, row).await?)),
        None => Ok(None),
    }
}

/// Insert a new merge request; names are unique
pub async fn insert_merge_request(pool: &SqlitePool, request: &MergeRequest) -> Result<()> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM merge_requests WHERE name = ?")
        .bind(&request.name)
        .fetch_optional(pool)
        .await
        .context("Failed to check merge request name")?;
    if existing.is_some() {
        anyhow::bail!("A merge request named '{}' already exists", request.name);
    }

    sqlx::query(
        r#"
        INSERT INTO merge_requests
            (id, name, source_instance, target_instance, status, schema_check_json,
             compared_at, created_at, updated_at, completed_at)
        VALUES (?, ?, ?, ?, ?, NULL, NULL, ?, ?, NULL)
        "#,
    )
    .bind(request.id.to_string())
    .bind(&request.name)
    .bind(&request.source_instance)
    .bind(&request.target_instance)
    .bind(request.status.as_str())
    .bind(request.created_at)
    .bind(request.updated_at)
    .execute(pool)
    .await
    .context("Failed to insert merge request")?;

    Ok(())
}

/// Save status, schema check, timestamps and selections of a merge request
pub async fn save_merge_request(pool: &SqlitePool, request: &MergeRequest) -> Result<()> {
    let schema_check_json = request
        .schema_check
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize schema check")?;

    let mut tx = pool.begin().await.context("Failed to start transaction")?;

    let result = sqlx::query(
        r#"
        UPDATE merge_requests
        SET status = ?, schema_check_json = ?, compared_at = ?, updated_at = ?, completed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(request.status.as_str())
    .bind(schema_check_json)
    .bind(request.compared_at)
    .bind(request.updated_at)
    .bind(request.completed_at)
    .bind(request.id.to_string())
    .execute(&mut *tx)
    .await
    .context("Failed to update merge request")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("Merge request '{}' does not exist", request.name);
    }

    selections::replace_selections(&mut tx, request.id, &request.selections).await?;

    tx.commit().await.context("Failed to commit merge request")?;
    Ok(())
}

/// Delete a merge request with its selections and cached snapshot
///
/// Requests that started applying are kept; the lock check runs before any
/// statement is issued.
pub async fn delete_merge_request(pool: &SqlitePool, request: &MergeRequest) -> Result<()> {
    request.ensure_deletable()?;

    sqlx::query("DELETE FROM merge_requests WHERE id = ?")
        .bind(request.id.to_string())
        .execute(pool)
        .await
        .context("Failed to delete merge request")?;

    log::info!("Deleted merge request '{}'", request.name);
    Ok(())
}
