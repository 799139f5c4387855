//! Id mappings repository
//!
//! Mappings are scoped to an ordered instance pair. Writes are upserts keyed by
//! (pair, type, locale, source document, target document).

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use super::{locale_column, locale_from_column};
use crate::sync::id_mapping::{IdMapping, IdMappingTable};

/// All mappings of an instance pair, optionally narrowed to one content type
pub async fn list_mappings(
    pool: &SqlitePool,
    source_instance: &str,
    target_instance: &str,
    content_type: Option<&str>,
) -> Result<Vec<IdMapping>> {
    let rows = sqlx::query(
        r#"
        SELECT content_type, locale, source_document_id, source_id,
               target_document_id, target_id, updated_at
        FROM id_mappings
        WHERE source_instance = ? AND target_instance = ?
          AND (? IS NULL OR content_type = ?)
        ORDER BY content_type, source_document_id, locale
        "#,
    )
    .bind(source_instance)
    .bind(target_instance)
    .bind(content_type)
    .bind(content_type)
    .fetch_all(pool)
    .await
    .context("Failed to list id mappings")?;

    let mut mappings = Vec::new();
    for row in rows {
        mappings.push(IdMapping {
            content_type: row.try_get("content_type")?,
            locale: locale_from_column(row.try_get("locale")?),
            source_document_id: row.try_get("source_document_id")?,
            source_id: row.try_get("source_id")?,
            target_document_id: row.try_get("target_document_id")?,
            target_id: row.try_get("target_id")?,
            updated_at: row.try_get("updated_at")?,
        });
    }

    Ok(mappings)
}

/// Load the mapping table of an instance pair
pub async fn load_table(
    pool: &SqlitePool,
    source_instance: &str,
    target_instance: &str,
) -> Result<IdMappingTable> {
    let mappings = list_mappings(pool, source_instance, target_instance, None).await?;
    log::debug!(
        "Loaded {} id mapping(s) for {} -> {}",
        mappings.len(),
        source_instance,
        target_instance
    );
    Ok(IdMappingTable::from_mappings(mappings))
}

/// Write back the changes accumulated in a table since it was loaded
///
/// Returns (upserted, removed) counts.
pub async fn save_changes(
    pool: &SqlitePool,
    source_instance: &str,
    target_instance: &str,
    table: &mut IdMappingTable,
) -> Result<(usize, usize)> {
    let (upserts, removed) = table.take_changes();
    if upserts.is_empty() && removed.is_empty() {
        return Ok((0, 0));
    }

    let mut tx = pool.begin().await.context("Failed to start transaction")?;

    for mapping in &removed {
        sqlx::query(
            r#"
            DELETE FROM id_mappings
            WHERE source_instance = ? AND target_instance = ? AND content_type = ?
              AND locale = ? AND source_document_id = ? AND target_document_id = ?
            "#,
        )
        .bind(source_instance)
        .bind(target_instance)
        .bind(&mapping.content_type)
        .bind(locale_column(mapping.locale.as_deref()))
        .bind(&mapping.source_document_id)
        .bind(&mapping.target_document_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete id mapping")?;
    }

    for mapping in &upserts {
        sqlx::query(
            r#"
            INSERT INTO id_mappings
                (source_instance, target_instance, content_type, locale, source_document_id,
                 source_id, target_document_id, target_id, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_instance, target_instance, content_type, locale,
                        source_document_id, target_document_id)
            DO UPDATE SET source_id = excluded.source_id,
                          target_id = excluded.target_id,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(source_instance)
        .bind(target_instance)
        .bind(&mapping.content_type)
        .bind(locale_column(mapping.locale.as_deref()))
        .bind(&mapping.source_document_id)
        .bind(mapping.source_id)
        .bind(&mapping.target_document_id)
        .bind(mapping.target_id)
        .bind(mapping.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert id mapping")?;
    }

    tx.commit().await.context("Failed to commit id mappings")?;
    log::debug!(
        "Saved id mappings for {} -> {}: {} upserted, {} removed",
        source_instance,
        target_instance,
        upserts.len(),
        removed.len()
    );
    Ok((upserts.len(), removed.len()))
}

/// Remove every mapping of an instance pair
pub async fn clear_mappings(pool: &SqlitePool, source_instance: &str, target_instance: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM id_mappings WHERE source_instance = ? AND target_instance = ?")
        .bind(source_instance)
        .bind(target_instance)
        .execute(pool)
        .await
        .context("Failed to clear id mappings")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::repository::memory_pool;
    use crate::sync::types::EntityKey;

    const ARTICLE: &str = "api::article.article";

    #[tokio::test]
    async fn test_changes_are_upserted_and_removed() {
        let pool = memory_pool().await.unwrap();
        let mut table = IdMappingTable::new();
        table.upsert(IdMapping::new(ARTICLE, None, ("a", 1), ("ta", 11)));
        table.upsert(IdMapping::new(ARTICLE, Some("fr".to_string()), ("a", 2), ("ta-fr", 12)));
        assert_eq!(save_changes(&pool, "staging", "prod", &mut table).await.unwrap(), (2, 0));

        let mut table = load_table(&pool, "staging", "prod").await.unwrap();
        assert_eq!(table.len(), 2);
        let fr = EntityKey::new(ARTICLE, "a").with_locale(Some("fr".to_string()));
        assert_eq!(table.target_for(&fr).unwrap().target_document_id, "ta-fr");

        // refreshed internal id on the same pair is an upsert, not a new row
        table.upsert(IdMapping::new(ARTICLE, None, ("a", 1), ("ta", 99)));
        table.remove_source(&fr);
        assert_eq!(save_changes(&pool, "staging", "prod", &mut table).await.unwrap(), (1, 1));

        let stored = list_mappings(&pool, "staging", "prod", Some(ARTICLE)).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].target_id, 99);
        assert!(list_mappings(&pool, "prod", "staging", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_is_scoped_to_pair() {
        let pool = memory_pool().await.unwrap();
        for (source, target) in [("staging", "prod"), ("dev", "prod")] {
            let mut table = IdMappingTable::new();
            table.upsert(IdMapping::new(ARTICLE, None, ("a", 1), ("ta", 11)));
            save_changes(&pool, source, target, &mut table).await.unwrap();
        }

        assert_eq!(clear_mappings(&pool, "staging", "prod").await.unwrap(), 1);
        assert_eq!(list_mappings(&pool, "dev", "prod", None).await.unwrap().len(), 1);
    }
}
