//! Exclusion rules repository

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::sync::exclusions::{ExclusionRule, ExclusionSet};

/// Rules of an instance pair, oldest first
pub async fn list_rules(
    pool: &SqlitePool,
    source_instance: &str,
    target_instance: &str,
) -> Result<Vec<ExclusionRule>> {
    let rows = sqlx::query(
        r#"
        SELECT id, content_type, document_id, field_path
        FROM exclusion_rules
        WHERE source_instance = ? AND target_instance = ?
        ORDER BY id
        "#,
    )
    .bind(source_instance)
    .bind(target_instance)
    .fetch_all(pool)
    .await
    .context("Failed to list exclusion rules")?;

    let mut rules = Vec::new();
    for row in rows {
        rules.push(ExclusionRule {
            id: Some(row.try_get("id")?),
            content_type: row.try_get("content_type")?,
            document_id: row.try_get("document_id")?,
            field_path: row.try_get("field_path")?,
        });
    }

    Ok(rules)
}

pub async fn load_set(pool: &SqlitePool, source_instance: &str, target_instance: &str) -> Result<ExclusionSet> {
    Ok(ExclusionSet::new(
        list_rules(pool, source_instance, target_instance).await?,
    ))
}

/// Add a rule, returning its id; an identical existing rule is reused
pub async fn add_rule(
    pool: &SqlitePool,
    source_instance: &str,
    target_instance: &str,
    rule: &ExclusionRule,
) -> Result<i64> {
    let existing: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT id FROM exclusion_rules
        WHERE source_instance = ? AND target_instance = ? AND content_type = ?
          AND document_id IS ? AND field_path IS ?
        "#,
    )
    .bind(source_instance)
    .bind(target_instance)
    .bind(&rule.content_type)
    .bind(&rule.document_id)
    .bind(&rule.field_path)
    .fetch_optional(pool)
    .await
    .context("Failed to look up exclusion rule")?;

    if let Some((id,)) = existing {
        return Ok(id);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO exclusion_rules
            (source_instance, target_instance, content_type, document_id, field_path, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(source_instance)
    .bind(target_instance)
    .bind(&rule.content_type)
    .bind(&rule.document_id)
    .bind(&rule.field_path)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("Failed to add exclusion rule")?;

    Ok(result.last_insert_rowid())
}

/// Remove a rule by id; false when no such rule exists
pub async fn remove_rule(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM exclusion_rules WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to remove exclusion rule")?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::repository::memory_pool;
    use crate::sync::types::EntityKey;

    #[tokio::test]
    async fn test_add_list_remove() {
        let pool = memory_pool().await.unwrap();
        let whole_type = ExclusionRule::for_type("api::log.log");
        let field = ExclusionRule::for_type("api::article.article").with_field("views");

        let first = add_rule(&pool, "staging", "prod", &whole_type).await.unwrap();
        add_rule(&pool, "staging", "prod", &field).await.unwrap();
        assert_eq!(add_rule(&pool, "staging", "prod", &whole_type).await.unwrap(), first);

        let set = load_set(&pool, "staging", "prod").await.unwrap();
        assert_eq!(set.rules().len(), 2);
        assert!(set.excludes_entity(&EntityKey::new("api::log.log", "x")));
        assert_eq!(set.excluded_fields("api::article.article", "a"), vec!["views"]);

        assert!(remove_rule(&pool, first).await.unwrap());
        assert!(!remove_rule(&pool, first).await.unwrap());
        assert_eq!(list_rules(&pool, "staging", "prod").await.unwrap().len(), 1);
    }
}
