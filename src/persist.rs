//! Draft task persistence.
//!
//! Writes one normalized, schema-valid task plus its criteria, examples,
//! and interaction examples as new rows in a single transaction per
//! segment. Every successfully parsed segment becomes a brand-new draft
//! (`is_published = 0`); there is no merge or upsert against existing
//! tasks.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::ParsedTask;

/// Persist one normalized task value as a new unpublished draft.
///
/// Returns the generated task id.
pub async fn persist_draft(
    pool: &SqlitePool,
    task_value: &serde_json::Value,
    slug_max_len: usize,
) -> Result<String> {
    let task: ParsedTask = serde_json::from_value(task_value.clone())
        .context("normalized task no longer matches the schema")?;

    let task_id = Uuid::new_v4().to_string();
    let slug = make_slug(&task.title, slug_max_len);
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO tasks (id, slug, title, description, skill_domain, base_difficulty,
                           tags_json, language, is_published, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&task_id)
    .bind(&slug)
    .bind(&task.title)
    .bind(&task.description)
    .bind(&task.skill_domain)
    .bind(task.base_difficulty)
    .bind(serde_json::to_string(&task.tags)?)
    .bind(&task.language)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (i, criterion) in task.criteria.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO criteria (task_id, id, label, description, rubric_json, sort_order)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task_id)
        .bind(&criterion.id)
        .bind(&criterion.label)
        .bind(&criterion.description)
        .bind(criterion.rubric.to_string())
        .bind(i as i64)
        .execute(&mut *tx)
        .await?;
    }

    for example in &task.examples {
        sqlx::query(
            r#"
            INSERT INTO examples (id, task_id, difficulty, severity_label, patient_text, language, meta_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&example.id)
        .bind(&task_id)
        .bind(example.difficulty)
        .bind(&example.severity_label)
        .bind(&example.patient_text)
        .bind(&example.language)
        .bind(example.meta.to_string())
        .execute(&mut *tx)
        .await?;
    }

    for ie in &task.interaction_examples {
        sqlx::query(
            r#"
            INSERT INTO interaction_examples (id, task_id, difficulty, title, patient_text, therapist_text, language)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ie.id)
        .bind(&task_id)
        .bind(ie.difficulty)
        .bind(&ie.title)
        .bind(&ie.patient_text)
        .bind(&ie.therapist_text)
        .bind(&ie.language)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(task_id)
}

/// Derive a slug from the title plus a short random suffix, truncated to
/// `max_len`. The suffix keeps slugs unique across drafts parsed from
/// similarly-titled segments.
pub fn make_slug(title: &str, max_len: usize) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string()[..6].to_string();

    let mut base = String::new();
    let mut prev_dash = true;
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            base.push(c);
            prev_dash = false;
        } else if !prev_dash {
            base.push('-');
            prev_dash = true;
        }
    }
    let base = base.trim_matches('-');

    let keep = max_len.saturating_sub(suffix.len() + 1);
    let base = if base.len() > keep { &base[..keep] } else { base };
    let base = base.trim_end_matches('-');

    if base.is_empty() {
        format!("task-{}", suffix)
    } else {
        format!("{}-{}", base, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_shape() {
        let slug = make_slug("Reflective Listening (Level 2)", 64);
        assert!(slug.starts_with("reflective-listening-level-2-"));
        let suffix = slug.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
    }

    #[test]
    fn test_slug_truncated_to_max_len() {
        let long_title = "a very long therapy skill title that keeps going and going and going";
        let slug = make_slug(long_title, 32);
        assert!(slug.len() <= 32, "slug too long: {}", slug);
        assert!(!slug.contains("--"));
    }

    #[test]
    fn test_slug_from_non_alphanumeric_title() {
        let slug = make_slug("§§§", 64);
        assert!(slug.starts_with("task-"));
    }

    #[test]
    fn test_slugs_are_unique_per_call() {
        let a = make_slug("Same title", 64);
        let b = make_slug("Same title", 64);
        assert_ne!(a, b);
    }
}
