use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an already-open pool. All statements are
/// idempotent, so running this repeatedly is safe.
pub async fn run_migrations_on(pool: &SqlitePool) -> Result<()> {
    // Jobs table — one row per submitted document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            step TEXT NOT NULL,
            total_segments INTEGER,
            completed_segments INTEGER NOT NULL DEFAULT 0,
            created_task_ids TEXT NOT NULL DEFAULT '[]',
            error TEXT,
            source_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only event log; the rowid-backed id is the polling cursor
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            ts INTEGER NOT NULL,
            level TEXT NOT NULL,
            step TEXT NOT NULL,
            message TEXT NOT NULL,
            meta_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (job_id) REFERENCES jobs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Draft task tables
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            skill_domain TEXT,
            base_difficulty INTEGER,
            tags_json TEXT NOT NULL DEFAULT '[]',
            language TEXT,
            is_published INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS criteria (
            task_id TEXT NOT NULL,
            id TEXT NOT NULL,
            label TEXT NOT NULL,
            description TEXT,
            rubric_json TEXT NOT NULL DEFAULT '{}',
            sort_order INTEGER NOT NULL,
            PRIMARY KEY (task_id, id),
            FOREIGN KEY (task_id) REFERENCES tasks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS examples (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            difficulty INTEGER,
            severity_label TEXT,
            patient_text TEXT NOT NULL,
            language TEXT,
            meta_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (task_id) REFERENCES tasks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interaction_examples (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            difficulty INTEGER,
            title TEXT NOT NULL,
            patient_text TEXT NOT NULL,
            therapist_text TEXT NOT NULL,
            language TEXT,
            FOREIGN KEY (task_id) REFERENCES tasks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_events_job_id ON job_events(job_id, id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_criteria_task_id ON criteria(task_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_examples_task_id ON examples(task_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_interaction_examples_task_id ON interaction_examples(task_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
