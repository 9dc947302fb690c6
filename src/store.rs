//! Job store and append-only event log.
//!
//! Two write paths and one read path:
//! - [`JobStore::append_event`] — pure insert into the event log. Events
//!   are never updated or deleted; the auto-incrementing `id` is the only
//!   ordering consumers may rely on.
//! - [`JobStore::update_job`] — partial patch that only touches provided
//!   fields and always refreshes `updated_at`.
//! - [`JobStore::get_status`] — the polling interface: job summary plus
//!   all events with `id > after_event_id`, and the new cursor. Repeated
//!   polls with the same cursor are idempotent.
//!
//! [`JobStore::record_segment_done`] applies the per-segment progress
//! increment (`completed_segments` + `created_task_ids` append) as one
//! atomic UPDATE, so concurrent segment units never lose an append or
//! fail on a sibling's write lock.
//!
//! # Event `meta` keys per step
//!
//! | Step | Keys |
//! |------|------|
//! | `created_job` | `source_hash`, `source_chars` |
//! | `planning_segments` | `total_segments`, `preview` (capped list), `preview_truncated` |
//! | `parsing_segment` | `segment`, `attempt`, `prompt_chars`, `retriable`, `error`, `criteria`, `examples`, `interaction_examples` |
//! | `persisting_task` | `segment`, `task_id`, `category`, `source_id`, `occurrences`, `error` |
//! | `done` | `created_tasks`, `error` |

use anyhow::{anyhow, Result};
use sqlx::{Row, SqlitePool};

use crate::models::{EventLevel, Job, JobEvent, JobStatus, JobStep};

/// Partial update for a job row. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub step: Option<JobStep>,
    pub total_segments: Option<i64>,
    pub error: Option<String>,
}

/// Job summary plus event delta returned by [`JobStore::get_status`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatusResponse {
    pub job: Job,
    pub events: Vec<JobEvent>,
    /// Cursor for the next poll: the last returned event's id, or the
    /// caller's cursor unchanged when no new events exist.
    pub next_after_event_id: i64,
}

/// SQLite-backed job summary row + append-only event log.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, step, total_segments, completed_segments,
                              created_task_ids, error, source_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.step.as_str())
        .bind(job.total_segments)
        .bind(job.completed_segments)
        .bind(serde_json::to_string(&job.created_task_ids)?)
        .bind(&job.error)
        .bind(&job.source_hash)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append one event. Awaited by callers — a failure propagates rather
    /// than being dropped silently.
    pub async fn append_event(
        &self,
        job_id: &str,
        level: EventLevel,
        step: JobStep,
        message: &str,
        meta: serde_json::Value,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO job_events (job_id, ts, level, step, message, meta_json) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(now)
        .bind(level.as_str())
        .bind(step.as_str())
        .bind(message)
        .bind(meta.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply a partial patch; untouched fields keep their values, and
    /// `updated_at` is always refreshed.
    pub async fn update_job(&self, job_id: &str, patch: &JobPatch) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = COALESCE(?, status),
                step = COALESCE(?, step),
                total_segments = COALESCE(?, total_segments),
                error = COALESCE(?, error),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.step.map(|s| s.as_str()))
        .bind(patch.total_segments)
        .bind(&patch.error)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomically increment `completed_segments` and append `task_id` to
    /// `created_task_ids` for one successfully persisted segment.
    ///
    /// A single statement — `json_insert` with the `$[#]` append path —
    /// so concurrent segment units never race a read-modify-write or
    /// trip over each other's write locks.
    pub async fn record_segment_done(&self, job_id: &str, task_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE jobs SET
                completed_segments = completed_segments + 1,
                created_task_ids = json_insert(created_task_ids, '$[#]', ?),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(task_id)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT id, status, step, total_segments, completed_segments,
                   created_task_ids, error, source_hash, created_at, updated_at
            FROM jobs WHERE id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }

    /// The sole progress endpoint: job summary plus every event with
    /// `id > after_event_id`, ordered by `id`.
    pub async fn get_status(
        &self,
        job_id: &str,
        after_event_id: i64,
    ) -> Result<Option<JobStatusResponse>> {
        let job = match self.get_job(job_id).await? {
            Some(job) => job,
            None => return Ok(None),
        };

        let rows = sqlx::query(
            r#"
            SELECT id, job_id, ts, level, step, message, meta_json
            FROM job_events
            WHERE job_id = ? AND id > ?
            ORDER BY id ASC
            "#,
        )
        .bind(job_id)
        .bind(after_event_id)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(row_to_event(row)?);
        }

        let next_after_event_id = events.last().map(|e| e.id).unwrap_or(after_event_id);

        Ok(Some(JobStatusResponse {
            job,
            events,
            next_after_event_id,
        }))
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<Job> {
    let status_str: String = row.get("status");
    let step_str: String = row.get("step");
    let ids_json: String = row.get("created_task_ids");

    Ok(Job {
        id: row.get("id"),
        status: JobStatus::parse(&status_str)
            .ok_or_else(|| anyhow!("unknown job status in row: {}", status_str))?,
        step: JobStep::parse(&step_str)
            .ok_or_else(|| anyhow!("unknown job step in row: {}", step_str))?,
        total_segments: row.get("total_segments"),
        completed_segments: row.get("completed_segments"),
        created_task_ids: serde_json::from_str(&ids_json)?,
        error: row.get("error"),
        source_hash: row.get("source_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<JobEvent> {
    let level_str: String = row.get("level");
    let step_str: String = row.get("step");
    let meta_json: String = row.get("meta_json");

    Ok(JobEvent {
        id: row.get("id"),
        job_id: row.get("job_id"),
        ts: row.get("ts"),
        level: EventLevel::parse(&level_str)
            .ok_or_else(|| anyhow!("unknown event level in row: {}", level_str))?,
        step: JobStep::parse(&step_str)
            .ok_or_else(|| anyhow!("unknown event step in row: {}", step_str))?,
        message: row.get("message"),
        meta: serde_json::from_str(&meta_json).unwrap_or(serde_json::json!({})),
    })
}
