//! Job orchestration — the batch parse job state machine.
//!
//! Drives a submitted document through planning, concurrent per-segment
//! extraction, ID normalization, and draft persistence, reporting
//! progress through the job store after every step.
//!
//! State machine: `queued → running → {completed | failed | canceled}`,
//! with steps inside `running`: `planning_segments → parsing_segment →
//! persisting_task → done`. Transitions are monotonic; `step` moves to
//! `persisting_task` the first time *any* segment reaches that phase.
//!
//! Segments are processed concurrently (one unit per segment; bounded by
//! `pipeline.max_concurrency` when set). If any segment ultimately fails,
//! the job fails with the first encountered error — but drafts already
//! created by sibling segments are kept, and the caller reconciles via
//! `created_task_ids`.
//!
//! Cancellation and per-segment deadlines are not implemented at this
//! layer: a hung external call is bounded only by the collaborator's own
//! timeout (`llm.timeout_secs` for the bundled providers), which can
//! stall progress without failing the job. Operators should watch for
//! jobs whose `updated_at` stops moving.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::Config;
use crate::context;
use crate::llm::{SegmentPlanner, TaskExtractor};
use crate::models::{EventLevel, Job, JobStatus, JobStep, Segment};
use crate::normalize;
use crate::parser;
use crate::persist;
use crate::segment;
use crate::store::{JobPatch, JobStore};

/// Hashing capability used to fingerprint submitted documents.
///
/// Injected explicitly so tests and alternate runtimes can swap the
/// primitive without any ambient fallback chain.
pub trait ContentHasher: Send + Sync {
    fn hash(&self, text: &str) -> String;
}

/// Default [`ContentHasher`] backed by SHA-256.
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Create a job row for a submitted document and return its id.
///
/// Synchronous from the caller's perspective: the row is inserted with
/// `status = queued`, a "Job created" event is logged, and processing
/// does **not** start.
pub async fn create_job(
    store: &JobStore,
    hasher: &dyn ContentHasher,
    source_text: &str,
) -> Result<String> {
    let job_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();
    let source_hash = hasher.hash(source_text);

    let job = Job {
        id: job_id.clone(),
        status: JobStatus::Queued,
        step: JobStep::CreatedJob,
        total_segments: None,
        completed_segments: 0,
        created_task_ids: Vec::new(),
        error: None,
        source_hash: source_hash.clone(),
        created_at: now,
        updated_at: now,
    };
    store.insert_job(&job).await?;

    store
        .append_event(
            &job_id,
            EventLevel::Info,
            JobStep::CreatedJob,
            "Job created",
            json!({
                "source_hash": source_hash,
                "source_chars": source_text.len(),
            }),
        )
        .await?;

    Ok(job_id)
}

/// Run the pipeline for an existing job.
///
/// Only a `queued` job is started; one that already left `queued` is
/// returned unchanged. Returns once the job reaches a terminal status,
/// yielding the final job row. A job-level failure (planning error,
/// segment failure) is reported on the returned row, not as an `Err` —
/// `Err` means the store itself broke.
pub async fn run_job(
    config: &Config,
    store: &JobStore,
    planner: Arc<dyn SegmentPlanner>,
    extractor: Arc<dyn TaskExtractor>,
    job_id: &str,
    source_text: &str,
    parse_mode: Option<&str>,
) -> Result<Job> {
    let job = store
        .get_job(job_id)
        .await?
        .ok_or_else(|| anyhow!("no job found with id {}", job_id))?;

    // Status transitions are monotonic; a job that already left `queued`
    // is returned as-is rather than restarted.
    if job.status != JobStatus::Queued {
        tracing::warn!(
            job_id,
            status = job.status.as_str(),
            "job is not queued; refusing to run it again"
        );
        return Ok(job);
    }

    store
        .update_job(
            job_id,
            &JobPatch {
                status: Some(JobStatus::Running),
                step: Some(JobStep::PlanningSegments),
                ..Default::default()
            },
        )
        .await?;
    store
        .append_event(
            job_id,
            EventLevel::Info,
            JobStep::PlanningSegments,
            "Planning segments",
            json!({}),
        )
        .await?;

    // Planning failure is fatal: no segments are attempted.
    let doc = match segment::plan_segments(planner.as_ref(), source_text).await {
        Ok(doc) => doc,
        Err(e) => {
            return fail_job(store, job_id, &format!("segment planning failed: {}", e)).await;
        }
    };

    let total = doc.segments.len();
    let preview_cap = config.pipeline.segment_preview_cap;
    let preview: Vec<serde_json::Value> = doc
        .segments
        .iter()
        .take(preview_cap)
        .map(|s| {
            json!({
                "start_line": s.start_line,
                "end_line": s.end_line,
                "title_hint": s.title_hint,
            })
        })
        .collect();

    store
        .update_job(
            job_id,
            &JobPatch {
                total_segments: Some(total as i64),
                ..Default::default()
            },
        )
        .await?;
    store
        .append_event(
            job_id,
            EventLevel::Info,
            JobStep::PlanningSegments,
            &format!("Detected {} segment(s)", total),
            json!({
                "total_segments": total,
                "preview": preview,
                "preview_truncated": total > preview_cap,
            }),
        )
        .await?;

    store
        .update_job(
            job_id,
            &JobPatch {
                step: Some(JobStep::ParsingSegment),
                ..Default::default()
            },
        )
        .await?;

    // Job-level background, computed once rather than per segment.
    let global = doc
        .segments
        .first()
        .and_then(|s| context::global_context(&doc.lines, s.start_line));

    let lines = Arc::new(doc.lines);
    let global = Arc::new(global);
    let semaphore = match config.pipeline.max_concurrency {
        0 => None,
        n => Some(Arc::new(Semaphore::new(n))),
    };
    let persisting_started = Arc::new(AtomicBool::new(false));
    let max_attempts = config.parser.max_attempts;
    let slug_max_len = config.pipeline.slug_max_len;
    let parse_mode: Option<String> = parse_mode.map(|s| s.to_string());

    let mut units: JoinSet<Result<(), (usize, String)>> = JoinSet::new();

    for (i, seg) in doc.segments.into_iter().enumerate() {
        let store = store.clone();
        let extractor = Arc::clone(&extractor);
        let lines = Arc::clone(&lines);
        let global = Arc::clone(&global);
        let semaphore = semaphore.clone();
        let persisting_started = Arc::clone(&persisting_started);
        let parse_mode = parse_mode.clone();
        let job_id = job_id.to_string();

        units.spawn(async move {
            let _permit = match &semaphore {
                Some(sem) => Some(
                    sem.acquire()
                        .await
                        .map_err(|e| (i + 1, format!("concurrency limiter closed: {}", e)))?,
                ),
                None => None,
            };

            run_segment_unit(
                &store,
                extractor.as_ref(),
                &job_id,
                i + 1,
                total,
                &seg,
                &lines,
                global.as_deref(),
                parse_mode.as_deref(),
                max_attempts,
                slug_max_len,
                &persisting_started,
            )
            .await
            .map_err(|e| (i + 1, e))
        });
    }

    // First failure observed wins; siblings keep running so their drafts
    // are preserved.
    let mut first_error: Option<(usize, String)> = None;
    while let Some(joined) = units.join_next().await {
        let unit_result = match joined {
            Ok(res) => res,
            Err(e) => Err((0, format!("segment unit panicked: {}", e))),
        };
        if let Err(failure) = unit_result {
            if first_error.is_none() {
                first_error = Some(failure);
            }
        }
    }

    match first_error {
        Some((index, message)) => {
            let error = if index == 0 {
                message
            } else {
                format!("segment {} failed: {}", index, message)
            };
            fail_job(store, job_id, &error).await
        }
        None => {
            store
                .update_job(
                    job_id,
                    &JobPatch {
                        status: Some(JobStatus::Completed),
                        step: Some(JobStep::Done),
                        ..Default::default()
                    },
                )
                .await?;

            let job = store
                .get_job(job_id)
                .await?
                .ok_or_else(|| anyhow!("job {} disappeared", job_id))?;

            store
                .append_event(
                    job_id,
                    EventLevel::Info,
                    JobStep::Done,
                    "Job completed",
                    json!({ "created_tasks": job.created_task_ids.len() }),
                )
                .await?;

            Ok(job)
        }
    }
}

/// One concurrent unit of work: resolve context, parse with retries,
/// normalize ids, persist the draft, and record progress.
#[allow(clippy::too_many_arguments)]
async fn run_segment_unit(
    store: &JobStore,
    extractor: &dyn TaskExtractor,
    job_id: &str,
    segment_index: usize,
    total_segments: usize,
    seg: &Segment,
    lines: &[String],
    global: Option<&str>,
    parse_mode: Option<&str>,
    max_attempts: u32,
    slug_max_len: usize,
    persisting_started: &AtomicBool,
) -> Result<(), String> {
    let payload = context::assemble_prompt(lines, seg, segment_index, total_segments, global);

    let mut value = parser::parse_segment(
        extractor,
        store,
        job_id,
        segment_index,
        &payload,
        parse_mode,
        max_attempts,
    )
    .await
    .map_err(|e| e.to_string())?;

    // First segment to get this far flips the job into persisting_task.
    if !persisting_started.swap(true, Ordering::SeqCst) {
        store
            .update_job(
                job_id,
                &JobPatch {
                    step: Some(JobStep::PersistingTask),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| e.to_string())?;
    }

    let report = normalize::normalize_ids(&mut value);
    for (category, source_id, occurrences) in &report.duplicates {
        tracing::warn!(
            segment = segment_index,
            category,
            source_id,
            occurrences,
            "extractor reused a source id within one category"
        );
        store
            .append_event(
                job_id,
                EventLevel::Warn,
                JobStep::PersistingTask,
                &format!(
                    "Extractor emitted id '{}' {} times in {}; issuing distinct ids",
                    source_id, occurrences, category
                ),
                json!({
                    "segment": segment_index,
                    "category": category,
                    "source_id": source_id,
                    "occurrences": occurrences,
                }),
            )
            .await
            .map_err(|e| e.to_string())?;
    }

    // Persistence failures are terminal for the segment — no retry.
    let task_id = match persist::persist_draft(store.pool(), &value, slug_max_len).await {
        Ok(id) => id,
        Err(e) => {
            let message = format!("persistence failed: {}", e);
            store
                .append_event(
                    job_id,
                    EventLevel::Error,
                    JobStep::PersistingTask,
                    &format!("Segment {} could not be persisted", segment_index),
                    json!({ "segment": segment_index, "error": message }),
                )
                .await
                .map_err(|e| e.to_string())?;
            return Err(message);
        }
    };

    store
        .record_segment_done(job_id, &task_id)
        .await
        .map_err(|e| e.to_string())?;
    store
        .append_event(
            job_id,
            EventLevel::Info,
            JobStep::PersistingTask,
            &format!("Draft created for segment {}", segment_index),
            json!({ "segment": segment_index, "task_id": task_id }),
        )
        .await
        .map_err(|e| e.to_string())?;

    Ok(())
}

/// Move the job to `failed/done`, recording the terminating error on the
/// row and in the event log. Drafts from successful segments remain.
async fn fail_job(store: &JobStore, job_id: &str, error: &str) -> Result<Job> {
    tracing::warn!(job_id, error, "job failed");

    store
        .update_job(
            job_id,
            &JobPatch {
                status: Some(JobStatus::Failed),
                step: Some(JobStep::Done),
                error: Some(error.to_string()),
                ..Default::default()
            },
        )
        .await?;
    store
        .append_event(
            job_id,
            EventLevel::Error,
            JobStep::Done,
            "Job failed",
            json!({ "error": error }),
        )
        .await?;

    store
        .get_job(job_id)
        .await?
        .ok_or_else(|| anyhow!("job {} disappeared", job_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hasher_is_stable() {
        let hasher = Sha256Hasher;
        let a = hasher.hash("Line one\n---\nLine two");
        let b = hasher.hash("Line one\n---\nLine two");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hasher.hash("different"));
    }
}
