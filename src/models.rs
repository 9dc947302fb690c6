//! Core data models used throughout task-mill.
//!
//! These types represent the jobs, events, segments, and parsed tasks that
//! flow through the batch parse pipeline.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a parse job.
///
/// Transitions are monotonic: `Queued → Running → {Completed | Failed |
/// Canceled}`. A job never moves back to an earlier status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "canceled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    /// Whether the job has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

/// Pipeline step a job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    CreatedJob,
    PlanningSegments,
    ParsingSegment,
    PersistingTask,
    Done,
}

impl JobStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStep::CreatedJob => "created_job",
            JobStep::PlanningSegments => "planning_segments",
            JobStep::ParsingSegment => "parsing_segment",
            JobStep::PersistingTask => "persisting_task",
            JobStep::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created_job" => Some(JobStep::CreatedJob),
            "planning_segments" => Some(JobStep::PlanningSegments),
            "parsing_segment" => Some(JobStep::ParsingSegment),
            "persisting_task" => Some(JobStep::PersistingTask),
            "done" => Some(JobStep::Done),
            _ => None,
        }
    }
}

/// Severity of a [`JobEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(EventLevel::Info),
            "warn" => Some(EventLevel::Warn),
            "error" => Some(EventLevel::Error),
            _ => None,
        }
    }
}

/// A parse job row — one per submitted document.
///
/// Mutated only by the orchestrator; never deleted by this subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub step: JobStep,
    /// Set once planning completes; `completed_segments` never exceeds it.
    pub total_segments: Option<i64>,
    pub completed_segments: i64,
    /// Ordered list of draft task ids, grows as segments persist.
    pub created_task_ids: Vec<String>,
    /// Terminal failure message, if the job failed.
    pub error: Option<String>,
    /// Content fingerprint of the submitted text (dedup/audit).
    pub source_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Append-only log entry for a job.
///
/// The auto-incrementing `id` is the polling cursor: consumers fetch
/// events with `id > after_event_id` and remember the last id seen.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: String,
    pub ts: i64,
    pub level: EventLevel,
    pub step: JobStep,
    pub message: String,
    /// Free-form diagnostic payload; key set documented per step in
    /// [`crate::store`].
    pub meta: serde_json::Value,
}

/// A contiguous 1-based inclusive line range believed to contain exactly
/// one task definition. Ephemeral — never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start_line: usize,
    pub end_line: usize,
    pub title_hint: Option<String>,
    pub context_blocks: Vec<ContextBlock>,
}

/// A line range outside a segment that the planner flagged as background
/// needed to interpret that segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    pub start_line: usize,
    pub end_line: usize,
    pub label: String,
    pub reason: Option<String>,
}

/// Task extracted by the external model, validated against the fixed
/// schema before normalization and persistence.
///
/// The pipeline carries the raw `serde_json::Value` alongside this typed
/// view so the ID normalizer can rewrite arbitrary `*_id` reference
/// fields; this struct is what the persister ultimately reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedTask {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub skill_domain: Option<String>,
    #[serde(default)]
    pub base_difficulty: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub criteria: Vec<ParsedCriterion>,
    #[serde(default)]
    pub examples: Vec<ParsedExample>,
    #[serde(default)]
    pub interaction_examples: Vec<ParsedInteractionExample>,
}

/// A scoring criterion inside a [`ParsedTask`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedCriterion {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Rubric anchors keyed by score level. Must be a non-empty object.
    #[serde(default)]
    pub rubric: serde_json::Value,
}

/// A standalone patient-text example inside a [`ParsedTask`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedExample {
    pub id: String,
    pub patient_text: String,
    #[serde(default)]
    pub difficulty: Option<i64>,
    #[serde(default)]
    pub severity_label: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// A patient/therapist exchange example inside a [`ParsedTask`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedInteractionExample {
    pub id: String,
    pub title: String,
    pub patient_text: String,
    pub therapist_text: String,
    #[serde(default)]
    pub difficulty: Option<i64>,
    #[serde(default)]
    pub language: Option<String>,
}
