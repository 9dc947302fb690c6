//! Segment parser with a bounded retry-correction loop.
//!
//! Sends one segment's assembled prompt payload to the extractor,
//! validates the result against the fixed task schema, and on a
//! recoverable failure appends an auto-generated corrective instruction
//! block and retries, up to `parser.max_attempts` (default 3).
//!
//! The retry state is an explicit struct ([`RetryState`]) threaded
//! through the loop rather than captured closure variables, so attempt
//! count and accumulated correction notes are always inspectable.
//!
//! Every attempt is logged to the job event log before the call is made
//! (attempt number, prompt size) and its outcome immediately after
//! (extracted counts on success, retriability flag on failure).

use serde_json::json;

use crate::llm::{ExtractError, TaskExtractor};
use crate::models::{EventLevel, JobStep, ParsedTask};
use crate::store::JobStore;

/// Mutable retry state for one segment's extraction.
#[derive(Debug, Default)]
pub struct RetryState {
    pub attempt: u32,
    pub correction_notes: Vec<String>,
}

/// Validate a raw extractor value against the fixed task schema.
///
/// Returns the typed view on success; the raw value (not the typed view)
/// is what flows on to the ID normalizer.
pub fn validate_parsed_task(value: &serde_json::Value) -> Result<ParsedTask, String> {
    let task: ParsedTask = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;

    if task.title.trim().is_empty() {
        return Err("task title must not be empty".to_string());
    }
    if task.description.trim().is_empty() {
        return Err("task description must not be empty".to_string());
    }

    for criterion in &task.criteria {
        if criterion.id.trim().is_empty() || criterion.label.trim().is_empty() {
            return Err("every criterion must have a non-empty id and label".to_string());
        }
        let has_anchors = criterion
            .rubric
            .as_object()
            .map(|o| !o.is_empty())
            .unwrap_or(false);
        if !has_anchors {
            return Err(format!(
                "criterion '{}' is missing rubric anchors",
                criterion.id
            ));
        }
    }

    for example in &task.examples {
        if example.id.trim().is_empty() || example.patient_text.trim().is_empty() {
            return Err("every example must have a non-empty id and patient_text".to_string());
        }
        if example.language.as_deref().unwrap_or("").trim().is_empty() {
            return Err(format!("example '{}' is missing language", example.id));
        }
    }

    for ie in &task.interaction_examples {
        if ie.id.trim().is_empty()
            || ie.title.trim().is_empty()
            || ie.patient_text.trim().is_empty()
            || ie.therapist_text.trim().is_empty()
        {
            return Err(format!(
                "interaction example '{}' is missing required fields",
                ie.id
            ));
        }
        if ie.language.as_deref().unwrap_or("").trim().is_empty() {
            return Err(format!(
                "interaction example '{}' is missing language",
                ie.id
            ));
        }
    }

    Ok(task)
}

/// Derive corrective instructions from a classified failure by matching
/// its message against known failure categories.
pub fn correction_notes_for(err: &ExtractError) -> Vec<String> {
    let mut notes = Vec::new();
    let msg = err.to_string();
    let lower = msg.to_lowercase();

    match err {
        ExtractError::InvalidJson(_) => {
            notes.push(
                "Your previous output was not valid JSON. Respond with exactly one JSON object \
                 and no surrounding prose or code fences."
                    .to_string(),
            );
        }
        ExtractError::EmptyOutput => {
            notes.push(
                "Your previous response was empty. Return the full task as one JSON object."
                    .to_string(),
            );
        }
        ExtractError::SchemaValidation(_) => {
            if lower.contains("interaction example") {
                notes.push(
                    "Every interaction example must include id, title, patient_text, \
                     therapist_text, and a language code."
                        .to_string(),
                );
            } else if lower.contains("language") {
                notes.push(
                    "Every entry in examples must include a `language` field with a short \
                     language code such as \"en\"."
                        .to_string(),
                );
            } else if lower.contains("rubric") {
                notes.push(
                    "Every criterion must include a `rubric` object with at least one score \
                     anchor describing what each level looks like."
                        .to_string(),
                );
            }
            notes.push(format!("The previous attempt was rejected: {}.", msg));
        }
        ExtractError::Fatal(_) => {}
    }

    notes
}

fn render_prompt(payload: &str, correction_notes: &[String]) -> String {
    if correction_notes.is_empty() {
        return payload.to_string();
    }

    let mut out = payload.to_string();
    out.push_str("\n--- Corrections from previous attempts ---\n");
    for note in correction_notes {
        out.push_str("- ");
        out.push_str(note);
        out.push('\n');
    }
    out
}

/// Run the bounded extract-validate-correct loop for one segment.
///
/// Returns the validated raw JSON value. Non-retriable errors and
/// exhausted attempts propagate as the segment's terminal failure.
pub async fn parse_segment(
    extractor: &dyn TaskExtractor,
    store: &JobStore,
    job_id: &str,
    segment_index: usize,
    payload: &str,
    parse_mode: Option<&str>,
    max_attempts: u32,
) -> Result<serde_json::Value, ExtractError> {
    let mut state = RetryState::default();

    loop {
        state.attempt += 1;
        let prompt = render_prompt(payload, &state.correction_notes);

        store
            .append_event(
                job_id,
                EventLevel::Info,
                JobStep::ParsingSegment,
                &format!(
                    "Extraction attempt {} for segment {}",
                    state.attempt, segment_index
                ),
                json!({
                    "segment": segment_index,
                    "attempt": state.attempt,
                    "prompt_chars": prompt.len(),
                }),
            )
            .await
            .map_err(ExtractError::Fatal)?;

        let outcome = match extractor.extract(&prompt, parse_mode).await {
            Ok(value) => validate_parsed_task(&value)
                .map(|task| (value, task))
                .map_err(ExtractError::SchemaValidation),
            Err(err) => Err(err),
        };

        match outcome {
            Ok((value, task)) => {
                store
                    .append_event(
                        job_id,
                        EventLevel::Info,
                        JobStep::ParsingSegment,
                        &format!("Segment {} extracted successfully", segment_index),
                        json!({
                            "segment": segment_index,
                            "attempt": state.attempt,
                            "criteria": task.criteria.len(),
                            "examples": task.examples.len(),
                            "interaction_examples": task.interaction_examples.len(),
                        }),
                    )
                    .await
                    .map_err(ExtractError::Fatal)?;
                return Ok(value);
            }
            Err(err) => {
                let will_retry = err.is_retriable() && state.attempt < max_attempts;

                if will_retry {
                    tracing::warn!(
                        segment = segment_index,
                        attempt = state.attempt,
                        error = %err,
                        "retrying extraction with corrections"
                    );
                    store
                        .append_event(
                            job_id,
                            EventLevel::Warn,
                            JobStep::ParsingSegment,
                            &format!(
                                "Attempt {} for segment {} failed; retrying with corrections",
                                state.attempt, segment_index
                            ),
                            json!({
                                "segment": segment_index,
                                "attempt": state.attempt,
                                "retriable": true,
                                "error": err.to_string(),
                            }),
                        )
                        .await
                        .map_err(ExtractError::Fatal)?;
                    state.correction_notes.extend(correction_notes_for(&err));
                    continue;
                }

                store
                    .append_event(
                        job_id,
                        EventLevel::Error,
                        JobStep::ParsingSegment,
                        &format!(
                            "Segment {} failed after {} attempt(s)",
                            segment_index, state.attempt
                        ),
                        json!({
                            "segment": segment_index,
                            "attempt": state.attempt,
                            "retriable": err.is_retriable(),
                            "error": err.to_string(),
                        }),
                    )
                    .await
                    .map_err(ExtractError::Fatal)?;
                return Err(err);
            }
        }
    }
}
