//! Context resolution and prompt payload assembly.
//!
//! For each segment, gathers the planner-flagged context blocks (lines
//! outside the segment), the job-level preamble (text preceding the first
//! segment), and any metadata lines detected inside the segment itself,
//! and renders everything into the single string sent to the extractor.
//!
//! Context blocks are deduplicated by (start, end, label, reason) and
//! rendered verbatim — the extractor must see exactly the source lines
//! the planner pointed at.

use crate::models::{ContextBlock, Segment};

/// Metadata line prefixes recognized inside segment text. Matched
/// case-insensitively at the start of a line.
const METADATA_PREFIXES: &[&str] = &[
    "therapy model:",
    "modality:",
    "skill domain:",
    "target group:",
    "language:",
];

/// Slice a 1-based inclusive line range out of the document.
pub fn slice_lines(lines: &[String], start_line: usize, end_line: usize) -> String {
    if lines.is_empty() || start_line == 0 || start_line > lines.len() {
        return String::new();
    }
    let end = end_line.min(lines.len());
    lines[start_line - 1..end].join("\n")
}

/// Text preceding the first segment's start line, used as job-level
/// background. Computed once per job by the orchestrator, not per
/// segment. Returns `None` when the first segment starts at line 1 or
/// the leading text is blank.
pub fn global_context(lines: &[String], first_segment_start: usize) -> Option<String> {
    if first_segment_start <= 1 {
        return None;
    }
    let preamble = slice_lines(lines, 1, first_segment_start - 1);
    if preamble.trim().is_empty() {
        None
    } else {
        Some(preamble)
    }
}

/// Scan segment text for recognizable metadata lines (e.g.
/// `Therapy model: CBT`). Returns the matching lines trimmed, in order.
pub fn detect_metadata(segment_text: &str) -> Vec<String> {
    segment_text
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let lower = trimmed.to_lowercase();
            METADATA_PREFIXES
                .iter()
                .any(|p| lower.starts_with(p))
                .then(|| trimmed.to_string())
        })
        .collect()
}

/// Drop repeated context blocks, keeping first occurrence order.
fn dedup_blocks(blocks: &[ContextBlock]) -> Vec<&ContextBlock> {
    let mut seen: Vec<&ContextBlock> = Vec::new();
    for block in blocks {
        if !seen.iter().any(|b| {
            b.start_line == block.start_line
                && b.end_line == block.end_line
                && b.label == block.label
                && b.reason == block.reason
        }) {
            seen.push(block);
        }
    }
    seen
}

/// Assemble the full prompt payload for one segment.
///
/// This string — not the raw segment slice — is what the segment parser
/// sends to the extractor. `segment_index` is 1-based.
pub fn assemble_prompt(
    lines: &[String],
    segment: &Segment,
    segment_index: usize,
    total_segments: usize,
    global: Option<&str>,
) -> String {
    let segment_text = slice_lines(lines, segment.start_line, segment.end_line);
    let metadata = detect_metadata(&segment_text);

    let mut out = String::new();
    out.push_str(&format!(
        "Segment {} of {} in this document.\n",
        segment_index, total_segments
    ));
    if let Some(hint) = &segment.title_hint {
        out.push_str(&format!("Title hint: {}\n", hint));
    }
    out.push('\n');
    out.push_str(&segment_text);
    out.push('\n');

    for block in dedup_blocks(&segment.context_blocks) {
        let block_text = slice_lines(lines, block.start_line, block.end_line);
        out.push_str(&format!(
            "\n--- Context: {} (lines {}-{}) ---\n",
            block.label, block.start_line, block.end_line
        ));
        out.push_str(&block_text);
        out.push('\n');
        if let Some(reason) = &block.reason {
            out.push_str(&format!("Why included: {}\n", reason));
        }
    }

    if let Some(global) = global {
        out.push_str("\n--- Document preamble ---\n");
        out.push_str(global);
        out.push('\n');
    }

    if !metadata.is_empty() {
        out.push_str("\n--- Detected metadata ---\n");
        for line in &metadata {
            out.push_str(line);
            out.push('\n');
        }
    }

    out
}
