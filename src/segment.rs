//! Document segmentation.
//!
//! Turns raw document text into a line-addressable form, asks the
//! external planner for candidate segments, and falls back to a
//! heuristic numbered-heading scan when the planner sees only one task.
//!
//! # Algorithm
//!
//! 1. Split the document into lines and render a `L0001: …` numbered view.
//! 2. Call the planner once over the numbered view.
//! 3. Validate the plan (1-based ranges, `end_line ≥ start_line`).
//! 4. If the plan has ≤ 1 segment, scan for ≥ 2 numbered heading lines
//!    (`"<n>) "` / `"<n>. "`) and, if found, synthesize one segment per
//!    heading span, discarding the planner's single segment.
//! 5. Clamp every segment to `[1, total_lines]` and sort by `start_line`.
//! 6. If the plan was empty, synthesize one segment spanning the whole
//!    document.
//!
//! Planner confidence/reason fields are diagnostic only and never drive
//! control flow.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::llm::SegmentPlanner;
use crate::models::{ContextBlock, Segment};

/// Wire schema of the planner response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentPlan {
    #[serde(default)]
    pub tasks: Vec<PlannedSegment>,
}

/// One candidate segment in a [`SegmentPlan`]. Line ranges are 1-based
/// and inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSegment {
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default)]
    pub title_hint: Option<String>,
    /// Diagnostic only.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Diagnostic only.
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub context_blocks: Vec<PlannedContextBlock>,
}

/// A planner-flagged background line range outside the segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedContextBlock {
    pub start_line: usize,
    pub end_line: usize,
    pub label: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// The document split into addressable lines plus its resolved segments.
#[derive(Debug, Clone)]
pub struct SegmentedDocument {
    pub lines: Vec<String>,
    pub segments: Vec<Segment>,
}

/// Render the `L0001: …` numbered view sent to the planner.
pub fn number_lines(lines: &[String]) -> String {
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        out.push_str(&format!("L{:04}: {}\n", i + 1, line));
    }
    out
}

/// Split raw text into lines (the unit of addressing for the pipeline).
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(|l| l.to_string()).collect()
}

/// Run segmentation end to end: plan, validate, apply the heading
/// fallback, clamp, and sort.
///
/// A planner failure (unreachable, invalid plan schema) propagates as a
/// fatal error — the caller fails the whole job without attempting any
/// segment.
pub async fn plan_segments(planner: &dyn SegmentPlanner, text: &str) -> Result<SegmentedDocument> {
    let lines = split_lines(text);
    let numbered = number_lines(&lines);

    let plan = planner.plan(&numbered).await?;
    validate_plan(&plan)?;

    let segments = resolve_segments(&plan, &lines);
    Ok(SegmentedDocument { lines, segments })
}

/// Reject plans with malformed line ranges before any clamping.
pub fn validate_plan(plan: &SegmentPlan) -> Result<()> {
    for (i, seg) in plan.tasks.iter().enumerate() {
        if seg.start_line == 0 {
            bail!("plan segment {} has 0 start_line (ranges are 1-based)", i);
        }
        if seg.end_line < seg.start_line {
            bail!(
                "plan segment {} has end_line {} < start_line {}",
                i,
                seg.end_line,
                seg.start_line
            );
        }
        for (j, block) in seg.context_blocks.iter().enumerate() {
            if block.start_line == 0 || block.end_line < block.start_line {
                bail!("plan segment {} context block {} has an invalid range", i, j);
            }
        }
    }
    Ok(())
}

/// Turn a validated plan into clamped, ordered segments, applying the
/// heuristic heading fallback and the whole-document fallback.
pub fn resolve_segments(plan: &SegmentPlan, lines: &[String]) -> Vec<Segment> {
    let total = lines.len().max(1);

    let mut segments: Vec<Segment> = if plan.tasks.len() <= 1 {
        // The planner saw at most one task; a document with several
        // numbered headings overrides that single segment.
        let headings = detect_numbered_headings(lines);
        if headings.len() >= 2 {
            segments_from_headings(&headings, lines)
        } else {
            plan.tasks.iter().map(|s| planned_to_segment(s, total)).collect()
        }
    } else {
        plan.tasks.iter().map(|s| planned_to_segment(s, total)).collect()
    };

    if segments.is_empty() {
        segments.push(Segment {
            start_line: 1,
            end_line: total,
            title_hint: None,
            context_blocks: Vec::new(),
        });
    }

    segments.sort_by_key(|s| s.start_line);
    segments
}

fn planned_to_segment(planned: &PlannedSegment, total: usize) -> Segment {
    Segment {
        start_line: clamp_line(planned.start_line, total),
        end_line: clamp_line(planned.end_line, total),
        title_hint: planned.title_hint.clone(),
        context_blocks: planned
            .context_blocks
            .iter()
            .map(|b| ContextBlock {
                start_line: clamp_line(b.start_line, total),
                end_line: clamp_line(b.end_line, total),
                label: b.label.clone(),
                reason: b.reason.clone(),
            })
            .collect(),
    }
}

fn clamp_line(line: usize, total: usize) -> usize {
    line.clamp(1, total)
}

/// Scan for lines that open a numbered heading: `"<n>) "` or `"<n>. "`.
///
/// Returns the 1-based line numbers of every heading found, with the
/// heading text (minus the number prefix) as a title hint.
pub fn detect_numbered_headings(lines: &[String]) -> Vec<(usize, String)> {
    let mut headings = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }

        let rest = &trimmed[digits.len()..];
        if let Some(title) = rest.strip_prefix(") ").or_else(|| rest.strip_prefix(". ")) {
            if !title.trim().is_empty() {
                headings.push((i + 1, title.trim().to_string()));
            }
        }
    }

    headings
}

/// Synthesize one segment per heading span: each segment starts at its
/// heading line and ends just before the next heading (the last one runs
/// to the end of the document).
fn segments_from_headings(headings: &[(usize, String)], lines: &[String]) -> Vec<Segment> {
    let total = lines.len().max(1);
    headings
        .iter()
        .enumerate()
        .map(|(i, (line, title))| {
            let end = headings
                .get(i + 1)
                .map(|(next, _)| next.saturating_sub(1))
                .unwrap_or(total);
            Segment {
                start_line: *line,
                end_line: end.max(*line),
                title_hint: Some(title.clone()),
                context_blocks: Vec::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        split_lines(text)
    }

    #[test]
    fn test_number_lines_format() {
        let numbered = number_lines(&lines("alpha\nbeta"));
        assert_eq!(numbered, "L0001: alpha\nL0002: beta\n");
    }

    #[test]
    fn test_validate_rejects_zero_start() {
        let plan = SegmentPlan {
            tasks: vec![PlannedSegment {
                start_line: 0,
                end_line: 3,
                title_hint: None,
                confidence: None,
                reason: None,
                context_blocks: vec![],
            }],
        };
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let plan = SegmentPlan {
            tasks: vec![PlannedSegment {
                start_line: 5,
                end_line: 3,
                title_hint: None,
                confidence: None,
                reason: None,
                context_blocks: vec![],
            }],
        };
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn test_empty_plan_spans_whole_document() {
        let plan = SegmentPlan { tasks: vec![] };
        let doc = lines("one\ntwo\nthree");
        let segments = resolve_segments(&plan, &doc);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_line, 1);
        assert_eq!(segments[0].end_line, 3);
    }

    #[test]
    fn test_clamping_to_document_bounds() {
        let plan = SegmentPlan {
            tasks: vec![
                PlannedSegment {
                    start_line: 1,
                    end_line: 99,
                    title_hint: None,
                    confidence: None,
                    reason: None,
                    context_blocks: vec![],
                },
                PlannedSegment {
                    start_line: 2,
                    end_line: 3,
                    title_hint: None,
                    confidence: None,
                    reason: None,
                    context_blocks: vec![],
                },
            ],
        };
        let doc = lines("one\ntwo\nthree");
        let segments = resolve_segments(&plan, &doc);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].end_line, 3);
    }

    #[test]
    fn test_segments_sorted_by_start_line() {
        let plan = SegmentPlan {
            tasks: vec![
                PlannedSegment {
                    start_line: 4,
                    end_line: 6,
                    title_hint: None,
                    confidence: None,
                    reason: None,
                    context_blocks: vec![],
                },
                PlannedSegment {
                    start_line: 1,
                    end_line: 3,
                    title_hint: None,
                    confidence: None,
                    reason: None,
                    context_blocks: vec![],
                },
            ],
        };
        let doc = lines("a\nb\nc\nd\ne\nf");
        let segments = resolve_segments(&plan, &doc);
        assert_eq!(segments[0].start_line, 1);
        assert_eq!(segments[1].start_line, 4);
    }

    #[test]
    fn test_detect_numbered_headings() {
        let doc = lines("intro\n1) First skill\ndetail\n2. Second skill\ndetail");
        let headings = detect_numbered_headings(&doc);
        assert_eq!(headings.len(), 2);
        assert_eq!(headings[0], (2, "First skill".to_string()));
        assert_eq!(headings[1], (4, "Second skill".to_string()));
    }

    #[test]
    fn test_heading_fallback_overrides_single_segment() {
        let doc = lines("1) First skill\nbody one\n2) Second skill\nbody two");
        let plan = SegmentPlan {
            tasks: vec![PlannedSegment {
                start_line: 1,
                end_line: 4,
                title_hint: Some("whole".into()),
                confidence: Some(0.4),
                reason: None,
                context_blocks: vec![],
            }],
        };
        let segments = resolve_segments(&plan, &doc);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start_line, 1);
        assert_eq!(segments[0].end_line, 2);
        assert_eq!(segments[1].start_line, 3);
        assert_eq!(segments[1].end_line, 4);
        assert_eq!(segments[0].title_hint.as_deref(), Some("First skill"));
    }

    #[test]
    fn test_single_heading_keeps_planner_segment() {
        let doc = lines("1) Only skill\nbody");
        let plan = SegmentPlan {
            tasks: vec![PlannedSegment {
                start_line: 1,
                end_line: 2,
                title_hint: Some("Only skill".into()),
                confidence: None,
                reason: None,
                context_blocks: vec![],
            }],
        };
        let segments = resolve_segments(&plan, &doc);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].title_hint.as_deref(), Some("Only skill"));
    }

    #[test]
    fn test_multi_segment_plan_skips_heuristic() {
        // Two planner segments win even if headings disagree.
        let doc = lines("1) A\nx\n2) B\ny\n3) C\nz");
        let plan = SegmentPlan {
            tasks: vec![
                PlannedSegment {
                    start_line: 1,
                    end_line: 4,
                    title_hint: None,
                    confidence: None,
                    reason: None,
                    context_blocks: vec![],
                },
                PlannedSegment {
                    start_line: 5,
                    end_line: 6,
                    title_hint: None,
                    confidence: None,
                    reason: None,
                    context_blocks: vec![],
                },
            ],
        };
        let segments = resolve_segments(&plan, &doc);
        assert_eq!(segments.len(), 2);
    }
}
