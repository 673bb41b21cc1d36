//! Segment and turn synthesis from accumulated response text.
//!
//! Everything here is a pure function of its arguments. The controller
//! re-runs [`synthesize_turns`] over the whole accumulated text on every
//! update rather than diffing, so the output depends only on
//! `(text, is_streaming, instruction)`. A fence left open at stream end
//! becomes complete on the next recomputation.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::turn::{ChatSegment, FENCE, SegmentKind, ToolStatus, Turn};

/// A closed fence, or an open fence running to the end of the text.
static FENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?```|```.*$").expect("fence split pattern"));
static TOOL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Tool call:\s*`?([\w.-]+)").expect("tool name pattern"));
static TOOL_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Tool status:\s*(succeeded|failed)").expect("tool status pattern")
});

/// Splits `text` into prose and fenced tool segments, in order.
///
/// Whitespace-only prose is dropped. When `is_streaming` is false every
/// segment is complete, including a fence that never closed; its status
/// stays `Running`.
pub fn parse_segments(text: &str, is_streaming: bool) -> Vec<ChatSegment> {
    split_on_fences(text)
        .into_iter()
        .filter_map(|part| {
            if part.starts_with(FENCE) {
                Some(classify_tool_block(part, is_streaming))
            } else if part.trim().is_empty() {
                None
            } else {
                Some(ChatSegment::text(part, !is_streaming))
            }
        })
        .collect()
}

/// Maps segments to turns one-to-one, preserving order.
pub fn segments_to_turns(segments: Vec<ChatSegment>) -> Vec<Turn> {
    segments.into_iter().map(Turn::from).collect()
}

/// Builds the full turn list for a stream: the instruction echo first (when
/// known), then one turn per segment of `text`.
pub fn synthesize_turns(
    text: &str,
    is_streaming: bool,
    instruction: Option<&Turn>,
) -> Vec<Turn> {
    let segments = parse_segments(text, is_streaming);
    let mut turns = Vec::with_capacity(segments.len() + 1);
    if let Some(instruction) = instruction {
        turns.push(instruction.clone());
    }
    turns.extend(segments_to_turns(segments));
    turns
}

fn split_on_fences(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for found in FENCE_SPLIT.find_iter(text) {
        parts.push(&text[last..found.start()]);
        parts.push(found.as_str());
        last = found.end();
    }
    parts.push(&text[last..]);
    parts
}

fn classify_tool_block(block: &str, is_streaming: bool) -> ChatSegment {
    let is_closed = block.len() > FENCE.len() && block.ends_with(FENCE);
    let name = TOOL_NAME
        .captures(block)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let explicit = TOOL_STATUS
        .captures(block)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            if m.as_str().eq_ignore_ascii_case("failed") {
                ToolStatus::Failed
            } else {
                ToolStatus::Succeeded
            }
        });

    // Closed call blocks and plain closed blocks both resolve to `Completed`.
    let status = match (is_closed, explicit) {
        (true, Some(explicit)) => explicit,
        (true, None) => ToolStatus::Completed,
        (false, _) => ToolStatus::Running,
    };

    ChatSegment {
        kind: SegmentKind::Tool,
        content: block.to_string(),
        name,
        status: Some(status),
        is_complete: !is_streaming || is_closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn closed_tool_fence_with_explicit_status() {
        let segments = parse_segments(
            "```Tool call: search\nTool status: succeeded\n```",
            false,
        );
        assert_eq!(segments.len(), 1);
        let segment = &segments[0];
        assert_eq!(segment.kind, SegmentKind::Tool);
        assert_eq!(segment.status, Some(ToolStatus::Succeeded));
        assert_eq!(segment.name.as_deref(), Some("search"));
        assert!(segment.is_complete);
    }

    #[test]
    fn unterminated_fence_stays_running_after_stream_end() {
        let streaming = parse_segments("```Tool call: search", true);
        assert_eq!(streaming.len(), 1);
        assert_eq!(streaming[0].status, Some(ToolStatus::Running));
        assert!(!streaming[0].is_complete);

        let finished = parse_segments("```Tool call: search", false);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status, Some(ToolStatus::Running));
        assert!(finished[0].is_complete);
    }

    #[test]
    fn explicit_status_is_ignored_until_fence_closes() {
        let segments = parse_segments("```\nTool call: `rm`\nTool status: FAILED\n", true);
        assert_eq!(segments[0].status, Some(ToolStatus::Running));
        assert_eq!(segments[0].name.as_deref(), Some("rm"));

        let segments = parse_segments("```\nTool call: `rm`\nTool status: FAILED\n```", true);
        assert_eq!(segments[0].status, Some(ToolStatus::Failed));
        assert!(segments[0].is_complete);
    }

    #[test]
    fn whitespace_between_fences_is_dropped() {
        let segments = parse_segments("```Tool call: a\n```\n   \n\t```Tool call: b\n```", false);
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(ChatSegment::is_tool));
        assert_eq!(segments[0].name.as_deref(), Some("a"));
        assert_eq!(segments[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn prose_around_fences_is_preserved_in_order() {
        let text = "Let me look.\n```\nTool call: `ls`\n```\nFound 3 files.";
        let segments = parse_segments(text, true);
        let kinds: Vec<_> = segments.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![SegmentKind::Text, SegmentKind::Tool, SegmentKind::Text]
        );
        assert_eq!(segments[0].content, "Let me look.\n");
        assert_eq!(segments[1].status, Some(ToolStatus::Completed));
        assert_eq!(segments[2].content, "\nFound 3 files.");
        assert!(!segments[0].is_complete);
        assert!(segments[1].is_complete);
    }

    #[test]
    fn fence_at_end_of_text_is_a_running_block() {
        let segments = parse_segments("Working on it\n```", true);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].content, FENCE);
        assert_eq!(segments[1].status, Some(ToolStatus::Running));
        assert_eq!(segments[1].name, None);
    }

    #[test]
    fn plain_closed_block_without_call_is_completed() {
        let segments = parse_segments("```rust\nfn main() {}\n```", false);
        assert_eq!(segments[0].status, Some(ToolStatus::Completed));
        assert_eq!(segments[0].name, None);
    }

    #[test]
    fn empty_text_yields_no_segments() {
        assert!(parse_segments("", true).is_empty());
        assert!(parse_segments(" \n ", false).is_empty());
    }

    #[test]
    fn instruction_turn_is_always_first() {
        let instruction = Turn::instruction("list files", Utc::now());
        let turns = synthesize_turns("```Tool call: ls\n```done", false, Some(&instruction));
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0], instruction);
        assert!(matches!(turns[1], Turn::Tool { .. }));
        assert_eq!(
            turns[2],
            Turn::Model {
                content: "done".into(),
                is_complete: true
            }
        );
    }

    #[test]
    fn recomputation_is_deterministic() {
        let text = "a```Tool call: x\nTool status: succeeded```b```open";
        assert_eq!(parse_segments(text, true), parse_segments(text, true));
    }
}
