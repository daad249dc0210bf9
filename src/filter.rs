//! Stateless cleanup of raw model output.
//!
//! [`format_response`] is a pure text transform applied to every
//! generated (and cached) response before the output screens: reasoning
//! markers are stripped, consecutive duplicate sentences dropped,
//! paragraph structure restored, and whitespace normalized. Applying it
//! twice yields the same text as applying it once — the engine relies
//! on that to treat cached sanitized responses as fixed points.

use std::sync::LazyLock;

use regex::Regex;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("static regex"));
static THINK_ORPHAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?think>").expect("static regex"));
static SENTENCE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.!?])\s+([A-Z])").expect("static regex"));
// Anchored on start-of-text or a non-newline so items already at line
// start are left alone and the transform stays idempotent.
static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^\n])(\d+\.)\s+").expect("static regex"));
static BULLET_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^\n])([•\-*])\s+").expect("static regex"));
static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").expect("static regex"));
static BREAK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Clean a raw model response for presentation.
///
/// In order: strip `<think>…</think>` blocks (across line breaks,
/// case-insensitive) and orphan markers, drop consecutive duplicate
/// sentences, break paragraphs before capitalized sentence starts /
/// numbered items / bullets, collapse whitespace runs, trim.
pub fn format_response(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let text = THINK_BLOCK.replace_all(raw, "");
    let text = THINK_ORPHAN.replace_all(&text, "");
    let text = dedupe_sentences(&text);
    let text = SENTENCE_START.replace_all(&text, "${1}\n\n${2}");
    let text = NUMBERED_ITEM.replace_all(&text, "${1}\n${2} ");
    let text = BULLET_ITEM.replace_all(&text, "${1}\n${2} ");
    let text = SPACE_RUN.replace_all(&text, " ");
    let text = BREAK_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Drop sentences identical (case-insensitively) to their predecessor.
fn dedupe_sentences(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut previous_key = String::new();
    for sentence in text.split(". ") {
        let trimmed = sentence.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key = trimmed.to_lowercase();
        if key != previous_key {
            kept.push(trimmed);
            previous_key = key;
        }
    }
    kept.join(". ")
}

/// Truncate to at most `max_chars` characters.
///
/// Prefers the last sentence boundary, but only when that keeps at
/// least 80% of the requested length; otherwise hard-cuts and appends
/// an ellipsis.
pub fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    if let Some(pos) = truncated.rfind('.') {
        let kept_chars = truncated[..=pos].chars().count();
        if kept_chars as f64 >= max_chars as f64 * 0.8 {
            return truncated[..=pos].to_string();
        }
    }
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_blocks_across_lines() {
        let raw = "<think>step one\nstep two</think>The answer is 4.";
        assert_eq!(format_response(raw), "The answer is 4.");
    }

    #[test]
    fn strips_orphan_markers_case_insensitive() {
        let raw = "</THINK>Sure. <Think>half";
        let out = format_response(raw);
        assert!(!out.to_lowercase().contains("think>"));
    }

    #[test]
    fn dedupes_consecutive_sentences_only() {
        let raw = "Cats purr. cats purr. Dogs bark. Cats purr. End";
        let out = format_response(raw);
        assert_eq!(out.matches("Dogs bark").count(), 1);
        // Non-consecutive repeat survives.
        assert_eq!(out.to_lowercase().matches("cats purr").count(), 2);
    }

    #[test]
    fn breaks_paragraphs_at_sentence_starts() {
        let out = format_response("First point. Second point.");
        assert_eq!(out, "First point.\n\nSecond point.");
    }

    #[test]
    fn breaks_numbered_lists() {
        let out = format_response("Steps: 1. mix 2. bake");
        assert!(out.contains("\n1. mix"));
        assert!(out.contains("\n2. bake"));
    }

    #[test]
    fn collapses_whitespace_runs() {
        let out = format_response("a    b\n\n\n\n\nc");
        assert_eq!(out, "a b\n\nc");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(format_response(""), "");
        assert_eq!(format_response("<think>only</think>"), "");
    }

    #[test]
    fn idempotent_on_varied_inputs() {
        let samples = [
            "Hello. Hello. World! 1. one 2. two",
            "<think>x</think>A sentence. Another one.",
            "* * text - dashed • bullet",
            "plain",
            "Numbers 2.5 are not list items.",
        ];
        for raw in samples {
            let once = format_response(raw);
            let twice = format_response(&once);
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_at_sentence("short.", 100), "short.");
    }

    #[test]
    fn truncate_prefers_sentence_boundary() {
        // Boundary at 90% of the requested length.
        let text = format!("{}. tail that overflows the limit", "a".repeat(89));
        let out = truncate_at_sentence(&text, 100);
        assert!(out.ends_with('.'));
        assert_eq!(out.chars().count(), 90);
    }

    #[test]
    fn truncate_hard_cuts_with_ellipsis() {
        // Only boundary is early, below the 80% threshold.
        let text = format!("ab. {}", "x".repeat(200));
        let out = truncate_at_sentence(&text, 100);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 103);
    }
}
