//! Tests for the output filter's public contract.

use mimir::filter::{format_response, truncate_at_sentence};

#[test]
fn reasoning_markers_never_survive() {
    let samples = [
        "<think>hidden chain</think>visible",
        "<THINK>\nmultiline\nreasoning\n</THINK>answer",
        "orphan </think> in the middle",
        "<think>unclosed tail",
    ];
    for raw in samples {
        let out = format_response(raw);
        assert!(
            !out.to_lowercase().contains("think>"),
            "marker survived in {out:?}"
        );
    }
}

#[test]
fn filter_is_idempotent() {
    let samples = [
        "Repeat. Repeat. Repeat. Done!",
        "List: 1. alpha 2. beta 3. gamma",
        "Bullets • one - two * three",
        "   padded    with    spaces   ",
        "Mixed <think>x</think>Output. With 2.5 decimals. And CAPS Starts.",
        "",
    ];
    for raw in samples {
        let once = format_response(raw);
        assert_eq!(format_response(&once), once, "second pass changed {raw:?}");
    }
}

#[test]
fn paragraphs_and_lists_get_structure() {
    let out = format_response("Intro line. Then 1. first 2. second");
    assert!(out.contains("\n1. first"));
    assert!(out.contains("\n2. second"));
    assert!(out.contains("Intro line.\n\nThen"));
}

#[test]
fn truncation_respects_sentence_boundaries() {
    let text = format!("{}. trailing words beyond the cut", "a".repeat(95));
    let cut = truncate_at_sentence(&text, 100);
    assert_eq!(cut.chars().count(), 96);
    assert!(cut.ends_with('.'));
}

#[test]
fn truncation_falls_back_to_ellipsis() {
    let text = "word ".repeat(100);
    let cut = truncate_at_sentence(&text, 50);
    assert!(cut.ends_with("..."));
    assert!(cut.chars().count() <= 53);
}

#[test]
fn short_text_is_untouched_by_truncation() {
    assert_eq!(truncate_at_sentence("tiny", 100), "tiny");
}
