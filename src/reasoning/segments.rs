//! Heuristic split of generated text into a reasoning part and an answer part.
//!
//! The cascade is deliberately literal: an answer that itself contains one of
//! the markers before the intended split point will be mis-split.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

/// Tier-2 markers, highest priority first. Matching is case-sensitive.
pub const ANSWER_MARKERS: [&str; 10] = [
    "Final Answer:",
    "Final Response:",
    "My answer:",
    "My response:",
    "Answer:",
    "Response:",
    "In conclusion:",
    "To summarize:",
    "---",
    "###",
];

const PARAGRAPH_BREAK: &str = "\n\n";

static THINKING_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^#+[ \t]*thinking process").expect("thinking heading pattern is valid")
});

static ANY_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^#+\s").expect("heading pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitTier {
    ThinkingHeading,
    Marker,
    Paragraphs,
    Whole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segments {
    pub reasoning: String,
    pub answer: String,
    pub tier: SplitTier,
}

/// Byte ranges of the two segments inside the analysed text, before trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Located {
    pub reasoning: Range<usize>,
    pub answer: Range<usize>,
    pub tier: SplitTier,
}

impl Located {
    pub(crate) fn segments(&self, text: &str) -> Segments {
        let reasoning = &text[self.reasoning.clone()];
        let answer = &text[self.answer.clone()];
        match self.tier {
            SplitTier::ThinkingHeading | SplitTier::Marker =>
                Segments {
                    reasoning: reasoning.trim().to_string(),
                    answer: answer.trim().to_string(),
                    tier: self.tier,
                },
            SplitTier::Paragraphs | SplitTier::Whole =>
                Segments {
                    reasoning: reasoning.to_string(),
                    answer: answer.to_string(),
                    tier: self.tier,
                },
        }
    }
}

fn by_thinking_heading(text: &str) -> Option<Located> {
    let heading = THINKING_HEADING.find(text)?;
    let body_start = text[heading.end()..]
        .find('\n')
        .map(|pos| heading.end() + pos + 1)
        .unwrap_or(text.len());
    let next_heading = ANY_HEADING.find(&text[body_start..])
        .map(|m| body_start + m.start())
        .unwrap_or(text.len());
    Some(Located {
        reasoning: body_start..next_heading,
        answer: next_heading..text.len(),
        tier: SplitTier::ThinkingHeading,
    })
}

/// First marker in priority order that occurs anywhere in `text`, with its
/// byte offset.
pub fn find_marker(text: &str) -> Option<(usize, &'static str)> {
    ANSWER_MARKERS.iter().find_map(|marker| text.find(marker).map(|idx| (idx, *marker)))
}

fn by_marker(text: &str) -> Option<Located> {
    let (idx, marker) = find_marker(text)?;
    Some(Located {
        reasoning: 0..idx,
        answer: idx + marker.len()..text.len(),
        tier: SplitTier::Marker,
    })
}

fn by_paragraphs(text: &str) -> Option<Located> {
    let breaks: Vec<usize> = text
        .match_indices(PARAGRAPH_BREAK)
        .map(|(idx, _)| idx)
        .collect();
    let paragraphs = breaks.len() + 1;
    if paragraphs < 2 {
        return None;
    }
    let split_at = breaks[paragraphs / 2 - 1];
    Some(Located {
        reasoning: 0..split_at,
        answer: split_at + PARAGRAPH_BREAK.len()..text.len(),
        tier: SplitTier::Paragraphs,
    })
}

pub(crate) fn locate(text: &str) -> Located {
    by_thinking_heading(text)
        .or_else(|| by_marker(text))
        .or_else(|| by_paragraphs(text))
        .unwrap_or(Located {
            reasoning: 0..0,
            answer: 0..text.len(),
            tier: SplitTier::Whole,
        })
}

/// Runs the full cascade once over `text`.
pub fn split_reasoning(text: &str) -> Segments {
    locate(text).segments(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_heading_takes_priority_over_markers() {
        let text = "## Thinking Process\nAnswer: is not here yet.\n## Result\nBuy.";
        let seg = split_reasoning(text);
        assert_eq!(seg.tier, SplitTier::ThinkingHeading);
        assert_eq!(seg.reasoning, "Answer: is not here yet.");
        assert_eq!(seg.answer, "## Result\nBuy.");
    }

    #[test]
    fn thinking_heading_is_case_insensitive_and_runs_to_end_without_next_heading() {
        let seg = split_reasoning("# THINKING PROCESS:\nweigh the risks\nthen decide");
        assert_eq!(seg.tier, SplitTier::ThinkingHeading);
        assert_eq!(seg.reasoning, "weigh the risks\nthen decide");
        assert_eq!(seg.answer, "");
    }

    #[test]
    fn thinking_phrase_outside_a_heading_is_ignored() {
        let seg = split_reasoning("My Thinking Process was short. Answer: Sell.");
        assert_eq!(seg.tier, SplitTier::Marker);
        assert_eq!(seg.answer, "Sell.");
    }

    #[test]
    fn answer_marker_splits_at_its_index() {
        let text = "Revenue grew, margins held.Answer:Buy the dip.";
        let k = text.find("Answer:").unwrap();
        let seg = split_reasoning(text);
        assert_eq!(seg.reasoning, &text[..k]);
        assert_eq!(seg.answer, &text[k + "Answer:".len()..]);
    }

    #[test]
    fn marker_priority_beats_position() {
        let seg = split_reasoning("Response: early. Then Final Answer: late.");
        assert_eq!(seg.reasoning, "Response: early. Then");
        assert_eq!(seg.answer, "late.");
    }

    #[test]
    fn final_answer_is_preferred_over_its_answer_suffix() {
        let seg = split_reasoning("Thinking about it...\n\nFinal Answer: Buy.");
        assert_eq!(seg.reasoning, "Thinking about it...");
        assert_eq!(seg.answer, "Buy.");
    }

    #[test]
    fn markers_are_case_sensitive() {
        let seg = split_reasoning("final answer: maybe");
        assert_eq!(seg.tier, SplitTier::Whole);
        assert_eq!(seg.answer, "final answer: maybe");
    }

    #[test]
    fn horizontal_rule_is_a_marker() {
        let seg = split_reasoning("notes\n---\nverdict");
        assert_eq!(seg.tier, SplitTier::Marker);
        assert_eq!((seg.reasoning.as_str(), seg.answer.as_str()), ("notes", "verdict"));
    }

    #[test]
    fn paragraphs_split_in_half_and_rejoin_exactly() {
        for n in 2..=7 {
            let paragraphs: Vec<String> = (0..n).map(|i| format!("paragraph {}", i)).collect();
            let text = paragraphs.join("\n\n");
            let seg = split_reasoning(&text);
            assert_eq!(seg.tier, SplitTier::Paragraphs);
            assert_eq!(seg.reasoning, paragraphs[..n / 2].join("\n\n"));
            assert_eq!(seg.answer, paragraphs[n / 2..].join("\n\n"));
            assert_eq!(format!("{}\n\n{}", seg.reasoning, seg.answer), text);
        }
    }

    #[test]
    fn single_paragraph_is_all_answer() {
        let seg = split_reasoning("Buy AAPL.\nIt is cheap.");
        assert_eq!(seg.tier, SplitTier::Whole);
        assert_eq!(seg.reasoning, "");
        assert_eq!(seg.answer, "Buy AAPL.\nIt is cheap.");
    }

    #[test]
    fn find_marker_reports_offset() {
        assert_eq!(find_marker("abc To summarize: x"), Some((4, "To summarize:")));
        assert_eq!(find_marker("plain"), None);
    }
}
