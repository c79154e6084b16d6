use super::segments::{ find_marker, locate, ANSWER_MARKERS };
use crate::models::events::ChatEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// No marker seen yet; deltas are relayed as thinking.
    Tentative,
    /// Split decided; deltas are relayed as answer content.
    Answering,
}

/// Classifies a growing response into thinking and content events.
///
/// With reasoning relay off every delta is content. With it on, deltas are
/// thinking until the first answer marker shows up in the accumulated text;
/// at that point the cascade runs once, and from then on everything is
/// content. A stream that ends without a marker is classified once at the end.
#[derive(Debug)]
pub struct SegmentClassifier {
    relay_reasoning: bool,
    accumulated: String,
    relayed: usize,
    answer: String,
    mode: Mode,
}

fn longest_marker() -> usize {
    ANSWER_MARKERS.iter()
        .map(|m| m.len())
        .max()
        .unwrap_or(0)
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

impl SegmentClassifier {
    pub fn new(relay_reasoning: bool) -> Self {
        Self {
            relay_reasoning,
            accumulated: String::new(),
            relayed: 0,
            answer: String::new(),
            mode: if relay_reasoning { Mode::Tentative } else { Mode::Answering },
        }
    }

    pub fn is_answering(&self) -> bool {
        self.mode == Mode::Answering
    }

    /// Feeds one delta and returns the events it produces, in order.
    pub fn push(&mut self, delta: &str) -> Vec<ChatEvent> {
        if delta.is_empty() {
            return Vec::new();
        }
        if !self.relay_reasoning {
            self.accumulated.push_str(delta);
            self.answer.push_str(delta);
            return vec![ChatEvent::Content { content: delta.to_string() }];
        }

        match self.mode {
            Mode::Answering => {
                self.accumulated.push_str(delta);
                self.relay_answer(delta).into_iter().collect()
            }
            Mode::Tentative => {
                let relayed_before = self.accumulated.len();
                self.accumulated.push_str(delta);
                if self.marker_arrived(relayed_before) {
                    return self.commit(relayed_before);
                }
                self.relayed = self.accumulated.len();
                vec![ChatEvent::Thinking { content: delta.to_string() }]
            }
        }
    }

    /// Closes the stream. Returns the trailing events and the final answer
    /// text for the terminal event.
    pub fn finish(mut self) -> (Vec<ChatEvent>, String) {
        if !self.relay_reasoning {
            return (Vec::new(), self.answer);
        }
        let events = match self.mode {
            Mode::Tentative => self.commit(self.relayed),
            Mode::Answering => Vec::new(),
        };
        (events, self.answer.trim().to_string())
    }

    /// A new marker must end inside the latest delta, so only the tail that
    /// could contain it is searched.
    fn marker_arrived(&self, previous_len: usize) -> bool {
        let start = floor_char_boundary(
            &self.accumulated,
            previous_len.saturating_sub(longest_marker().saturating_sub(1))
        );
        find_marker(&self.accumulated[start..]).is_some()
    }

    fn commit(&mut self, relayed: usize) -> Vec<ChatEvent> {
        let located = locate(&self.accumulated);
        let segments = located.segments(&self.accumulated);
        let mut events = Vec::new();

        let reasoning = located.reasoning;
        if reasoning.end > relayed {
            let from = floor_char_boundary(&self.accumulated, reasoning.start.max(relayed));
            let pending = self.accumulated[from..reasoning.end].trim();
            if !pending.is_empty() {
                events.push(ChatEvent::Thinking { content: pending.to_string() });
            }
        }

        self.mode = Mode::Answering;
        self.relayed = self.accumulated.len();
        if let Some(event) = self.relay_answer(&segments.answer) {
            events.push(event);
        }
        events
    }

    fn relay_answer(&mut self, delta: &str) -> Option<ChatEvent> {
        let piece = if self.answer.is_empty() { delta.trim_start() } else { delta };
        if piece.is_empty() {
            return None;
        }
        self.answer.push_str(piece);
        Some(ChatEvent::Content { content: piece.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thinking(s: &str) -> ChatEvent {
        ChatEvent::Thinking { content: s.to_string() }
    }

    fn content(s: &str) -> ChatEvent {
        ChatEvent::Content { content: s.to_string() }
    }

    fn run(relay: bool, deltas: &[&str]) -> (Vec<ChatEvent>, String) {
        let mut classifier = SegmentClassifier::new(relay);
        let mut events = Vec::new();
        for delta in deltas {
            events.extend(classifier.push(delta));
        }
        let (tail, answer) = classifier.finish();
        events.extend(tail);
        (events, answer)
    }

    #[test]
    fn without_reasoning_every_delta_is_content() {
        let (events, answer) = run(false, &["Final ", "Answer: ", "Buy."]);
        assert_eq!(events, vec![content("Final "), content("Answer: "), content("Buy.")]);
        assert_eq!(answer, "Final Answer: Buy.");
    }

    #[test]
    fn marker_in_single_delta_splits_immediately() {
        let (events, answer) = run(true, &["Thinking about it...\n\nFinal Answer: Buy."]);
        assert_eq!(events, vec![thinking("Thinking about it..."), content("Buy.")]);
        assert_eq!(answer, "Buy.");
    }

    #[test]
    fn deltas_before_marker_are_thinking_then_content() {
        let (events, answer) = run(true, &["Thinking ", "about it...\n\n", "Final Answer:", " Buy", "."]);
        assert_eq!(
            events,
            vec![thinking("Thinking "), thinking("about it...\n\n"), content("Buy"), content(".")]
        );
        assert_eq!(answer, "Buy.");
    }

    #[test]
    fn marker_split_across_deltas_is_detected() {
        let mut classifier = SegmentClassifier::new(true);
        assert_eq!(classifier.push("Weighing P/E. Final Ans"), vec![thinking("Weighing P/E. Final Ans")]);
        assert!(!classifier.is_answering());
        let events = classifier.push("wer: Hold");
        assert!(classifier.is_answering());
        assert_eq!(events, vec![content("Hold")]);
        assert_eq!(classifier.push(" for now"), vec![content(" for now")]);
        let (tail, answer) = classifier.finish();
        assert!(tail.is_empty());
        assert_eq!(answer, "Hold for now");
    }

    #[test]
    fn unrelayed_reasoning_in_triggering_delta_is_flushed() {
        let (events, _) = run(true, &["Step one. ", "Step two. Answer: Sell."]);
        assert_eq!(events, vec![thinking("Step one. "), thinking("Step two."), content("Sell.")]);
    }

    #[test]
    fn no_reclassification_after_switch() {
        let (events, answer) = run(true, &["a Answer: b", " Final Answer: c"]);
        assert_eq!(events, vec![thinking("a"), content("b"), content(" Final Answer: c")]);
        assert_eq!(answer, "b Final Answer: c");
    }

    #[test]
    fn stream_without_marker_is_classified_at_end() {
        let (events, answer) = run(true, &["First thought.\n\n", "Second thought.\n\n", "Buy."]);
        assert_eq!(
            events,
            vec![
                thinking("First thought.\n\n"),
                thinking("Second thought.\n\n"),
                thinking("Buy."),
                content("Second thought.\n\nBuy.")
            ]
        );
        assert_eq!(answer, "Second thought.\n\nBuy.");
    }

    #[test]
    fn single_paragraph_without_marker_becomes_whole_answer() {
        let (events, answer) = run(true, &["Buy ", "AAPL."]);
        assert_eq!(events, vec![thinking("Buy "), thinking("AAPL."), content("Buy AAPL.")]);
        assert_eq!(answer, "Buy AAPL.");
    }

    #[test]
    fn empty_stream_produces_no_events() {
        let (events, answer) = run(true, &[]);
        assert!(events.is_empty());
        assert_eq!(answer, "");
    }

    #[test]
    fn heading_made_of_hashes_switches_on_first_delta() {
        // "###" is itself an answer marker, so the heading commits at once and
        // what follows it streams as content.
        let (events, answer) = run(true, &["### Thinking Process\n", "weigh P/E"]);
        assert_eq!(events, vec![content("weigh P/E")]);
        assert_eq!(answer, "weigh P/E");
    }

    #[test]
    fn two_hash_heading_without_later_heading_leaves_empty_answer() {
        let (events, answer) = run(true, &["## Thinking Process\n", "weigh P/E"]);
        assert_eq!(events, vec![thinking("## Thinking Process\n"), thinking("weigh P/E")]);
        assert_eq!(answer, "");
    }

    #[test]
    fn multibyte_text_before_marker_is_handled() {
        let (events, answer) = run(true, &["分析：估值偏高。", "Answer: 持有"]);
        assert_eq!(events, vec![thinking("分析：估值偏高。"), content("持有")]);
        assert_eq!(answer, "持有");
    }
}
