use chat_core::types::Emotion;

const SENTINEL_OPEN: &str = "[[";
const SENTINEL_CLOSE: &str = "]]";
const SENTINEL_PREFIX: &str = "emotion:";

/// One completed unit of assistant output: text carrying a single emotion.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub emotion: Emotion,
}

/// Incremental parser for `[[emotion:<name>]]` sentinels interleaved in a
/// streamed LLM response.
///
/// Fed one provider chunk at a time via [`Segmenter::push`]. A sentinel may
/// be split across chunk boundaries — an unmatched `[[` is held in an
/// internal buffer rather than emitted, so it can complete on the next
/// push. Text is only ever handed back to the caller once it is known not
/// to be part of a sentinel.
#[derive(Debug, Default)]
pub struct Segmenter {
    /// Raw text received but not yet classified as plain text or sentinel.
    pending: String,
    /// Plain text accumulated for the segment currently being built.
    segment_text: String,
    current_emotion: Emotion,
}

impl Segmenter {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            segment_text: String::new(),
            current_emotion: Emotion::Neutral,
        }
    }

    /// Feed the next chunk of streamed text. Returns every segment that
    /// became complete as a result (usually zero or one, but a single
    /// chunk containing multiple sentinels can complete several at once).
    pub fn push(&mut self, text: &str) -> Vec<Segment> {
        self.pending.push_str(text);
        let mut completed = Vec::new();

        loop {
            let Some(start) = self.pending.find(SENTINEL_OPEN) else {
                self.segment_text.push_str(&self.pending);
                self.pending.clear();
                break;
            };

            let Some(rel_close) = self.pending[start..].find(SENTINEL_CLOSE) else {
                // Sentinel start found but not yet closed — the rest of
                // `pending` might complete it on a future push. Flush the
                // text before it and hold the remainder.
                self.segment_text.push_str(&self.pending[..start]);
                self.pending.drain(..start);
                break;
            };

            let close = start + rel_close + SENTINEL_CLOSE.len();
            let inner = &self.pending[start + SENTINEL_OPEN.len()..start + rel_close];

            self.segment_text.push_str(&self.pending[..start]);

            if let Some(name) = inner.strip_prefix(SENTINEL_PREFIX) {
                if !self.segment_text.is_empty() {
                    completed.push(Segment {
                        text: std::mem::take(&mut self.segment_text),
                        emotion: self.current_emotion,
                    });
                }
                self.current_emotion = Emotion::parse_or_neutral(name);
            } else {
                // Bracketed text that isn't a recognised sentinel shape —
                // not part of the wire contract, keep it as literal output.
                self.segment_text.push_str(&self.pending[start..close]);
            }

            self.pending.drain(..close);
        }

        completed
    }

    /// Flush whatever text remains as the final segment of the turn. Any
    /// unterminated sentinel prefix still sitting in `pending` at stream
    /// end never completed, so it is emitted as literal text rather than
    /// silently dropped.
    pub fn finish(mut self) -> Segment {
        self.segment_text.push_str(&self.pending);
        Segment {
            text: self.segment_text,
            emotion: self.current_emotion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_with_no_sentinel_passes_through() {
        let mut seg = Segmenter::new();
        let completed = seg.push("hello there");
        assert!(completed.is_empty());
        let last = seg.finish();
        assert_eq!(last.text, "hello there");
        assert_eq!(last.emotion, Emotion::Neutral);
    }

    #[test]
    fn spec_example_produces_three_segments() {
        let mut seg = Segmenter::new();
        let mut all = seg.push(
            "Hi there. [[emotion:excited]]This is great![[emotion:thoughtful]]But consider…",
        );
        all.push(seg.finish());

        assert_eq!(all.len(), 3);
        assert_eq!(all[0].text, "Hi there. ");
        assert_eq!(all[0].emotion, Emotion::Neutral);
        assert_eq!(all[1].text, "This is great!");
        assert_eq!(all[1].emotion, Emotion::Excited);
        assert_eq!(all[2].text, "But consider…");
        assert_eq!(all[2].emotion, Emotion::Thoughtful);

        for s in &all {
            assert!(!s.text.contains("[[emotion:"));
        }
    }

    #[test]
    fn sentinel_split_across_chunk_boundary_is_still_recognised() {
        let mut seg = Segmenter::new();
        let mut all = seg.push("Hello [[emo");
        all.extend(seg.push("tion:happy]]world"));
        all.push(seg.finish());

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].text, "Hello ");
        assert_eq!(all[0].emotion, Emotion::Neutral);
        assert_eq!(all[1].text, "world");
        assert_eq!(all[1].emotion, Emotion::Happy);
    }

    #[test]
    fn unknown_emotion_name_degrades_to_neutral() {
        let mut seg = Segmenter::new();
        seg.push("a[[emotion:furious]]b");
        let last = seg.finish();
        assert_eq!(last.text, "b");
        assert_eq!(last.emotion, Emotion::Neutral);
    }

    #[test]
    fn empty_segments_are_never_produced_between_adjacent_sentinels() {
        let mut seg = Segmenter::new();
        let completed = seg.push("[[emotion:happy]][[emotion:curious]]text");
        // first sentinel had no preceding text, so no empty segment
        // is emitted for it — only the transition to `curious` matters.
        assert!(completed.is_empty());
        let last = seg.finish();
        assert_eq!(last.text, "text");
        assert_eq!(last.emotion, Emotion::Curious);
    }
}
