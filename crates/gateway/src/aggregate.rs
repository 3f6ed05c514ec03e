//! Coalesces tiny upstream text deltas into client-sized chunks.
//!
//! Some models emit text a few characters at a time; forwarding each
//! fragment as its own SSE event makes clients flicker. Fragments are
//! buffered until a length or punctuation boundary, without holding text
//! long enough to hurt first-token latency.

/// Flush once the pending text reaches this many bytes.
const FLUSH_LEN: usize = 64;

/// Flush on a boundary character once at least this many bytes are pending.
const PUNCT_FLUSH_LEN: usize = 10;

/// Flushes whose trimmed form is shorter than this many characters are
/// dropped.
const MIN_RUNES: usize = 2;

/// Sentence-ending punctuation and separators, CJK and ASCII.
const BOUNDARY_CHARS: &[char] = &[
    '。', '！', '？', '；', '：', '，', '、', '.', '!', '?', ';', ':', ',', '\n',
];

#[derive(Debug, Default)]
pub struct TextAggregator {
    pending: String,
    index: u32,
    last_flushed: Option<String>,
}

impl TextAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a text fragment for the given block index. Returns a chunk to
    /// emit first when the index changes mid-buffer.
    pub fn add(&mut self, index: u32, text: &str) -> Option<(u32, String)> {
        let boundary = (self.index != index && !self.pending.is_empty()).then(|| self.flush()).flatten();

        self.index = index;
        self.pending.push_str(text);

        boundary
    }

    pub fn should_flush(&self) -> bool {
        if self.pending.len() >= FLUSH_LEN {
            return true;
        }

        self.pending.len() >= PUNCT_FLUSH_LEN && self.pending.contains(BOUNDARY_CHARS)
    }

    /// Drain the pending text, applying the dedup rules: a flush identical to
    /// the previous one (after trimming) or shorter than two characters is
    /// dropped.
    pub fn flush(&mut self) -> Option<(u32, String)> {
        if self.pending.is_empty() {
            return None;
        }

        let text = std::mem::take(&mut self.pending);
        let trimmed = text.trim();

        if trimmed.chars().count() < MIN_RUNES {
            log::debug!("dropping sub-minimal text flush");
            return None;
        }

        if self.last_flushed.as_deref() == Some(trimmed) {
            log::debug!("dropping duplicate text flush");
            return None;
        }

        self.last_flushed = Some(trimmed.to_owned());
        Some((self.index, text))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_fragments_accumulate_until_the_length_boundary() {
        let mut agg = TextAggregator::new();

        agg.add(0, "0123456789012345678901234567890123456789012345678901234567890");
        assert!(!agg.should_flush(), "61 bytes stays pending");

        agg.add(0, "123");
        assert!(agg.should_flush(), "64 bytes flushes");

        let (index, text) = agg.flush().expect("pending text");
        assert_eq!(index, 0);
        assert_eq!(text.len(), 64);
    }

    #[test]
    fn punctuation_flushes_once_ten_bytes_are_pending() {
        let mut agg = TextAggregator::new();

        agg.add(0, "short, no");
        assert!(!agg.should_flush(), "nine bytes is below the punctuation floor");

        agg.add(0, ".");
        assert!(agg.should_flush(), "ten bytes with a boundary character");
    }

    #[test]
    fn cjk_boundaries_count() {
        let mut agg = TextAggregator::new();
        agg.add(0, "你好世界你好。");
        assert!(agg.should_flush());
    }

    #[test]
    fn order_is_preserved_across_flushes() {
        let mut agg = TextAggregator::new();
        let mut out = String::new();

        for fragment in ["The quick brown fox, ", "jumps over the lazy dog. ", "Again and again. "] {
            agg.add(0, fragment);
            while agg.should_flush() {
                if let Some((_, text)) = agg.flush() {
                    out.push_str(&text);
                }
            }
        }
        if let Some((_, text)) = agg.flush() {
            out.push_str(&text);
        }

        assert_eq!(out, "The quick brown fox, jumps over the lazy dog. Again and again. ");
    }

    #[test]
    fn duplicate_flushes_are_dropped() {
        let mut agg = TextAggregator::new();

        agg.add(0, "same text here,");
        assert!(agg.flush().is_some());

        agg.add(0, " same text here, ");
        assert!(agg.flush().is_none(), "trimmed duplicate dropped");

        agg.add(0, "different text");
        assert!(agg.flush().is_some());
    }

    #[test]
    fn sub_minimal_flushes_are_dropped() {
        let mut agg = TextAggregator::new();

        agg.add(0, " a ");
        assert!(agg.flush().is_none(), "single rune dropped");

        agg.add(0, "ab");
        assert!(agg.flush().is_some());
    }

    #[test]
    fn index_change_forces_a_boundary_flush() {
        let mut agg = TextAggregator::new();

        agg.add(0, "pending text");
        let boundary = agg.add(2, "next block");

        assert_eq!(boundary, Some((0, "pending text".to_owned())));
        let (index, text) = agg.flush().expect("new pending");
        assert_eq!((index, text.as_str()), (2, "next block"));
    }
}
