use crate::util::text::split_sentences;

/// 文分割器。
pub trait SentenceSegmenter: Send + Sync {
    fn segment(&self, text: &str) -> Vec<String>;
}

/// UAX#29 の文境界による既定の分割器。
#[derive(Debug, Default, Clone, Copy)]
pub struct UnicodeSegmenter;

impl SentenceSegmenter for UnicodeSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        split_sentences(text)
    }
}
