//! エントリ単位の判定層。
pub mod keywords;
pub mod sentiment;
pub mod theme;

use serde::{Deserialize, Serialize};

pub use keywords::extract_keywords;
pub use sentiment::{
    RecencyBands, SentenceResult, SentimentDecision, SentimentEngine, SentimentSettings, aggregate,
    aggregate_window,
};
pub use theme::{ThemeDecision, ThemeEngine, ThemeSelection, ThemeSettings, select_themes};

/// 1エントリ分の感情とテーマの判定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryAnalysis {
    pub sentiment: SentimentDecision,
    pub theme: ThemeDecision,
}

impl EntryAnalysis {
    /// どちらかの判定がエラー扱いか。
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.sentiment.is_error() || self.theme.is_error()
    }
}
