use std::sync::Arc;

use crate::classification::SentenceSegmenter;
use crate::decision::{EntryAnalysis, SentimentEngine, ThemeEngine};

/// 1件の本文を文分割し、感情とテーマの両エンジンに流す。
#[derive(Clone)]
pub struct EntryAnalyzer {
    segmenter: Arc<dyn SentenceSegmenter>,
    sentiment: SentimentEngine,
    theme: ThemeEngine,
}

impl std::fmt::Debug for EntryAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryAnalyzer")
            .field("sentiment", &self.sentiment)
            .field("theme", &self.theme)
            .finish_non_exhaustive()
    }
}

impl EntryAnalyzer {
    #[must_use]
    pub fn new(
        segmenter: Arc<dyn SentenceSegmenter>,
        sentiment: SentimentEngine,
        theme: ThemeEngine,
    ) -> Self {
        Self {
            segmenter,
            sentiment,
            theme,
        }
    }

    /// 分類器の失敗は各判定のエラーマーカーとして返る。ここでは失敗しない。
    pub async fn analyze(&self, body: &str) -> EntryAnalysis {
        let sentences = self.segmenter.segment(body);
        let (sentiment, theme) = tokio::join!(
            self.sentiment.decide(&sentences),
            self.theme.decide(body, &sentences)
        );
        EntryAnalysis { sentiment, theme }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::{LexiconClassifier, SentimentLabel, TopicCatalog, UnicodeSegmenter};
    use crate::decision::{SentimentSettings, ThemeSettings};

    fn lexicon_analyzer() -> EntryAnalyzer {
        let classifier = Arc::new(LexiconClassifier::forum_default().expect("lexicon"));
        EntryAnalyzer::new(
            Arc::new(UnicodeSegmenter),
            SentimentEngine::new(classifier.clone(), SentimentSettings::default()),
            ThemeEngine::new(classifier, TopicCatalog::forum_default(), ThemeSettings::default()),
        )
    }

    #[tokio::test]
    async fn analyzes_sentiment_and_theme_together() {
        let analysis = lexicon_analyzer()
            .analyze("Dün akşam maç vardı. Takım iki gol attı. Harika bir oyundu, mükemmel!")
            .await;
        assert_eq!(analysis.sentiment.label, SentimentLabel::Positive);
        assert_eq!(analysis.theme.main_topic, "Spor");
        assert!(!analysis.has_error());
    }

    #[tokio::test]
    async fn blank_body_yields_error_markers() {
        let analysis = lexicon_analyzer().analyze("   ").await;
        assert!(analysis.sentiment.is_error());
        assert_eq!(analysis.theme.themes, vec!["Genel"]);
    }
}
