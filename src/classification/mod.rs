//! 外部分類器との境界。
//!
//! The sentiment and topic models are collaborators behind two small traits.
//! They are constructed once and injected into the decision engines; nothing
//! in the crate reaches for a global model instance.
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "bert")]
pub mod bert;
pub mod labels;
pub mod lexicon;
pub mod segmenter;

pub use labels::{SentimentLabel, TopicCatalog};
pub use lexicon::{LexiconClassifier, LexiconHits, PolarityLexicon};
pub use segmenter::{SentenceSegmenter, UnicodeSegmenter};

/// 分類器呼び出しの失敗。決定結果にはメッセージとして残る。
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("no text to classify")]
    EmptyInput,
    #[error("every sentence failed to classify: {0}")]
    AllSentencesFailed(String),
    #[error("topic classifier failed: {0}")]
    Topic(String),
    #[error("topic classifier returned no usable scores")]
    NoScores,
}

/// 1文に対する感情分類器の出力（正規化済み）。
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentPrediction {
    pub label: SentimentLabel,
    pub confidence: f32,
    /// 分類器が返した元のラベル文字列。
    pub raw_label: String,
}

impl SentimentPrediction {
    #[must_use]
    pub fn new(label: SentimentLabel, confidence: f32, raw_label: impl Into<String>) -> Self {
        Self {
            label,
            confidence,
            raw_label: raw_label.into(),
        }
    }
}

/// トピック1クラス分のスコア。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeScore {
    pub label: String,
    pub score: f32,
}

impl ThemeScore {
    #[must_use]
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// 文単位の感情分類器。
#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    async fn classify_sentiment(&self, text: &str) -> Result<SentimentPrediction>;
}

/// 固定ラベル集合に対するトピック分類器。全クラスのスコアを返す。
#[async_trait]
pub trait TopicClassifier: Send + Sync {
    async fn classify_topics(&self, text: &str) -> Result<Vec<ThemeScore>>;
}
