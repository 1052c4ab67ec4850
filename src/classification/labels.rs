//! 分類器ラベルの正規化テーブル。
//!
//! Model adapters translate whatever their model emits (`LABEL_2`, `POSITIVE`,
//! `economy`, ...) through these tables once, so the decision engines only see
//! canonical values.
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ThemeScore;
use crate::util::text::{category_key, fold_case};

/// 3値の感情ラベル。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Negative,
    Neutral,
    Positive,
}

impl SentimentLabel {
    pub const ALL: [Self; 3] = [Self::Negative, Self::Neutral, Self::Positive];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Positive => "positive",
        }
    }

    /// 0 = negative, 1 = neutral, 2 = positive。
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Negative => 0,
            Self::Neutral => 1,
            Self::Positive => 2,
        }
    }

    #[must_use]
    pub fn is_polar(self) -> bool {
        !matches!(self, Self::Neutral)
    }

    /// 反対の極性。neutral はそのまま。
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Negative => Self::Positive,
            Self::Positive => Self::Negative,
            Self::Neutral => Self::Neutral,
        }
    }

    /// 符号付きスコア（neutral は常に 0.0）。
    #[must_use]
    pub fn signed(self, confidence: f32) -> f32 {
        match self {
            Self::Positive => confidence.abs(),
            Self::Negative => -confidence.abs(),
            Self::Neutral => 0.0,
        }
    }

    /// 3クラス分類器の生ラベルを正規化する。
    ///
    /// Exact table entries win; otherwise `neg` / `pos` / `neu` substrings are
    /// used the way Hugging Face style heads name their classes.
    #[must_use]
    pub fn from_raw(raw: &str) -> Option<Self> {
        let lowered = fold_case(raw.trim());
        match lowered.as_str() {
            "label_0" => return Some(Self::Negative),
            "label_1" => return Some(Self::Neutral),
            "label_2" => return Some(Self::Positive),
            "olumsuz" | "negatif" => return Some(Self::Negative),
            "olumlu" | "pozitif" => return Some(Self::Positive),
            "nötr" | "notr" | "tarafsız" | "tarafsiz" => return Some(Self::Neutral),
            _ => {}
        }
        if lowered.contains("neg") {
            Some(Self::Negative)
        } else if lowered.contains("pos") {
            Some(Self::Positive)
        } else if lowered.contains("neu") {
            Some(Self::Neutral)
        } else {
            None
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct TopicEntry {
    label: String,
    hypothesis: String,
    keys: Vec<String>,
}

/// 固定トピック集合と別名テーブル。
#[derive(Debug, Clone)]
pub struct TopicCatalog {
    topics: Vec<TopicEntry>,
}

impl TopicCatalog {
    /// 空のカタログ。[`TopicCatalog::with_topic`] で追加する。
    #[must_use]
    pub fn empty() -> Self {
        Self { topics: Vec::new() }
    }

    /// フォーラム投稿向けの既定トピック集合。
    #[must_use]
    pub fn forum_default() -> Self {
        Self::empty()
            .with_topic("Teknoloji", "technology", &["tech", "technology", "sci/tech"])
            .with_topic("Politika", "politics", &["politics", "world", "siyaset"])
            .with_topic("Spor", "sports", &["sport", "sports"])
            .with_topic("Eğitim", "education", &["education"])
            .with_topic("Sağlık", "health", &["health", "medicine"])
            .with_topic("Ekonomi", "economy", &["economy", "business", "finance"])
            .with_topic("Kültür", "culture", &["culture"])
            .with_topic("Sanat", "art", &["art", "arts"])
            .with_topic("Bilim", "science", &["science"])
            .with_topic("Eğlence", "entertainment", &["entertainment", "magazin"])
            .with_topic("Sosyal Medya", "social media", &["social media", "social"])
            .with_topic("İş Dünyası", "work and careers", &["work", "career", "careers"])
            .with_topic("Çevre", "environment", &["environment", "climate"])
            .with_topic("Tarih", "history", &["history"])
    }

    /// トピックを追加する。`label` と `hypothesis` 自体も別名として登録される。
    #[must_use]
    pub fn with_topic(mut self, label: &str, hypothesis: &str, aliases: &[&str]) -> Self {
        let mut keys = vec![category_key(label), category_key(hypothesis)];
        keys.extend(aliases.iter().map(|alias| category_key(alias)));
        keys.sort();
        keys.dedup();
        self.topics.push(TopicEntry {
            label: label.to_string(),
            hypothesis: hypothesis.to_string(),
            keys,
        });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// 正規トピック名の一覧。
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|topic| topic.label.as_str())
    }

    /// ゼロショット分類器へ渡す英語の仮説ラベル。
    #[must_use]
    pub fn hypotheses(&self) -> Vec<String> {
        self.topics
            .iter()
            .map(|topic| topic.hypothesis.clone())
            .collect()
    }

    /// 生ラベルを正規トピック名へ解決する。
    #[must_use]
    pub fn canonical(&self, raw: &str) -> Option<&str> {
        let key = category_key(raw);
        self.topics
            .iter()
            .find(|topic| topic.keys.iter().any(|candidate| *candidate == key))
            .map(|topic| topic.label.as_str())
    }

    /// スコア分布のラベルを正規化する。
    ///
    /// Unknown labels pass through untouched. When two raw labels resolve to the
    /// same topic the higher score is kept.
    #[must_use]
    pub fn canonicalize_scores(&self, raw: Vec<ThemeScore>) -> Vec<ThemeScore> {
        let mut merged: Vec<ThemeScore> = Vec::with_capacity(raw.len());
        for score in raw {
            let label = self
                .canonical(&score.label)
                .map_or(score.label, str::to_string);
            if let Some(existing) = merged.iter_mut().find(|s| s.label == label) {
                if score.score > existing.score {
                    existing.score = score.score;
                }
            } else {
                merged.push(ThemeScore {
                    label,
                    score: score.score,
                });
            }
        }
        merged
    }
}

impl Default for TopicCatalog {
    fn default() -> Self {
        Self::forum_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("LABEL_0", SentimentLabel::Negative)]
    #[case("LABEL_1", SentimentLabel::Neutral)]
    #[case("label_2", SentimentLabel::Positive)]
    #[case("POSITIVE", SentimentLabel::Positive)]
    #[case("Negative", SentimentLabel::Negative)]
    #[case("olumlu", SentimentLabel::Positive)]
    #[case("Olumsuz", SentimentLabel::Negative)]
    #[case("nötr", SentimentLabel::Neutral)]
    fn from_raw_maps_model_labels(#[case] raw: &str, #[case] expected: SentimentLabel) {
        assert_eq!(SentimentLabel::from_raw(raw), Some(expected));
    }

    #[test]
    fn from_raw_rejects_unknown() {
        assert_eq!(SentimentLabel::from_raw("LABEL_7"), None);
        assert_eq!(SentimentLabel::from_raw(""), None);
    }

    #[test]
    fn signed_score_matches_label() {
        assert!(SentimentLabel::Positive.signed(0.7) > 0.0);
        assert!(SentimentLabel::Negative.signed(0.7) < 0.0);
        assert_eq!(SentimentLabel::Neutral.signed(0.7), 0.0);
    }

    #[test]
    fn catalog_resolves_aliases() {
        let catalog = TopicCatalog::forum_default();
        assert_eq!(catalog.canonical("economy"), Some("Ekonomi"));
        assert_eq!(catalog.canonical("Business"), Some("Ekonomi"));
        assert_eq!(catalog.canonical("world"), Some("Politika"));
        assert_eq!(catalog.canonical("saglik"), Some("Sağlık"));
        assert_eq!(catalog.canonical("cooking"), None);
    }

    #[test]
    fn canonicalize_scores_merges_duplicates() {
        let catalog = TopicCatalog::forum_default();
        let scores = catalog.canonicalize_scores(vec![
            ThemeScore::new("economy", 0.4),
            ThemeScore::new("business", 0.7),
            ThemeScore::new("cooking", 0.2),
        ]);
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0], ThemeScore::new("Ekonomi", 0.7));
        assert_eq!(scores[1], ThemeScore::new("cooking", 0.2));
    }
}
