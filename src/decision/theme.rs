//! トピック分布からテーマ一覧・主トピック・曖昧フラグを決める。
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::keywords::extract_keywords;
use crate::classification::{ClassifierError, ThemeScore, TopicCatalog, TopicClassifier};
use crate::util::text::tail_chars;

#[derive(Debug, Clone, PartialEq)]
pub struct ThemeSettings {
    pub score_threshold: f32,
    pub max_themes: usize,
    /// 1位と2位の差がこれ未満なら曖昧とみなす。
    pub ambiguity_margin: f32,
    /// 分類器へ渡す末尾テキストの最大文字数。
    pub max_chars: usize,
    pub window_sentences: usize,
    pub keyword_limit: usize,
    pub fallback_label: String,
}

impl Default for ThemeSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.3,
            max_themes: 3,
            ambiguity_margin: 0.1,
            max_chars: 2000,
            window_sentences: 8,
            keyword_limit: 6,
            fallback_label: "Genel".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeDecision {
    /// スコア降順、最大 `max_themes` 件。空にはならない。
    pub themes: Vec<String>,
    pub main_topic: String,
    pub scores: BTreeMap<String, f32>,
    pub is_ambiguous: bool,
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ThemeDecision {
    /// 分類器が使えなかったときのフォールバック判定。
    #[must_use]
    pub fn fallback(label: &str, keywords: Vec<String>, error: &ClassifierError) -> Self {
        Self {
            themes: vec![label.to_string()],
            main_topic: label.to_string(),
            scores: BTreeMap::new(),
            is_ambiguous: false,
            keywords,
            error: Some(error.to_string()),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// 閾値選択の結果。
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeSelection {
    pub themes: Vec<String>,
    pub is_ambiguous: bool,
}

/// スコア分布からテーマを選ぶ。有限なスコアが1つも無ければ `None`。
#[must_use]
pub fn select_themes(scores: &[ThemeScore], settings: &ThemeSettings) -> Option<ThemeSelection> {
    let mut ranked: Vec<&ThemeScore> = scores.iter().filter(|s| s.score.is_finite()).collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    let top = *ranked.first()?;

    let mut selected: Vec<&ThemeScore> = ranked
        .iter()
        .copied()
        .filter(|score| score.score >= settings.score_threshold)
        .take(settings.max_themes.max(1))
        .collect();
    if selected.is_empty() {
        selected.push(top);
    }

    let is_ambiguous = match selected.as_slice() {
        [first, second, ..] => first.score - second.score < settings.ambiguity_margin,
        _ => false,
    };
    Some(ThemeSelection {
        themes: selected.iter().map(|score| score.label.clone()).collect(),
        is_ambiguous,
    })
}

/// 末尾の文を連結し、文字数上限で後ろから切り詰める。
fn tail_window(body: &str, sentences: &[String], settings: &ThemeSettings) -> String {
    let joined = if sentences.is_empty() {
        body.trim().to_string()
    } else {
        let start = sentences.len().saturating_sub(settings.window_sentences);
        sentences[start..].join(" ")
    };
    tail_chars(&joined, settings.max_chars).trim().to_string()
}

#[derive(Clone)]
pub struct ThemeEngine {
    classifier: Arc<dyn TopicClassifier>,
    catalog: TopicCatalog,
    settings: ThemeSettings,
}

impl std::fmt::Debug for ThemeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeEngine")
            .field("topics", &self.catalog.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ThemeEngine {
    #[must_use]
    pub fn new(
        classifier: Arc<dyn TopicClassifier>,
        catalog: TopicCatalog,
        settings: ThemeSettings,
    ) -> Self {
        Self {
            classifier,
            catalog,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ThemeSettings {
        &self.settings
    }

    /// 本文と分割済みの文からテーマ判定を作る。分類器の失敗はフォールバックになる。
    pub async fn decide(&self, body: &str, sentences: &[String]) -> ThemeDecision {
        let keywords = extract_keywords(body, self.settings.keyword_limit);
        let window = tail_window(body, sentences, &self.settings);
        if window.is_empty() {
            return ThemeDecision::fallback(
                &self.settings.fallback_label,
                keywords,
                &ClassifierError::EmptyInput,
            );
        }

        let raw = match self.classifier.classify_topics(&window).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(reason = "classifier_error", error = %error, "topic classification failed");
                return ThemeDecision::fallback(
                    &self.settings.fallback_label,
                    keywords,
                    &ClassifierError::Topic(error.to_string()),
                );
            }
        };

        let scores: Vec<ThemeScore> = self
            .catalog
            .canonicalize_scores(raw)
            .into_iter()
            .filter(|score| score.score.is_finite())
            .collect();
        let Some(selection) = select_themes(&scores, &self.settings) else {
            warn!(reason = "classifier_error", "topic classifier returned no usable scores");
            return ThemeDecision::fallback(
                &self.settings.fallback_label,
                keywords,
                &ClassifierError::NoScores,
            );
        };

        let main_topic = selection
            .themes
            .first()
            .cloned()
            .unwrap_or_else(|| self.settings.fallback_label.clone());
        ThemeDecision {
            themes: selection.themes,
            main_topic,
            scores: scores
                .into_iter()
                .map(|score| (score.label, score.score))
                .collect(),
            is_ambiguous: selection.is_ambiguous,
            keywords,
            error: None,
        }
    }
}
