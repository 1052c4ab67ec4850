//! 文単位の感情分類結果を1件の判定へ集約する。
//!
//! Each retained sentence votes with its confidence. The last sentence in the
//! window is multiplied by a recency weight that grows with the entry length,
//! a thin vote is overridden by the single strongest sentence, and the final
//! confidence is clamped into label-specific bands.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classification::{
    ClassifierError, PolarityLexicon, SentimentClassifier, SentimentLabel,
};

/// 分類に失敗した文が投じる neutral 票の信頼度。
const DEGRADED_CONFIDENCE: f32 = 0.1;

/// 最終文に掛ける重みの帯。文数 2-3 / 4-6 / 7 以上。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyBands {
    pub short: f32,
    pub medium: f32,
    pub long: f32,
}

impl RecencyBands {
    /// 文数に応じた最終文の重み。1文なら 1.0。
    #[must_use]
    pub fn weight_for(&self, sentence_count: usize) -> f32 {
        match sentence_count {
            0 | 1 => 1.0,
            2..=3 => self.short,
            4..=6 => self.medium,
            _ => self.long,
        }
    }
}

impl Default for RecencyBands {
    fn default() -> Self {
        Self {
            short: 1.5,
            medium: 2.0,
            long: 2.5,
        }
    }
}

/// 集約の閾値群。どれも経験的な値なので設定で差し替えられる。
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentSettings {
    /// 末尾から何文までを分類するか。
    pub max_sentences: usize,
    pub recency: RecencyBands,
    /// 票差がこれ未満なら最強の単文ラベルが勝つ。
    pub tie_break_gap: f32,
    pub polarity_floor: f32,
    pub neutral_ceiling: f32,
    /// neutral の信頼度がこれ未満なら次点ラベルを検討する。
    pub neutral_fallback_below: f32,
    /// 次点ラベルが置き換えるのに必要な票の占有率。
    pub neutral_fallback_share: f32,
    pub lexicon_override: bool,
    pub lexicon_min_confidence: f32,
    pub lexicon_min_hits: usize,
    /// 辞書で反転した判定に付ける信頼度。
    pub lexicon_flip_confidence: f32,
}

impl Default for SentimentSettings {
    fn default() -> Self {
        Self {
            max_sentences: 8,
            recency: RecencyBands::default(),
            tie_break_gap: 0.35,
            polarity_floor: 0.65,
            neutral_ceiling: 0.85,
            neutral_fallback_below: 0.5,
            neutral_fallback_share: 0.3,
            lexicon_override: false,
            lexicon_min_confidence: 0.9,
            lexicon_min_hits: 2,
            lexicon_flip_confidence: 0.6,
        }
    }
}

/// 1文分の分類結果。
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceResult {
    pub text: String,
    pub label: SentimentLabel,
    pub confidence: f32,
    pub raw_label: String,
    /// 分類器が失敗し、低重みの neutral 票に落とした文。
    pub degraded: bool,
}

impl SentenceResult {
    #[must_use]
    pub fn new(
        text: impl Into<String>,
        label: SentimentLabel,
        confidence: f32,
        raw_label: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            label,
            confidence: sanitize_confidence(confidence),
            raw_label: raw_label.into(),
            degraded: false,
        }
    }

    #[must_use]
    pub fn degraded(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: SentimentLabel::Neutral,
            confidence: DEGRADED_CONFIDENCE,
            raw_label: "error".to_string(),
            degraded: true,
        }
    }
}

/// エントリ単位の感情判定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentDecision {
    pub label: SentimentLabel,
    pub confidence: f32,
    /// positive は +confidence、negative は -confidence、neutral は 0.0。
    pub score: f32,
    pub raw_label: String,
    pub sentence_count: usize,
    pub degraded_sentences: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SentimentDecision {
    /// 判定不能時の neutral / 信頼度 0 の結果。
    #[must_use]
    pub fn failed(error: &ClassifierError) -> Self {
        Self {
            label: SentimentLabel::Neutral,
            confidence: 0.0,
            score: 0.0,
            raw_label: "error".to_string(),
            sentence_count: 0,
            degraded_sentences: 0,
            error: Some(error.to_string()),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn sanitize_confidence(confidence: f32) -> f32 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// 末尾 `max_sentences` 文の窓。
#[must_use]
pub fn sentence_window(sentences: &[String], max_sentences: usize) -> &[String] {
    let start = sentences.len().saturating_sub(max_sentences);
    &sentences[start..]
}

/// 票の大きい順。同点は positive, negative, neutral の順で neutral が負ける。
fn rank_tally(tally: &[f32; 3]) -> [(SentimentLabel, f32); 3] {
    let mut ranked = [
        SentimentLabel::Positive,
        SentimentLabel::Negative,
        SentimentLabel::Neutral,
    ]
    .map(|label| (label, tally[label.index()]));
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

/// そのラベルを投じた文のうち最も信頼度の高い文の生ラベル。
fn representative_raw_label(results: &[SentenceResult], label: SentimentLabel) -> String {
    results
        .iter()
        .filter(|result| result.label == label && !result.degraded)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map_or_else(|| label.as_str().to_string(), |result| result.raw_label.clone())
}

/// 文単位の結果を1件の判定へまとめる。`results` がエントリの全文である場合。
///
/// `lexicon` は `settings.lexicon_override` が有効なときだけ参照される。
#[must_use]
pub fn aggregate(
    results: &[SentenceResult],
    settings: &SentimentSettings,
    lexicon: Option<&PolarityLexicon>,
) -> SentimentDecision {
    aggregate_window(results, results.len(), settings, lexicon)
}

/// 末尾窓の結果を集約する。最終文の重みの帯は窓ではなくエントリ全体の文数
/// `total_sentences` で決まる。
#[must_use]
pub fn aggregate_window(
    results: &[SentenceResult],
    total_sentences: usize,
    settings: &SentimentSettings,
    lexicon: Option<&PolarityLexicon>,
) -> SentimentDecision {
    let degraded_sentences = results.iter().filter(|result| result.degraded).count();
    if results.is_empty() {
        return SentimentDecision::failed(&ClassifierError::EmptyInput);
    }
    if degraded_sentences == results.len() {
        return SentimentDecision::failed(&ClassifierError::AllSentencesFailed(format!(
            "{degraded_sentences} sentence(s)"
        )));
    }

    let count = results.len();
    let recency_weight = if count > 1 {
        settings.recency.weight_for(total_sentences.max(count))
    } else {
        1.0
    };
    let mut tally = [0.0_f32; 3];
    let mut total_weight = 0.0_f32;
    for (idx, result) in results.iter().enumerate() {
        let weight = if idx + 1 == count { recency_weight } else { 1.0 };
        tally[result.label.index()] += result.confidence * weight;
        total_weight += weight;
    }

    let ranked = rank_tally(&tally);
    let (vote_winner, winner_tally) = ranked[0];
    let best_single = results
        .iter()
        .filter(|result| !result.degraded)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let mut label = vote_winner;
    let mut confidence = winner_tally / total_weight;
    let mut raw_label = representative_raw_label(results, vote_winner);

    if let Some(best) = best_single {
        let gap = winner_tally - tally[best.label.index()];
        if best.label != vote_winner && gap < settings.tie_break_gap {
            debug!(
                vote_winner = %vote_winner,
                best_single = %best.label,
                gap,
                "single strong sentence overrides thin vote"
            );
            label = best.label;
            confidence = best.confidence;
            raw_label.clone_from(&best.raw_label);
        }
    }

    if label == SentimentLabel::Neutral && confidence < settings.neutral_fallback_below {
        let tally_sum: f32 = tally.iter().sum();
        if let Some(&(runner_up, runner_tally)) =
            ranked.iter().find(|(candidate, _)| candidate.is_polar())
        {
            if tally_sum > 0.0 && runner_tally / tally_sum >= settings.neutral_fallback_share {
                label = runner_up;
                confidence = runner_tally / total_weight;
                raw_label = representative_raw_label(results, runner_up);
            }
        }
    }

    confidence = if label.is_polar() {
        confidence.clamp(settings.polarity_floor, 1.0)
    } else {
        confidence.clamp(0.0, settings.neutral_ceiling)
    };

    if settings.lexicon_override && label.is_polar() && confidence > settings.lexicon_min_confidence
    {
        if let (Some(lexicon), Some(last)) = (lexicon, results.last()) {
            let hits = lexicon.hits(&last.text);
            let opposite = label.opposite();
            if hits.for_label(opposite) >= settings.lexicon_min_hits && hits.for_label(label) == 0 {
                debug!(from = %label, to = %opposite, ?hits, "lexicon override flipped polarity");
                label = opposite;
                confidence = settings.lexicon_flip_confidence;
                raw_label = format!("lexicon:{opposite}");
            }
        }
    }

    let confidence = sanitize_confidence(confidence);
    SentimentDecision {
        label,
        confidence,
        score: label.signed(confidence),
        raw_label,
        sentence_count: count,
        degraded_sentences,
        error: None,
    }
}

/// 文分類器を呼び出して判定まで行うエンジン。
#[derive(Clone)]
pub struct SentimentEngine {
    classifier: Arc<dyn SentimentClassifier>,
    lexicon: Option<PolarityLexicon>,
    settings: SentimentSettings,
}

impl std::fmt::Debug for SentimentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentimentEngine")
            .field("lexicon", &self.lexicon.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SentimentEngine {
    #[must_use]
    pub fn new(classifier: Arc<dyn SentimentClassifier>, settings: SentimentSettings) -> Self {
        Self {
            classifier,
            lexicon: None,
            settings,
        }
    }

    #[must_use]
    pub fn with_lexicon(mut self, lexicon: PolarityLexicon) -> Self {
        self.lexicon = Some(lexicon);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &SentimentSettings {
        &self.settings
    }

    /// 文の列から判定を作る。個々の文の失敗は neutral 票に落とす。
    pub async fn decide(&self, sentences: &[String]) -> SentimentDecision {
        let window = sentence_window(sentences, self.settings.max_sentences);
        let mut results = Vec::with_capacity(window.len());
        for (idx, sentence) in window.iter().enumerate() {
            match self.classifier.classify_sentiment(sentence).await {
                Ok(prediction) => results.push(SentenceResult::new(
                    sentence.as_str(),
                    prediction.label,
                    prediction.confidence,
                    prediction.raw_label,
                )),
                Err(error) => {
                    warn!(
                        reason = "classifier_error",
                        sentence = idx,
                        error = %error,
                        "sentence classification failed; voting neutral"
                    );
                    results.push(SentenceResult::degraded(sentence.as_str()));
                }
            }
        }
        aggregate_window(
            &results,
            sentences.len(),
            &self.settings,
            self.lexicon.as_ref(),
        )
    }
}
