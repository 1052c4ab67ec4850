//! 実行結果の集計とテキストレポート。
use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::metrics::{ClassScores, ClassificationMetrics, MetricsCalculator};
use super::normalize::{SentimentCode, category_key};
use crate::dataset::{DatasetRow, ItemFailure, RowStatus};

/// カテゴリの top-k 正解率に使う候補数。テーマの上限と揃える。
const CATEGORY_TOP_K: usize = 3;
const CLASS_NAMES: [&str; 3] = ["negative", "neutral", "positive"];

/// 3x3 の混同行列。行 = 正解、列 = 予測。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: [[usize; 3]; 3],
}

impl ConfusionMatrix {
    /// どちらかが `Invalid` なら記録しない。
    pub fn record(&mut self, actual: SentimentCode, predicted: SentimentCode) {
        if let (Some(row), Some(col)) = (actual.index(), predicted.index()) {
            self.counts[row][col] += 1;
        }
    }

    #[must_use]
    pub fn count(&self, actual: SentimentCode, predicted: SentimentCode) -> usize {
        match (actual.index(), predicted.index()) {
            (Some(row), Some(col)) => self.counts[row][col],
            _ => 0,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    #[must_use]
    pub fn class_scores(&self, class: usize) -> ClassScores {
        let true_positive = self.counts[class][class];
        let predicted: usize = self.counts.iter().map(|row| row[class]).sum();
        let actual: usize = self.counts[class].iter().sum();
        ClassScores::from_counts(
            true_positive,
            predicted - true_positive,
            actual - true_positive,
        )
    }
}

/// 実行全体の評価結果。
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub interrupted: bool,
    pub total_rows: usize,
    pub processed_rows: usize,
    pub scored_rows: usize,
    pub timeouts: usize,
    pub failures: usize,
    /// 時間内に終わったが感情かテーマがエラー判定だった行。
    pub error_decisions: usize,
    pub ambiguous_rows: usize,
    pub invalid_ground_truth: usize,
    pub sentiment_evaluated: usize,
    pub sentiment_correct: usize,
    pub confusion: ConfusionMatrix,
    pub category_evaluated: usize,
    pub category_correct: usize,
    pub category_metrics: ClassificationMetrics,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(correct: usize, evaluated: usize) -> Option<f32> {
    (evaluated > 0).then(|| correct as f32 / evaluated as f32)
}

impl EvaluationReport {
    #[must_use]
    pub fn sentiment_accuracy(&self) -> Option<f32> {
        ratio(self.sentiment_correct, self.sentiment_evaluated)
    }

    #[must_use]
    pub fn category_accuracy(&self) -> Option<f32> {
        ratio(self.category_correct, self.category_evaluated)
    }
}

/// 処理済みの行から評価結果を作る。
///
/// Only completed rows are evaluated, and only when both the ground truth and
/// the prediction normalize. Rows that failed, timed out or carry an error
/// decision show up in the failure counts instead of the accuracy totals.
#[must_use]
pub fn evaluate(rows: &[DatasetRow], run_id: Uuid, interrupted: bool) -> EvaluationReport {
    let mut report = EvaluationReport {
        run_id,
        generated_at: Utc::now(),
        interrupted,
        total_rows: rows.len(),
        processed_rows: 0,
        scored_rows: 0,
        timeouts: 0,
        failures: 0,
        error_decisions: 0,
        ambiguous_rows: 0,
        invalid_ground_truth: 0,
        sentiment_evaluated: 0,
        sentiment_correct: 0,
        confusion: ConfusionMatrix::default(),
        category_evaluated: 0,
        category_correct: 0,
        category_metrics: ClassificationMetrics::default(),
    };
    let mut categories = MetricsCalculator::new(CATEGORY_TOP_K);

    for row in rows.iter().filter(|row| row.is_completed()) {
        report.processed_rows += 1;
        match &row.status {
            RowStatus::Scored(analysis) => {
                report.scored_rows += 1;
                if analysis.has_error() {
                    report.error_decisions += 1;
                }
                if analysis.theme.is_ambiguous {
                    report.ambiguous_rows += 1;
                }
            }
            RowStatus::Failed(ItemFailure::Timeout { .. }) => report.timeouts += 1,
            RowStatus::Failed(ItemFailure::Analysis(_)) => report.failures += 1,
            RowStatus::Pending => {}
        }

        let actual = row.ground_truth_code();
        if actual.is_valid() {
            let predicted = row
                .predicted_sentiment()
                .map_or(SentimentCode::Invalid, |decision| {
                    SentimentCode::from(decision.label)
                });
            if predicted.is_valid() {
                report.sentiment_evaluated += 1;
                if predicted == actual {
                    report.sentiment_correct += 1;
                }
                report.confusion.record(actual, predicted);
            }
        } else {
            report.invalid_ground_truth += 1;
        }

        let expected_key = category_key(&row.ground_truth_category);
        let predicted_key = row
            .predicted_category()
            .map(category_key)
            .filter(|key| !key.is_empty());
        if let Some(predicted_key) = predicted_key.filter(|_| !expected_key.is_empty()) {
            report.category_evaluated += 1;
            if predicted_key == expected_key {
                report.category_correct += 1;
            }
            let candidates: Vec<String> = row
                .analysis()
                .map(|analysis| analysis.theme.themes.iter().map(|t| category_key(t)).collect())
                .unwrap_or_default();
            categories.push(
                &BTreeSet::from([expected_key]),
                &BTreeSet::from([predicted_key]),
                Some(candidates.as_slice()),
            );
        }
    }

    report.category_metrics = categories.finalize();
    report
}

fn write_ratio(f: &mut fmt::Formatter<'_>, value: Option<f32>) -> fmt::Result {
    match value {
        Some(value) => write!(f, "{value:.4}"),
        None => f.write_str("n/a"),
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Entry analysis report")?;
        writeln!(f, "run_id: {}", self.run_id)?;
        writeln!(f, "generated_at: {}", self.generated_at.to_rfc3339())?;
        writeln!(
            f,
            "status: {}",
            if self.interrupted { "interrupted" } else { "completed" }
        )?;
        writeln!(
            f,
            "rows: total {}, processed {}, scored {}, timeouts {}, failures {}, error decisions {}, ambiguous themes {}",
            self.total_rows,
            self.processed_rows,
            self.scored_rows,
            self.timeouts,
            self.failures,
            self.error_decisions,
            self.ambiguous_rows
        )?;
        writeln!(f, "invalid ground truth: {}", self.invalid_ground_truth)?;

        writeln!(f)?;
        writeln!(f, "[sentiment]")?;
        write!(f, "accuracy: ")?;
        write_ratio(f, self.sentiment_accuracy())?;
        writeln!(f, " ({}/{})", self.sentiment_correct, self.sentiment_evaluated)?;
        writeln!(
            f,
            "{:<10} {:>9} {:>9} {:>9} {:>9}",
            "class", "precision", "recall", "f1", "support"
        )?;
        for (idx, name) in CLASS_NAMES.iter().enumerate() {
            let scores = self.confusion.class_scores(idx);
            writeln!(
                f,
                "{:<10} {:>9.4} {:>9.4} {:>9.4} {:>9}",
                name, scores.precision, scores.recall, scores.f1, scores.support
            )?;
        }
        writeln!(f)?;
        writeln!(f, "confusion matrix (rows = actual, columns = predicted)")?;
        writeln!(
            f,
            "{:<10} {:>9} {:>9} {:>9}",
            "", CLASS_NAMES[0], CLASS_NAMES[1], CLASS_NAMES[2]
        )?;
        for (idx, name) in CLASS_NAMES.iter().enumerate() {
            let row = self.confusion.counts[idx];
            writeln!(
                f,
                "{:<10} {:>9} {:>9} {:>9}",
                name, row[0], row[1], row[2]
            )?;
        }

        writeln!(f)?;
        writeln!(f, "[category]")?;
        write!(f, "accuracy: ")?;
        write_ratio(f, self.category_accuracy())?;
        writeln!(f, " ({}/{})", self.category_correct, self.category_evaluated)?;
        write!(f, "top-{CATEGORY_TOP_K} accuracy: ")?;
        write_ratio(f, self.category_metrics.top_k_accuracy)?;
        writeln!(f)?;
        writeln!(
            f,
            "macro_f1: {:.4}, weighted_f1: {:.4}",
            self.category_metrics.macro_f1, self.category_metrics.weighted_f1
        )
    }
}
