use std::collections::{BTreeMap, BTreeSet};

/// 1ラベル分の precision / recall / F1。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassScores {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    /// 正解データに含まれるそのラベルの件数。
    pub support: usize,
}

impl ClassScores {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn from_counts(true_positive: usize, false_positive: usize, false_negative: usize) -> Self {
        let ratio = |num: usize, den: usize| if den > 0 { num as f32 / den as f32 } else { 0.0 };
        let precision = ratio(true_positive, true_positive + false_positive);
        let recall = ratio(true_positive, true_positive + false_negative);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            support: true_positive + false_negative,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LabelCounts {
    true_positive: usize,
    false_positive: usize,
    false_negative: usize,
}

/// 集計済みの分類メトリクス。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationMetrics {
    pub samples: usize,
    pub accuracy: f32,
    /// 上位 k 件のどれかが正解だった割合。候補が渡されなかった場合は `None`。
    pub top_k_accuracy: Option<f32>,
    pub macro_precision: f32,
    pub macro_recall: f32,
    pub macro_f1: f32,
    pub weighted_f1: f32,
    pub per_label: BTreeMap<String, ClassScores>,
}

/// 多ラベル対応のメトリクス集計器。カテゴリ正解率の計算に使う。
#[derive(Debug)]
pub struct MetricsCalculator {
    per_label: BTreeMap<String, LabelCounts>,
    total_samples: usize,
    correct_samples: usize,
    top_k_samples: usize,
    top_k_correct_samples: usize,
    k: usize,
}

impl MetricsCalculator {
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            per_label: BTreeMap::new(),
            total_samples: 0,
            correct_samples: 0,
            top_k_samples: 0,
            top_k_correct_samples: 0,
            k,
        }
    }

    /// 1サンプル分の正解と予測を登録する。両方空なら無視する。
    pub fn push(
        &mut self,
        expected: &BTreeSet<String>,
        predicted: &BTreeSet<String>,
        top_k_predictions: Option<&[String]>,
    ) {
        if expected.is_empty() && predicted.is_empty() {
            return;
        }
        self.total_samples += 1;
        if predicted.iter().any(|label| expected.contains(label)) {
            self.correct_samples += 1;
        }
        if let Some(candidates) = top_k_predictions {
            self.top_k_samples += 1;
            if candidates
                .iter()
                .take(self.k)
                .any(|label| expected.contains(label))
            {
                self.top_k_correct_samples += 1;
            }
        }

        for label in expected.union(predicted) {
            let counts = self.per_label.entry(label.clone()).or_default();
            match (expected.contains(label), predicted.contains(label)) {
                (true, true) => counts.true_positive += 1,
                (false, true) => counts.false_positive += 1,
                (true, false) => counts.false_negative += 1,
                (false, false) => {}
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn finalize(&self) -> ClassificationMetrics {
        if self.total_samples == 0 {
            return ClassificationMetrics::default();
        }

        let per_label: BTreeMap<String, ClassScores> = self
            .per_label
            .iter()
            .map(|(label, counts)| {
                (
                    label.clone(),
                    ClassScores::from_counts(
                        counts.true_positive,
                        counts.false_positive,
                        counts.false_negative,
                    ),
                )
            })
            .collect();

        let labels = per_label.len() as f32;
        let mean = |pick: fn(&ClassScores) -> f32| {
            if per_label.is_empty() {
                0.0
            } else {
                per_label.values().map(pick).sum::<f32>() / labels
            }
        };
        let total_support: usize = per_label.values().map(|scores| scores.support).sum();
        let weighted_f1 = if total_support > 0 {
            per_label
                .values()
                .map(|scores| scores.f1 * scores.support as f32)
                .sum::<f32>()
                / total_support as f32
        } else {
            0.0
        };

        ClassificationMetrics {
            samples: self.total_samples,
            accuracy: self.correct_samples as f32 / self.total_samples as f32,
            top_k_accuracy: (self.top_k_samples > 0)
                .then(|| self.top_k_correct_samples as f32 / self.top_k_samples as f32),
            macro_precision: mean(|scores| scores.precision),
            macro_recall: mean(|scores| scores.recall),
            macro_f1: mean(|scores| scores.f1),
            weighted_f1,
            per_label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(labels: &[&str]) -> BTreeSet<String> {
        labels.iter().map(|label| (*label).to_string()).collect()
    }

    fn list(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|label| (*label).to_string()).collect()
    }

    #[test]
    fn category_metrics_with_top_k() {
        let mut calculator = MetricsCalculator::new(2);
        // exact hit
        calculator.push(&set(&["spor"]), &set(&["spor"]), Some(list(&["spor", "sanat"]).as_slice()));
        // second candidate hits
        calculator.push(&set(&["sanat"]), &set(&["bilim"]), Some(list(&["bilim", "sanat"]).as_slice()));
        // miss
        calculator.push(&set(&["bilim"]), &set(&["tarih"]), Some(list(&["tarih", "spor"]).as_slice()));

        let metrics = calculator.finalize();
        assert_eq!(metrics.samples, 3);
        assert!((metrics.accuracy - 1.0 / 3.0).abs() < 1e-4);
        assert!((metrics.top_k_accuracy.expect("top-k") - 2.0 / 3.0).abs() < 1e-4);
        // spor F1 = 1, sanat/bilim/tarih F1 = 0
        assert!((metrics.macro_f1 - 0.25).abs() < 1e-4);
        // support: spor 1, sanat 1, bilim 1, tarih 0
        assert!((metrics.weighted_f1 - 1.0 / 3.0).abs() < 1e-4);
        assert_eq!(metrics.per_label["tarih"].support, 0);
    }

    #[test]
    fn empty_calculator_reports_zeroes() {
        let metrics = MetricsCalculator::new(3).finalize();
        assert_eq!(metrics, ClassificationMetrics::default());
        assert_eq!(metrics.top_k_accuracy, None);
    }

    #[test]
    fn class_scores_from_counts() {
        let scores = ClassScores::from_counts(3, 1, 2);
        assert!((scores.precision - 0.75).abs() < 1e-6);
        assert!((scores.recall - 0.6).abs() < 1e-6);
        assert!((scores.f1 - 2.0 / 3.0).abs() < 1e-4);
        assert_eq!(scores.support, 5);
    }
}
