//! 正解ラベルとの突き合わせ。
pub mod metrics;
pub mod normalize;
pub mod report;

pub use metrics::{ClassScores, ClassificationMetrics, MetricsCalculator};
pub use normalize::{LabelScheme, SentimentCode, categories_match, category_key};
pub use report::{ConfusionMatrix, EvaluationReport, evaluate};
