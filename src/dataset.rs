//! 入力データセットの行と読み込み。
//!
//! Input is a JSON array or JSON-lines file of flat objects. Column names are
//! resolved once here so the pipeline only ever sees the three logical fields.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::decision::{EntryAnalysis, SentimentDecision};
use crate::evaluation::{LabelScheme, SentimentCode};

const TEXT_HINTS: &[&str] = &["body", "entry", "text", "metin", "content"];
const SENTIMENT_HINTS: &[&str] = &["duygu", "sentiment"];
const CATEGORY_HINTS: &[&str] = &["kategori", "category", "topic", "tema"];

/// 1件の処理失敗。行には明示的なマーカーとして残る。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemFailure {
    #[error("timed out after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },
    #[error("analysis failed: {0}")]
    Analysis(String),
}

impl ItemFailure {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Analysis(_) => "error",
        }
    }
}

/// 行の処理状態。
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RowStatus {
    #[default]
    Pending,
    Scored(Box<EntryAnalysis>),
    Failed(ItemFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub body: String,
    /// 元の表記のまま保持する正解感情。
    pub ground_truth_sentiment: Value,
    pub ground_truth_category: String,
    /// 正解感情の整数をどう読むか。読み込み時に列全体から決める。
    pub label_scheme: LabelScheme,
    pub status: RowStatus,
}

impl DatasetRow {
    #[must_use]
    pub fn new(
        body: impl Into<String>,
        ground_truth_sentiment: Value,
        ground_truth_category: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            ground_truth_sentiment,
            ground_truth_category: ground_truth_category.into(),
            label_scheme: LabelScheme::default(),
            status: RowStatus::Pending,
        }
    }

    /// 本文があり、正解感情が欠損していない行。
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.body.trim().is_empty() && !self.ground_truth_sentiment.is_null()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        !matches!(self.status, RowStatus::Pending)
    }

    #[must_use]
    pub fn ground_truth_code(&self) -> SentimentCode {
        SentimentCode::normalize_with(&self.ground_truth_sentiment, self.label_scheme)
    }

    #[must_use]
    pub fn analysis(&self) -> Option<&EntryAnalysis> {
        match &self.status {
            RowStatus::Scored(analysis) => Some(analysis),
            _ => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&ItemFailure> {
        match &self.status {
            RowStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// 時間内に完了し、エラーでない感情判定だけを返す。
    #[must_use]
    pub fn predicted_sentiment(&self) -> Option<&SentimentDecision> {
        self.analysis()
            .map(|analysis| &analysis.sentiment)
            .filter(|decision| !decision.is_error())
    }

    #[must_use]
    pub fn predicted_category(&self) -> Option<&str> {
        self.analysis()
            .filter(|analysis| !analysis.theme.is_error())
            .map(|analysis| analysis.theme.main_topic.as_str())
    }
}

/// 列名の明示指定。未指定の列はヒューリスティックで解決する。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    pub text: Option<String>,
    pub sentiment: Option<String>,
    pub category: Option<String>,
}

/// 解決済みの列名。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub text: String,
    pub sentiment: String,
    pub category: Option<String>,
}

fn find_column<'a>(columns: &'a [String], hints: &[&str], taken: &[&str]) -> Option<&'a String> {
    columns.iter().find(|column| {
        let lowered = column.to_lowercase();
        !lowered.starts_with("pred")
            && !taken.contains(&column.as_str())
            && hints.iter().any(|hint| lowered.contains(hint))
    })
}

impl ColumnMapping {
    /// 列名一覧から本文・感情・カテゴリ列を決める。
    ///
    /// # Errors
    /// 本文列か感情列が見つからない場合。
    pub fn resolve(&self, columns: &[String]) -> Result<ResolvedColumns> {
        let sentiment = match &self.sentiment {
            Some(name) => name.clone(),
            None => find_column(columns, SENTIMENT_HINTS, &[])
                .cloned()
                .with_context(|| format!("no sentiment column among {columns:?}"))?,
        };
        let category = match &self.category {
            Some(name) => Some(name.clone()),
            None => find_column(columns, CATEGORY_HINTS, &[sentiment.as_str()]).cloned(),
        };
        let mut taken = vec![sentiment.as_str()];
        if let Some(category) = &category {
            taken.push(category.as_str());
        }
        let text = match &self.text {
            Some(name) => name.clone(),
            None => find_column(columns, TEXT_HINTS, &taken)
                .cloned()
                .with_context(|| format!("no text column among {columns:?}"))?,
        };
        Ok(ResolvedColumns {
            text,
            sentiment,
            category,
        })
    }
}

fn value_as_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn parse_records(raw: &str) -> Result<Vec<Map<String, Value>>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("failed to parse JSON array dataset");
    }
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("failed to parse JSON line {}", idx + 1))
        })
        .collect()
}

/// レコード列を行へ変換する。列名は最初のレコードから解決する。
///
/// # Errors
/// 必須列が解決できない場合。
pub fn rows_from_records(
    records: &[Map<String, Value>],
    mapping: &ColumnMapping,
) -> Result<Vec<DatasetRow>> {
    let Some(first) = records.first() else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = first.keys().cloned().collect();
    let resolved = mapping.resolve(&columns)?;
    info!(
        text = %resolved.text,
        sentiment = %resolved.sentiment,
        category = ?resolved.category,
        "dataset columns resolved"
    );

    let label_scheme = LabelScheme::detect(
        records
            .iter()
            .filter_map(|record| record.get(&resolved.sentiment)),
    );
    info!(scheme = ?label_scheme, "sentiment label scheme detected");

    Ok(records
        .iter()
        .map(|record| DatasetRow {
            label_scheme,
            ..DatasetRow::new(
                value_as_text(record.get(&resolved.text)),
                record
                    .get(&resolved.sentiment)
                    .cloned()
                    .unwrap_or(Value::Null),
                resolved
                    .category
                    .as_ref()
                    .map(|column| value_as_text(record.get(column)))
                    .unwrap_or_default(),
            )
        })
        .collect())
}

/// JSON 配列または JSON Lines のデータセットを読み込む。
///
/// # Errors
/// 読み込み・パース・列解決に失敗した場合。読み込み時の失敗は致命的。
pub async fn load_rows(path: &Path, mapping: &ColumnMapping) -> Result<Vec<DatasetRow>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    let records = parse_records(&raw)?;
    if records.is_empty() {
        bail!("dataset {} contains no records", path.display());
    }
    debug!(records = records.len(), path = %path.display(), "dataset parsed");
    rows_from_records(&records, mapping)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    #[test]
    fn resolves_columns_by_hint_and_skips_predictions() {
        let resolved = ColumnMapping::default()
            .resolve(&columns(&[
                "Entry Body",
                "Kategori",
                "predicted_sentiment",
                "Duygu Etiketi",
            ]))
            .expect("resolved");
        assert_eq!(resolved.text, "Entry Body");
        assert_eq!(resolved.sentiment, "Duygu Etiketi");
        assert_eq!(resolved.category.as_deref(), Some("Kategori"));
    }

    #[test]
    fn explicit_mapping_wins() {
        let mapping = ColumnMapping {
            text: Some("yorum".to_string()),
            sentiment: None,
            category: Some("alan".to_string()),
        };
        let resolved = mapping
            .resolve(&columns(&["yorum", "alan", "sentiment"]))
            .expect("resolved");
        assert_eq!(resolved.text, "yorum");
        assert_eq!(resolved.category.as_deref(), Some("alan"));
    }

    #[test]
    fn missing_sentiment_column_is_an_error() {
        assert!(
            ColumnMapping::default()
                .resolve(&columns(&["body", "category"]))
                .is_err()
        );
    }

    #[test]
    fn parses_array_and_json_lines() {
        let array = parse_records(r#"[{"body": "a", "duygu": 2}]"#).expect("array");
        assert_eq!(array.len(), 1);
        let lines = parse_records("{\"body\": \"a\", \"duygu\": 2}\n\n{\"body\": \"b\", \"duygu\": 0}\n")
            .expect("lines");
        assert_eq!(lines.len(), 2);
        assert!(parse_records("{\"body\": ").is_err());
    }

    #[test]
    fn rows_keep_raw_ground_truth_and_flag_invalid_rows() {
        let records = parse_records(
            r#"[
                {"body": "Harika maç", "duygu": "olumlu", "kategori": "Spor"},
                {"body": "   ", "duygu": 1, "kategori": "Spor"},
                {"body": "Ne diyeyim", "duygu": null, "kategori": 3}
            ]"#,
        )
        .expect("records");
        let rows = rows_from_records(&records, &ColumnMapping::default()).expect("rows");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].ground_truth_sentiment, json!("olumlu"));
        assert_eq!(rows[0].ground_truth_code(), SentimentCode::Positive);
        assert!(rows[0].is_valid());
        assert!(!rows[1].is_valid());
        assert!(!rows[2].is_valid());
        assert_eq!(rows[2].ground_truth_category, "3");
        assert_eq!(rows[0].status, RowStatus::Pending);
    }

    #[test]
    fn signed_dataset_reads_zero_as_neutral() {
        let records = parse_records(
            "{\"body\": \"Berbat\", \"duygu\": -1}\n\
             {\"body\": \"Fena değil\", \"duygu\": 0}\n\
             {\"body\": \"Çok iyi\", \"duygu\": 1}\n",
        )
        .expect("records");
        let rows = rows_from_records(&records, &ColumnMapping::default()).expect("rows");
        let codes: Vec<SentimentCode> = rows.iter().map(DatasetRow::ground_truth_code).collect();
        assert_eq!(
            codes,
            vec![
                SentimentCode::Negative,
                SentimentCode::Neutral,
                SentimentCode::Positive
            ]
        );
        assert!(rows.iter().all(|row| row.label_scheme == LabelScheme::Signed));
        assert_eq!(rows[1].ground_truth_sentiment, json!(0));
    }

    #[test]
    fn coded_dataset_keeps_zero_as_negative() {
        let records = parse_records(r#"[{"body": "a", "duygu": 0}, {"body": "b", "duygu": 2}]"#)
            .expect("records");
        let rows = rows_from_records(&records, &ColumnMapping::default()).expect("rows");
        assert_eq!(rows[0].label_scheme, LabelScheme::Coded);
        assert_eq!(rows[0].ground_truth_code(), SentimentCode::Negative);
        assert_eq!(rows[1].ground_truth_code(), SentimentCode::Positive);
    }

    #[test]
    fn failure_kinds_are_distinct() {
        let timeout = ItemFailure::Timeout {
            after: Duration::from_secs(2),
        };
        assert_eq!(timeout.kind(), "timeout");
        assert_eq!(timeout.to_string(), "timed out after 2s");
        assert_eq!(ItemFailure::Analysis("boom".into()).kind(), "error");
    }
}
