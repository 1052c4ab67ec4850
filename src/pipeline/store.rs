//! チェックポイントと最終結果の永続化。
//!
//! Checkpoints and the final output share one record shape, so a checkpoint can
//! be inspected with the same tooling as a finished run.
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dataset::{DatasetRow, RowStatus};
use crate::evaluation::{EvaluationReport, SentimentCode};

/// 出力1行分。チェックポイントと最終出力で共通。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub body: String,
    pub ground_truth_sentiment: Value,
    pub ground_truth_category: String,
    /// 0/1/2 のコード。予測が無い行は空文字列。
    pub predicted_sentiment: Value,
    pub predicted_label: String,
    pub confidence: Option<f32>,
    pub score: Option<f32>,
    pub predicted_category: String,
    pub themes: Vec<String>,
    pub keywords: Vec<String>,
    pub is_ambiguous: bool,
    /// `pending` / `ok` / `error` / `timeout`。
    pub status: String,
    pub error: Option<String>,
}

impl From<&DatasetRow> for OutputRecord {
    fn from(row: &DatasetRow) -> Self {
        let sentiment = row.predicted_sentiment();
        let analysis = row.analysis();
        let (status, error) = match &row.status {
            RowStatus::Pending => ("pending", None),
            RowStatus::Failed(failure) => (failure.kind(), Some(failure.to_string())),
            RowStatus::Scored(analysis) => {
                let errors: Vec<&str> = [&analysis.sentiment.error, &analysis.theme.error]
                    .into_iter()
                    .flatten()
                    .map(String::as_str)
                    .collect();
                if errors.is_empty() {
                    ("ok", None)
                } else {
                    ("error", Some(errors.join("; ")))
                }
            }
        };

        Self {
            body: row.body.clone(),
            ground_truth_sentiment: row.ground_truth_sentiment.clone(),
            ground_truth_category: row.ground_truth_category.clone(),
            predicted_sentiment: sentiment.map_or_else(
                || Value::String(String::new()),
                |decision| SentimentCode::from(decision.label).to_value(),
            ),
            predicted_label: sentiment
                .map(|decision| decision.label.as_str().to_string())
                .unwrap_or_default(),
            confidence: sentiment.map(|decision| decision.confidence),
            score: sentiment.map(|decision| decision.score),
            predicted_category: row.predicted_category().unwrap_or_default().to_string(),
            themes: analysis
                .map(|analysis| analysis.theme.themes.clone())
                .unwrap_or_default(),
            keywords: analysis
                .map(|analysis| analysis.theme.keywords.clone())
                .unwrap_or_default(),
            is_ambiguous: analysis.is_some_and(|analysis| analysis.theme.is_ambiguous),
            status: status.to_string(),
            error,
        }
    }
}

#[must_use]
pub fn output_records(rows: &[DatasetRow]) -> Vec<OutputRecord> {
    rows.iter().map(OutputRecord::from).collect()
}

/// 結果の保存先。
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// 全行のスナップショットで前回のチェックポイントを上書きする。
    async fn save_checkpoint(&self, rows: &[DatasetRow]) -> Result<()>;

    /// 最終結果とメトリクスレポートを書き出す。
    async fn save_final(&self, rows: &[DatasetRow], report: &EvaluationReport) -> Result<()>;
}

/// `<stem>_metrics.txt` を出力ファイルと同じディレクトリに置く。
#[must_use]
pub fn report_path(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map_or_else(|| "output".into(), |stem| stem.to_string_lossy());
    output_path.with_file_name(format!("{stem}_metrics.txt"))
}

/// 一時ファイルへ書いてから rename する。
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("failed to move {} into place", path.display()))?;
    Ok(())
}

/// JSON ファイルへの保存。
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    checkpoint_path: PathBuf,
    output_path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(checkpoint_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_path: checkpoint_path.into(),
            output_path: output_path.into(),
        }
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        report_path(&self.output_path)
    }
}

#[async_trait]
impl ResultStore for JsonFileStore {
    async fn save_checkpoint(&self, rows: &[DatasetRow]) -> Result<()> {
        let payload = serde_json::to_vec_pretty(&output_records(rows))
            .context("failed to serialize checkpoint")?;
        write_atomic(&self.checkpoint_path, &payload).await?;
        debug!(path = %self.checkpoint_path.display(), rows = rows.len(), "checkpoint written");
        Ok(())
    }

    async fn save_final(&self, rows: &[DatasetRow], report: &EvaluationReport) -> Result<()> {
        let payload = serde_json::to_vec_pretty(&output_records(rows))
            .context("failed to serialize final output")?;
        write_atomic(&self.output_path, &payload).await?;
        let report_path = self.report_path();
        write_atomic(&report_path, report.to_string().as_bytes()).await?;
        debug!(
            output = %self.output_path.display(),
            report = %report_path.display(),
            "final output written"
        );
        Ok(())
    }
}

/// メモリ上に保存するストア。テストと dry run 用。
#[derive(Debug, Default)]
pub struct MemoryStore {
    checkpoints: Mutex<Vec<Vec<OutputRecord>>>,
    final_output: Mutex<Option<(Vec<OutputRecord>, String)>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 書き込まれた順のチェックポイント。
    #[must_use]
    pub fn checkpoints(&self) -> Vec<Vec<OutputRecord>> {
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn final_output(&self) -> Option<Vec<OutputRecord>> {
        self.final_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(records, _)| records.clone())
    }

    #[must_use]
    pub fn final_report(&self) -> Option<String> {
        self.final_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, report)| report.clone())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn save_checkpoint(&self, rows: &[DatasetRow]) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(output_records(rows));
        Ok(())
    }

    async fn save_final(&self, rows: &[DatasetRow], report: &EvaluationReport) -> Result<()> {
        *self
            .final_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((output_records(rows), report.to_string()));
        Ok(())
    }
}
