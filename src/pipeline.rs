//! データセット1本分のバッチ採点パイプライン。
//!
//! `Loading -> Sampling -> Scoring -> Finalizing -> Done`. Each row is analysed
//! on its own OS thread bounded by a wall-clock timeout; a thread that misses
//! its deadline is left behind and its result discarded, so a stuck classifier
//! can never stall the batch, even one that blocks instead of yielding. Checkpoints are full snapshots written every
//! `checkpoint_every` completed rows and once more while finalizing.
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dataset::{DatasetRow, ItemFailure, RowStatus};
use crate::decision::EntryAnalysis;
use crate::evaluation::{EvaluationReport, evaluate};

pub mod analyzer;
pub mod sampling;
pub mod store;

pub use analyzer::EntryAnalyzer;
pub use sampling::{SamplingSettings, stratified_sample};
pub use store::{JsonFileStore, MemoryStore, OutputRecord, ResultStore, output_records};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub item_timeout: Duration,
    pub checkpoint_every: NonZeroUsize,
    /// `None` なら全行を採点する。
    pub sampling: Option<SamplingSettings>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            item_timeout: Duration::from_secs(60),
            checkpoint_every: NonZeroUsize::new(50).unwrap_or(NonZeroUsize::MIN),
            sampling: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Loading,
    Sampling,
    Scoring,
    Finalizing,
    Done,
}

impl PipelineState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Sampling => "sampling",
            Self::Scoring => "scoring",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// オペレータの中断。最終チェックポイントだけが残る。
    Interrupted,
}

/// 1回の実行結果。
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub rows: Vec<DatasetRow>,
    pub report: EvaluationReport,
    /// `Loading` で除外した行数（本文が空、正解感情が欠損）。
    pub dropped_rows: usize,
    pub checkpoints_written: usize,
    /// 失敗した保存の回数。実行自体は止めない。
    pub store_errors: usize,
    /// 通過した状態の順序。
    pub states: Vec<PipelineState>,
}

impl PipelineRun {
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.outcome == RunOutcome::Interrupted
    }
}

/// チェックポイント書き込みの記録。
#[derive(Debug, Default)]
struct CheckpointLog {
    written: usize,
    errors: usize,
    /// 直近の書き込みが反映している完了行数。
    last_completed: Option<usize>,
}

pub struct BatchPipeline {
    analyzer: Arc<EntryAnalyzer>,
    store: Arc<dyn ResultStore>,
    settings: PipelineSettings,
}

impl fmt::Debug for BatchPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchPipeline")
            .field("analyzer", &self.analyzer)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl BatchPipeline {
    #[must_use]
    pub fn new(
        analyzer: Arc<EntryAnalyzer>,
        store: Arc<dyn ResultStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            analyzer,
            store,
            settings,
        }
    }

    /// データセットを最後まで（または中断まで）採点する。
    ///
    /// Per-row failures and store errors are recorded on the run, never
    /// returned; the caller decides the exit status from [`PipelineRun::outcome`].
    pub async fn run(&self, rows: Vec<DatasetRow>, cancel: CancellationToken) -> PipelineRun {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut states = vec![PipelineState::Loading];
        info!(%run_id, rows = rows.len(), state = %PipelineState::Loading, "pipeline started");

        let input = rows.len();
        let mut rows: Vec<DatasetRow> = rows
            .into_iter()
            .filter(DatasetRow::is_valid)
            .map(|mut row| {
                row.status = RowStatus::Pending;
                row
            })
            .collect();
        let dropped_rows = input - rows.len();
        if dropped_rows > 0 {
            warn!(%run_id, dropped = dropped_rows, "rows without body or ground truth dropped");
        }

        if let Some(sampling) = &self.settings.sampling {
            states.push(PipelineState::Sampling);
            debug!(%run_id, state = %PipelineState::Sampling, "entering state");
            rows = stratified_sample(rows, sampling);
        }

        states.push(PipelineState::Scoring);
        info!(%run_id, rows = rows.len(), state = %PipelineState::Scoring, "scoring rows");
        let mut checkpoints = CheckpointLog::default();
        let (completed, interrupted) = self
            .score_rows(run_id, &mut rows, &cancel, &mut checkpoints)
            .await;

        states.push(PipelineState::Finalizing);
        info!(%run_id, completed, interrupted, state = %PipelineState::Finalizing, "finalizing run");
        if interrupted || checkpoints.last_completed != Some(completed) {
            self.write_checkpoint(run_id, &rows, completed, &mut checkpoints)
                .await;
        }

        let report = evaluate(&rows, run_id, interrupted);
        let mut store_errors = checkpoints.errors;
        if !interrupted {
            if let Err(err) = self.store.save_final(&rows, &report).await {
                store_errors += 1;
                error!(%run_id, error = ?err, "failed to write final output");
            }
        }

        states.push(PipelineState::Done);
        info!(
            %run_id,
            total = report.total_rows,
            processed = report.processed_rows,
            timeouts = report.timeouts,
            failures = report.failures,
            error_decisions = report.error_decisions,
            sentiment_accuracy = ?report.sentiment_accuracy(),
            category_accuracy = ?report.category_accuracy(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            state = %PipelineState::Done,
            "pipeline finished"
        );

        PipelineRun {
            run_id,
            outcome: if interrupted {
                RunOutcome::Interrupted
            } else {
                RunOutcome::Completed
            },
            rows,
            report,
            dropped_rows,
            checkpoints_written: checkpoints.written,
            store_errors,
            states,
        }
    }

    /// 行を順に採点する。戻り値は (完了行数, 中断されたか)。
    async fn score_rows(
        &self,
        run_id: Uuid,
        rows: &mut [DatasetRow],
        cancel: &CancellationToken,
        checkpoints: &mut CheckpointLog,
    ) -> (usize, bool) {
        let timeout = self.settings.item_timeout;
        let every = self.settings.checkpoint_every.get();
        let mut completed = 0;

        for idx in 0..rows.len() {
            if cancel.is_cancelled() {
                return (completed, true);
            }

            let status = match self.spawn_row(idx, rows[idx].body.clone()) {
                Err(err) => {
                    error!(%run_id, row = idx, error = %err, "failed to start analysis thread");
                    RowStatus::Failed(ItemFailure::Analysis(err.to_string()))
                }
                Ok(receiver) => {
                    // 期限切れの受信側は drop されるだけ。スレッドの停止は待たない。
                    let outcome = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        received = tokio::time::timeout(timeout, receiver) => Some(received),
                    };
                    let Some(received) = outcome else {
                        info!(%run_id, row = idx, "interrupt received; abandoning in-flight row");
                        return (completed, true);
                    };

                    match received {
                        Ok(Ok(analysis)) => {
                            debug!(
                                %run_id,
                                row = idx,
                                sentiment = %analysis.sentiment.label,
                                theme = %analysis.theme.main_topic,
                                "row scored"
                            );
                            RowStatus::Scored(Box::new(analysis))
                        }
                        Ok(Err(_)) => {
                            warn!(
                                %run_id,
                                row = idx,
                                reason = "classifier_error",
                                "analysis thread exited without a result"
                            );
                            RowStatus::Failed(ItemFailure::Analysis(
                                "analysis thread exited without a result".to_string(),
                            ))
                        }
                        Err(_) => {
                            warn!(
                                %run_id,
                                row = idx,
                                reason = "timeout",
                                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                                "row timed out; abandoning analysis thread"
                            );
                            RowStatus::Failed(ItemFailure::Timeout { after: timeout })
                        }
                    }
                }
            };
            rows[idx].status = status;
            completed += 1;

            if completed % every == 0 {
                self.write_checkpoint(run_id, rows, completed, checkpoints)
                    .await;
            }
        }

        (completed, false)
    }

    /// 1行分の解析を専用の OS スレッドで動かす。
    ///
    /// The thread drives the analysis future through the runtime handle, so a
    /// classifier that blocks its thread only ever holds that one thread and
    /// never a runtime worker. The thread is detached; if it never finishes
    /// its result is simply never received.
    fn spawn_row(
        &self,
        idx: usize,
        body: String,
    ) -> std::io::Result<oneshot::Receiver<EntryAnalysis>> {
        let (sender, receiver) = oneshot::channel();
        let analyzer = Arc::clone(&self.analyzer);
        let runtime = Handle::current();
        std::thread::Builder::new()
            .name(format!("entry-analyzer-row-{idx}"))
            .spawn(move || {
                let analysis = runtime.block_on(analyzer.analyze(&body));
                // 受信側が期限切れで drop 済みなら結果は捨てる
                let _ = sender.send(analysis);
            })?;
        Ok(receiver)
    }

    async fn write_checkpoint(
        &self,
        run_id: Uuid,
        rows: &[DatasetRow],
        completed: usize,
        log: &mut CheckpointLog,
    ) {
        match self.store.save_checkpoint(rows).await {
            Ok(()) => {
                log.written += 1;
                log.last_completed = Some(completed);
                info!(%run_id, completed, total = rows.len(), "checkpoint saved");
            }
            Err(err) => {
                log.errors += 1;
                error!(%run_id, completed, error = ?err, "failed to save checkpoint");
            }
        }
    }
}
