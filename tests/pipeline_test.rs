//! バッチパイプラインの結合テスト。スクリプト化した分類器で実行を再現する。
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use entry_analyzer::classification::{
    SentimentClassifier, SentimentLabel, SentimentPrediction, ThemeScore, TopicCatalog,
    TopicClassifier, UnicodeSegmenter,
};
use entry_analyzer::dataset::{DatasetRow, ItemFailure, RowStatus};
use entry_analyzer::decision::{SentimentEngine, SentimentSettings, ThemeEngine, ThemeSettings};
use entry_analyzer::evaluation::EvaluationReport;
use entry_analyzer::pipeline::{
    BatchPipeline, EntryAnalyzer, JsonFileStore, MemoryStore, OutputRecord, PipelineSettings,
    ResultStore, RunOutcome,
};

/// 本文のキーワードで振る舞いを決める分類器。
///
/// - `hang`: blocks its thread for an hour
/// - `stop`: cancels the run token, then blocks its thread
/// - `boom`: classifier error
/// - `iyi` / `kötü`: positive / negative
#[derive(Default)]
struct Scripted {
    cancel: Option<CancellationToken>,
    calls: AtomicUsize,
}

impl Scripted {
    fn cancelling(cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SentimentClassifier for Scripted {
    async fn classify_sentiment(&self, text: &str) -> Result<SentimentPrediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("hang") {
            std::thread::sleep(Duration::from_secs(3600));
        }
        if text.contains("stop") {
            if let Some(cancel) = &self.cancel {
                cancel.cancel();
            }
            std::thread::sleep(Duration::from_secs(3600));
        }
        if text.contains("boom") {
            return Err(anyhow!("model crashed"));
        }
        let prediction = if text.contains("iyi") {
            SentimentPrediction::new(SentimentLabel::Positive, 0.9, "POSITIVE")
        } else if text.contains("kötü") {
            SentimentPrediction::new(SentimentLabel::Negative, 0.9, "NEGATIVE")
        } else {
            SentimentPrediction::new(SentimentLabel::Neutral, 0.8, "NEUTRAL")
        };
        Ok(prediction)
    }
}

#[async_trait]
impl TopicClassifier for Scripted {
    async fn classify_topics(&self, _text: &str) -> Result<Vec<ThemeScore>> {
        Ok(vec![
            ThemeScore::new("sports", 0.8),
            ThemeScore::new("history", 0.2),
        ])
    }
}

fn pipeline(
    classifier: Arc<Scripted>,
    store: Arc<dyn ResultStore>,
    settings: PipelineSettings,
) -> BatchPipeline {
    let analyzer = EntryAnalyzer::new(
        Arc::new(UnicodeSegmenter),
        SentimentEngine::new(classifier.clone(), SentimentSettings::default()),
        ThemeEngine::new(
            classifier,
            TopicCatalog::forum_default(),
            ThemeSettings::default(),
        ),
    );
    BatchPipeline::new(Arc::new(analyzer), store, settings)
}

fn settings(checkpoint_every: usize, timeout: Duration) -> PipelineSettings {
    PipelineSettings {
        item_timeout: timeout,
        checkpoint_every: NonZeroUsize::new(checkpoint_every).expect("non-zero cadence"),
        sampling: None,
    }
}

fn rows(bodies: &[&str]) -> Vec<DatasetRow> {
    bodies
        .iter()
        .map(|body| DatasetRow::new(*body, json!("olumlu"), "Spor"))
        .collect()
}

fn non_pending(records: &[OutputRecord]) -> Vec<bool> {
    records.iter().map(|record| record.status != "pending").collect()
}

#[tokio::test]
async fn hung_row_times_out_and_the_batch_continues() {
    let store = Arc::new(MemoryStore::new());
    let run = pipeline(
        Arc::new(Scripted::default()),
        store.clone(),
        settings(50, Duration::from_millis(200)),
    )
    .run(
        rows(&[
            "Çok iyi bir maç.",
            "Hakem iyi değildi ama iyi.",
            "Bu satır hang edecek.",
            "Kötü bir oyun, kötü.",
            "Sıradan bir gün.",
        ]),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(run.outcome, RunOutcome::Completed);
    assert!(run.rows.iter().all(DatasetRow::is_completed));
    assert!(matches!(
        run.rows[2].failure(),
        Some(ItemFailure::Timeout { .. })
    ));
    assert!(matches!(run.rows[3].status, RowStatus::Scored(_)));
    assert_eq!(run.report.timeouts, 1);
    assert_eq!(run.report.processed_rows, 5);

    let checkpoints = store.checkpoints();
    let last = checkpoints.last().expect("final checkpoint");
    assert_eq!(last.len(), 5);
    assert_eq!(last[2].status, "timeout");
    assert_eq!(last[2].predicted_sentiment, json!(""));

    let output = store.final_output().expect("final output");
    assert_eq!(output[2].status, "timeout");
    assert_eq!(output[0].predicted_sentiment, json!(2));
    assert_eq!(output[3].predicted_sentiment, json!(0));
    assert_eq!(output[4].predicted_sentiment, json!(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_classifier_calls_cannot_starve_the_runtime() {
    let store = Arc::new(MemoryStore::new());
    let started = Instant::now();
    let run = pipeline(
        Arc::new(Scripted::default()),
        store.clone(),
        settings(2, Duration::from_millis(300)),
    )
    .run(
        rows(&[
            "Güzel bir gün.",
            "İlk hang.",
            "İkinci hang.",
            "Üçüncü hang.",
            "Son satır iyi.",
        ]),
        CancellationToken::new(),
    )
    .await;

    assert!(
        started.elapsed() < Duration::from_secs(10),
        "batch waited on blocked calls: {:?}",
        started.elapsed()
    );
    assert_eq!(run.outcome, RunOutcome::Completed);
    assert_eq!(run.report.timeouts, 3);
    assert!(matches!(run.rows[0].status, RowStatus::Scored(_)));
    assert!(matches!(run.rows[4].status, RowStatus::Scored(_)));
    let output = store.final_output().expect("final output");
    assert_eq!(output[4].predicted_sentiment, json!(2));
}

#[tokio::test]
async fn checkpoints_are_prefix_consistent() {
    let store = Arc::new(MemoryStore::new());
    let run = pipeline(
        Arc::new(Scripted::default()),
        store.clone(),
        settings(2, Duration::from_secs(5)),
    )
    .run(
        rows(&["bir iyi", "iki", "üç kötü", "dört", "beş iyi"]),
        CancellationToken::new(),
    )
    .await;

    let checkpoints = store.checkpoints();
    assert_eq!(run.checkpoints_written, 3);
    assert_eq!(checkpoints.len(), 3);
    assert_eq!(
        non_pending(&checkpoints[0]),
        vec![true, true, false, false, false]
    );
    assert_eq!(
        non_pending(&checkpoints[1]),
        vec![true, true, true, true, false]
    );
    assert_eq!(non_pending(&checkpoints[2]), vec![true; 5]);
    // 先に確定した行は後のスナップショットでも変わらない
    assert_eq!(checkpoints[0][..2], checkpoints[2][..2]);
}

#[tokio::test]
async fn exact_multiple_does_not_repeat_the_last_checkpoint() {
    let store = Arc::new(MemoryStore::new());
    let run = pipeline(
        Arc::new(Scripted::default()),
        store.clone(),
        settings(2, Duration::from_secs(5)),
    )
    .run(rows(&["a iyi", "b", "c", "d kötü"]), CancellationToken::new())
    .await;

    assert_eq!(run.checkpoints_written, 2);
    assert_eq!(store.checkpoints().len(), 2);
    assert!(store.final_output().is_some());
}

#[tokio::test]
async fn interrupt_abandons_in_flight_row_and_skips_final_output() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let run = pipeline(
        Arc::new(Scripted::cancelling(cancel.clone())),
        store.clone(),
        settings(2, Duration::from_secs(30)),
    )
    .run(
        rows(&["bir iyi", "iki", "üç", "stop burada", "beş"]),
        cancel,
    )
    .await;

    assert!(run.is_interrupted());
    assert_eq!(run.report.processed_rows, 3);
    assert!(run.report.interrupted);
    assert!(matches!(run.rows[3].status, RowStatus::Pending));

    let checkpoints = store.checkpoints();
    assert_eq!(checkpoints.len(), 2);
    assert_eq!(
        non_pending(&checkpoints[1]),
        vec![true, true, true, false, false]
    );
    assert!(store.final_output().is_none());
    assert!(store.final_report().is_none());
}

#[tokio::test]
async fn classifier_errors_become_markers_not_failures() {
    let store = Arc::new(MemoryStore::new());
    let run = pipeline(
        Arc::new(Scripted::default()),
        store.clone(),
        settings(10, Duration::from_secs(5)),
    )
    .run(rows(&["boom", "iyi"]), CancellationToken::new())
    .await;

    assert_eq!(run.report.failures, 0);
    assert_eq!(run.report.error_decisions, 1);
    let output = store.final_output().expect("final output");
    assert_eq!(output[0].status, "error");
    assert!(output[0].error.is_some());
    assert_eq!(output[1].status, "ok");
}

/// チェックポイントだけ失敗するストア。
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    attempts: AtomicUsize,
}

#[async_trait]
impl ResultStore for FlakyStore {
    async fn save_checkpoint(&self, _rows: &[DatasetRow]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("disk full"))
    }

    async fn save_final(&self, rows: &[DatasetRow], report: &EvaluationReport) -> Result<()> {
        self.inner.save_final(rows, report).await
    }
}

#[tokio::test]
async fn store_failures_do_not_abort_the_run() {
    let store = Arc::new(FlakyStore::default());
    let run = pipeline(
        Arc::new(Scripted::default()),
        store.clone(),
        settings(2, Duration::from_secs(5)),
    )
    .run(rows(&["a", "b", "c", "d", "e"]), CancellationToken::new())
    .await;

    assert_eq!(run.outcome, RunOutcome::Completed);
    assert_eq!(run.checkpoints_written, 0);
    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(run.store_errors, 3);
    assert_eq!(run.report.processed_rows, 5);
    assert!(store.inner.final_output().is_some());
}

#[tokio::test]
async fn accuracy_skips_invalid_ground_truth_and_timed_out_rows() {
    let store = Arc::new(MemoryStore::new());
    let dataset = vec![
        DatasetRow::new("Harika, çok iyi.", json!(2), "Spor"),
        DatasetRow::new("Berbat, çok kötü.", json!("negatif"), "spor"),
        DatasetRow::new("Tamamen iyi.", json!("belki"), "Spor"),
        DatasetRow::new("Burada hang var.", json!(1), "Tarih"),
    ];
    let run = pipeline(
        Arc::new(Scripted::default()),
        store,
        settings(50, Duration::from_millis(200)),
    )
    .run(dataset, CancellationToken::new())
    .await;

    let report = &run.report;
    assert_eq!(report.invalid_ground_truth, 1);
    assert_eq!(report.sentiment_evaluated, 2);
    assert_eq!(report.sentiment_correct, 2);
    assert_eq!(report.sentiment_accuracy(), Some(1.0));
    assert_eq!(report.confusion.total(), report.sentiment_evaluated);
    assert_eq!(report.category_evaluated, 3);
    assert_eq!(report.category_correct, 3);
    assert_eq!(report.timeouts, 1);
}

#[tokio::test]
async fn json_store_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(JsonFileStore::new(
        dir.path().join("checkpoint.json"),
        dir.path().join("out/results.json"),
    ));
    let run = pipeline(
        Arc::new(Scripted::default()),
        store.clone(),
        settings(1, Duration::from_secs(5)),
    )
    .run(rows(&["Maç iyi.", "Maç kötü."]), CancellationToken::new())
    .await;
    assert_eq!(run.store_errors, 0);

    let checkpoint: Vec<Value> = serde_json::from_slice(
        &std::fs::read(store.checkpoint_path()).expect("read checkpoint"),
    )
    .expect("checkpoint json");
    assert_eq!(checkpoint.len(), 2);

    let output: Vec<OutputRecord> =
        serde_json::from_slice(&std::fs::read(store.output_path()).expect("read output"))
            .expect("output json");
    assert_eq!(output[0].predicted_category, "Spor");
    assert_eq!(output[1].predicted_label, "negative");

    let report = std::fs::read_to_string(store.report_path()).expect("report");
    assert!(report.contains("accuracy: 0.5000 (1/2)"));
}
