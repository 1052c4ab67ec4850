use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use entry_analyzer::{
    classification::{
        PolarityLexicon, SentimentClassifier, TopicCatalog, TopicClassifier, UnicodeSegmenter,
    },
    config::Config,
    dataset::{ColumnMapping, load_rows},
    decision::{SentimentEngine, ThemeEngine},
    observability,
    pipeline::{BatchPipeline, EntryAnalyzer, JsonFileStore},
};

/// 中断時の終了コード（128 + SIGINT）。
const INTERRUPTED_EXIT_CODE: i32 = 130;

struct CliArgs {
    input: PathBuf,
    output: PathBuf,
    columns: ColumnMapping,
}

#[tokio::main]
async fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    let args = parse_args()?;
    observability::init().context("failed to initialize tracing")?;
    let config = Config::from_env().context("failed to load configuration")?;

    let catalog = TopicCatalog::forum_default();
    let (sentiment_classifier, topic_classifier) = build_classifiers(&config, &catalog)?;

    let mut sentiment = SentimentEngine::new(sentiment_classifier, config.sentiment_settings());
    if config.lexicon_override() {
        sentiment = sentiment.with_lexicon(
            PolarityLexicon::forum_default().context("failed to build polarity lexicon")?,
        );
    }
    let theme = ThemeEngine::new(topic_classifier, catalog, config.theme_settings());
    let analyzer = Arc::new(EntryAnalyzer::new(
        Arc::new(UnicodeSegmenter),
        sentiment,
        theme,
    ));
    let store = Arc::new(JsonFileStore::new(config.checkpoint_path(), &args.output));

    let rows = load_rows(&args.input, &args.columns).await?;
    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        rows = rows.len(),
        "dataset loaded"
    );

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let pipeline = BatchPipeline::new(analyzer, store.clone(), config.pipeline_settings());
    let run = pipeline.run(rows, cancel).await;

    if run.is_interrupted() {
        warn!(
            run_id = %run.run_id,
            checkpoint = %store.checkpoint_path().display(),
            processed = run.report.processed_rows,
            "run interrupted; partial results are in the checkpoint"
        );
        process::exit(INTERRUPTED_EXIT_CODE);
    }

    println!("{}", run.report);
    if run.store_errors > 0 {
        bail!("{} result write(s) failed", run.store_errors);
    }
    info!(
        run_id = %run.run_id,
        output = %store.output_path().display(),
        report = %store.report_path().display(),
        "results written"
    );
    Ok(())
}

#[cfg(feature = "bert")]
fn build_classifiers(
    config: &Config,
    catalog: &TopicCatalog,
) -> Result<(Arc<dyn SentimentClassifier>, Arc<dyn TopicClassifier>)> {
    use entry_analyzer::classification::bert::{
        BertSentimentClassifier, BertTopicClassifier, device_from_index,
    };

    let device = device_from_index(config.nlp_device());
    info!(device = ?device, "loading transformer classifiers");
    let sentiment: Arc<dyn SentimentClassifier> = Arc::new(BertSentimentClassifier::new(device)?);
    let topics: Arc<dyn TopicClassifier> = Arc::new(BertTopicClassifier::new(device, catalog)?);
    Ok((sentiment, topics))
}

#[cfg(not(feature = "bert"))]
fn build_classifiers(
    config: &Config,
    _catalog: &TopicCatalog,
) -> Result<(Arc<dyn SentimentClassifier>, Arc<dyn TopicClassifier>)> {
    use entry_analyzer::classification::LexiconClassifier;

    if let Some(device) = config.nlp_device() {
        warn!(
            device,
            "NLP_DEVICE is set but the binary was built without the bert feature; using the lexicon classifier"
        );
    }
    let classifier =
        Arc::new(LexiconClassifier::forum_default().context("failed to build lexicon classifier")?);
    let sentiment: Arc<dyn SentimentClassifier> = classifier.clone();
    let topics: Arc<dyn TopicClassifier> = classifier;
    Ok((sentiment, topics))
}

/// Ctrl-C か SIGTERM でトークンをキャンセルする。
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("shutdown signal received; stopping after the current checkpoint");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn parse_args() -> Result<CliArgs> {
    let mut input = None;
    let mut output = None;
    let mut columns = ColumnMapping::default();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--input" => {
                let value = args.next().context("--input requires a path argument")?;
                input = Some(PathBuf::from(value));
            }
            "--output" => {
                let value = args.next().context("--output requires a path argument")?;
                output = Some(PathBuf::from(value));
            }
            "--text-col" => {
                columns.text = Some(args.next().context("--text-col requires a column name")?);
            }
            "--sentiment-col" => {
                columns.sentiment = Some(
                    args.next()
                        .context("--sentiment-col requires a column name")?,
                );
            }
            "--category-col" => {
                columns.category = Some(
                    args.next()
                        .context("--category-col requires a column name")?,
                );
            }
            "--help" => {
                print_usage();
                process::exit(0);
            }
            _ => {
                bail!("unknown argument: {}", arg);
            }
        }
    }

    let input = input.ok_or_else(|| anyhow!("--input is required"))?;
    let output = output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .map_or_else(|| "dataset".into(), |stem| stem.to_string_lossy());
        input.with_file_name(format!("{stem}_analyzed.json"))
    });

    Ok(CliArgs {
        input,
        output,
        columns,
    })
}

fn print_usage() {
    eprintln!(
        "Usage: entry-analyzer --input <dataset.json|jsonl> [--output <path>] [--text-col <name>] [--sentiment-col <name>] [--category-col <name>]"
    );
}
