//! rust-bert backed classifiers (`bert` feature).
//!
//! Both models are blocking and heavy, so inference runs on the blocking pool
//! behind a mutex, the same way the embedding service in this codebase does it.
//!
//! rust-bert's sentiment pipeline is binary: `SentimentPolarity` only has
//! `Positive` and `Negative`, whatever weights `SentimentConfig` points at. A
//! sentence never votes neutral through this backend, so entry-level neutral
//! only comes from failed sentences. For three-way labels use the lexicon
//! backend or a classifier that emits `neutral` itself.
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rust_bert::pipelines::sentiment::{
    SentimentConfig, SentimentModel, SentimentPolarity,
};
use rust_bert::pipelines::zero_shot_classification::{
    ZeroShotClassificationConfig, ZeroShotClassificationModel,
};
use tch::Device;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    SentimentClassifier, SentimentLabel, SentimentPrediction, ThemeScore, TopicCatalog,
    TopicClassifier,
};

const ZERO_SHOT_MAX_LENGTH: usize = 256;

/// `NLP_DEVICE` の値から実行デバイスを決める。未設定なら CUDA があれば使う。
#[must_use]
pub fn device_from_index(index: Option<i64>) -> Device {
    match index {
        Some(idx) if idx >= 0 => Device::Cuda(usize::try_from(idx).unwrap_or_default()),
        Some(_) => Device::Cpu,
        None => Device::cuda_if_available(),
    }
}

/// Sentence-level sentiment model. 2値 (positive / negative) のみ。
#[derive(Clone)]
pub struct BertSentimentClassifier {
    model: Arc<Mutex<SentimentModel>>,
}

impl std::fmt::Debug for BertSentimentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertSentimentClassifier")
            .field("model", &"<SentimentModel>")
            .finish()
    }
}

impl BertSentimentClassifier {
    /// Load the model. Downloads weights on first run.
    ///
    /// # Errors
    /// Returns an error when the model cannot be created.
    pub fn new(device: Device) -> Result<Self> {
        let model = std::thread::spawn(move || {
            let config = SentimentConfig {
                device,
                ..SentimentConfig::default()
            };
            SentimentModel::new(config)
        })
        .join()
        .map_err(|_| anyhow!("failed to join sentiment model loader thread"))??;
        info!(?device, classes = 2, "sentiment model loaded; neutral votes unavailable");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl SentimentClassifier for BertSentimentClassifier {
    async fn classify_sentiment(&self, text: &str) -> Result<SentimentPrediction> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();
        let sentiment = tokio::task::spawn_blocking(move || {
            let model = model.blocking_lock();
            model.predict([text.as_str()])
        })
        .await
        .context("failed to join sentiment task")?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("sentiment model returned no prediction"))?;

        let raw_label = match sentiment.polarity {
            SentimentPolarity::Positive => "POSITIVE",
            SentimentPolarity::Negative => "NEGATIVE",
        };
        let label = SentimentLabel::from_raw(raw_label)
            .ok_or_else(|| anyhow!("unmapped sentiment label {raw_label}"))?;
        #[allow(clippy::cast_possible_truncation)]
        let confidence = sentiment.score as f32;
        Ok(SentimentPrediction::new(label, confidence, raw_label))
    }
}

/// Zero-shot topic model scoring every catalog topic independently.
#[derive(Clone)]
pub struct BertTopicClassifier {
    model: Arc<Mutex<ZeroShotClassificationModel>>,
    hypotheses: Arc<Vec<String>>,
}

impl std::fmt::Debug for BertTopicClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertTopicClassifier")
            .field("model", &"<ZeroShotClassificationModel>")
            .field("hypotheses", &self.hypotheses)
            .finish()
    }
}

impl BertTopicClassifier {
    /// # Errors
    /// Returns an error when the model cannot be created.
    pub fn new(device: Device, catalog: &TopicCatalog) -> Result<Self> {
        let model = std::thread::spawn(move || {
            let config = ZeroShotClassificationConfig {
                device,
                ..ZeroShotClassificationConfig::default()
            };
            ZeroShotClassificationModel::new(config)
        })
        .join()
        .map_err(|_| anyhow!("failed to join zero-shot model loader thread"))??;
        info!(?device, topics = catalog.len(), "zero-shot topic model loaded");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            hypotheses: Arc::new(catalog.hypotheses()),
        })
    }
}

#[async_trait]
impl TopicClassifier for BertTopicClassifier {
    async fn classify_topics(&self, text: &str) -> Result<Vec<ThemeScore>> {
        let model = Arc::clone(&self.model);
        let hypotheses = Arc::clone(&self.hypotheses);
        let text = text.to_string();
        let labels = tokio::task::spawn_blocking(move || {
            let model = model.blocking_lock();
            let candidates: Vec<&str> = hypotheses.iter().map(String::as_str).collect();
            model.predict_multilabel([text.as_str()], &candidates, None, ZERO_SHOT_MAX_LENGTH)
        })
        .await
        .context("failed to join zero-shot task")?
        .context("zero-shot inference failed")?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("zero-shot model returned no labels"))?;

        debug!(count = labels.len(), "zero-shot labels received");
        #[allow(clippy::cast_possible_truncation)]
        let scores = labels
            .into_iter()
            .map(|label| ThemeScore::new(label.text, label.score as f32))
            .collect();
        Ok(scores)
    }
}
