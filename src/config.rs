use std::{
    env,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use crate::decision::{RecencyBands, SentimentSettings, ThemeSettings};
use crate::pipeline::{PipelineSettings, SamplingSettings};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    item_timeout: Duration,
    checkpoint_every: NonZeroUsize,
    checkpoint_path: PathBuf,
    nlp_device: Option<i64>,
    lexicon_override: bool,
    recency_weights: RecencyBands,
    max_sentences: NonZeroUsize,
    tie_break_gap: f32,
    polarity_floor: f32,
    neutral_ceiling: f32,
    theme_score_threshold: f32,
    theme_ambiguity_margin: f32,
    theme_max_chars: NonZeroUsize,
    sample_per_category: Option<NonZeroUsize>,
    sample_seed: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から解析ワーカーの設定値を読み込み、検証する。
    ///
    /// すべての値に既定値があるため、未設定でも起動できる。
    ///
    /// # Errors
    /// 数値・真偽値のパースや範囲チェックに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        // Batch pipeline
        let item_timeout = parse_duration_secs("ANALYZER_ITEM_TIMEOUT_SECS", 60)?;
        let checkpoint_every = parse_non_zero_usize("ANALYZER_CHECKPOINT_EVERY", 50)?;
        let checkpoint_path = PathBuf::from(
            env::var("ANALYZER_CHECKPOINT_PATH")
                .unwrap_or_else(|_| "analysis_checkpoint.json".to_string()),
        );
        let nlp_device = parse_device("NLP_DEVICE")?;

        // Sentiment aggregation
        let lexicon_override = parse_bool("SENTIMENT_LEXICON_OVERRIDE", false)?;
        let recency_weights = parse_recency_weights("SENTIMENT_RECENCY_WEIGHTS", "1.5,2.0,2.5")?;
        let max_sentences = parse_non_zero_usize("SENTIMENT_MAX_SENTENCES", 8)?;
        let tie_break_gap = parse_unit_f32("SENTIMENT_TIE_BREAK_GAP", 0.35)?;
        let polarity_floor = parse_unit_f32("SENTIMENT_POLARITY_FLOOR", 0.65)?;
        let neutral_ceiling = parse_unit_f32("SENTIMENT_NEUTRAL_CEILING", 0.85)?;

        // Theme selection
        let theme_score_threshold = parse_unit_f32("THEME_SCORE_THRESHOLD", 0.3)?;
        let theme_ambiguity_margin = parse_unit_f32("THEME_AMBIGUITY_MARGIN", 0.1)?;
        let theme_max_chars = parse_non_zero_usize("THEME_MAX_CHARS", 2000)?;

        // Sampling
        let sample_per_category = parse_optional_count("SAMPLE_PER_CATEGORY")?;
        let sample_seed = parse_u64("SAMPLE_SEED", 42)?;

        Ok(Self {
            item_timeout,
            checkpoint_every,
            checkpoint_path,
            nlp_device,
            lexicon_override,
            recency_weights,
            max_sentences,
            tie_break_gap,
            polarity_floor,
            neutral_ceiling,
            theme_score_threshold,
            theme_ambiguity_margin,
            theme_max_chars,
            sample_per_category,
            sample_seed,
        })
    }

    #[must_use]
    pub fn item_timeout(&self) -> Duration {
        self.item_timeout
    }

    #[must_use]
    pub fn checkpoint_every(&self) -> NonZeroUsize {
        self.checkpoint_every
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// `None` は自動選択、`-1` は CPU、`n` は CUDA デバイス n。
    #[must_use]
    pub fn nlp_device(&self) -> Option<i64> {
        self.nlp_device
    }

    #[must_use]
    pub fn lexicon_override(&self) -> bool {
        self.lexicon_override
    }

    #[must_use]
    pub fn recency_weights(&self) -> RecencyBands {
        self.recency_weights
    }

    #[must_use]
    pub fn max_sentences(&self) -> NonZeroUsize {
        self.max_sentences
    }

    #[must_use]
    pub fn tie_break_gap(&self) -> f32 {
        self.tie_break_gap
    }

    #[must_use]
    pub fn polarity_floor(&self) -> f32 {
        self.polarity_floor
    }

    #[must_use]
    pub fn neutral_ceiling(&self) -> f32 {
        self.neutral_ceiling
    }

    #[must_use]
    pub fn theme_score_threshold(&self) -> f32 {
        self.theme_score_threshold
    }

    #[must_use]
    pub fn theme_ambiguity_margin(&self) -> f32 {
        self.theme_ambiguity_margin
    }

    #[must_use]
    pub fn theme_max_chars(&self) -> NonZeroUsize {
        self.theme_max_chars
    }

    #[must_use]
    pub fn sample_per_category(&self) -> Option<NonZeroUsize> {
        self.sample_per_category
    }

    #[must_use]
    pub fn sample_seed(&self) -> u64 {
        self.sample_seed
    }

    #[must_use]
    pub fn sentiment_settings(&self) -> SentimentSettings {
        SentimentSettings {
            max_sentences: self.max_sentences.get(),
            recency: self.recency_weights,
            tie_break_gap: self.tie_break_gap,
            polarity_floor: self.polarity_floor,
            neutral_ceiling: self.neutral_ceiling,
            lexicon_override: self.lexicon_override,
            ..SentimentSettings::default()
        }
    }

    /// テーマ側の文窓は感情側と同じ長さにそろえる。
    #[must_use]
    pub fn theme_settings(&self) -> ThemeSettings {
        ThemeSettings {
            score_threshold: self.theme_score_threshold,
            ambiguity_margin: self.theme_ambiguity_margin,
            max_chars: self.theme_max_chars.get(),
            window_sentences: self.max_sentences.get(),
            ..ThemeSettings::default()
        }
    }

    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            item_timeout: self.item_timeout,
            checkpoint_every: self.checkpoint_every,
            sampling: self.sample_per_category.map(|per_category| SamplingSettings {
                per_category: per_category.get(),
                seed: self.sample_seed,
            }),
        }
    }
}

fn invalid(name: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        source: anyhow::anyhow!(message.into()),
    }
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    NonZeroUsize::new(parsed).ok_or_else(|| invalid(name, "must be greater than zero"))
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let secs = parse_u64(name, default_secs)?;
    if secs == 0 {
        return Err(invalid(name, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f32_value(name: &'static str, raw: &str) -> Result<f32, ConfigError> {
    let value = raw.trim().parse::<f32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid(name, format!("not a finite number: {raw}")))
    }
}

/// 0.0..=1.0 の範囲に収まる値。
fn parse_unit_f32(name: &'static str, default: f32) -> Result<f32, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };
    let value = parse_f32_value(name, &raw)?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(invalid(name, format!("value must be between 0 and 1: {raw}")))
    }
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, format!("invalid boolean value: {raw}"))),
    }
}

/// 3つの帯（short, medium, long）をカンマ区切りで受け取る。どれも 1 より大きいこと。
fn parse_recency_weights(name: &'static str, default: &str) -> Result<RecencyBands, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let weights = raw
        .split(',')
        .map(|part| parse_f32_value(name, part))
        .collect::<Result<Vec<f32>, _>>()?;
    let [short, medium, long] = weights.as_slice() else {
        return Err(invalid(
            name,
            format!("expected three comma-separated weights, got {raw}"),
        ));
    };
    if [short, medium, long].iter().any(|weight| **weight <= 1.0) {
        return Err(invalid(name, format!("every weight must be greater than 1: {raw}")));
    }
    Ok(RecencyBands {
        short: *short,
        medium: *medium,
        long: *long,
    })
}

fn parse_device(name: &'static str) -> Result<Option<i64>, ConfigError> {
    let raw = match env::var(name) {
        Ok(raw) => raw,
        Err(_) => return Ok(None),
    };
    match raw.trim().to_lowercase().as_str() {
        "" | "auto" => Ok(None),
        "cpu" => Ok(Some(-1)),
        value => {
            let index = value.parse::<i64>().map_err(|error| ConfigError::Invalid {
                name,
                source: anyhow::Error::new(error),
            })?;
            if index < -1 {
                return Err(invalid(name, format!("device index must be -1 or above: {raw}")));
            }
            Ok(Some(index))
        }
    }
}

/// `none` / 空文字列 はサンプリング無効。
fn parse_optional_count(name: &'static str) -> Result<Option<NonZeroUsize>, ConfigError> {
    let raw = match env::var(name) {
        Ok(raw) => raw,
        Err(_) => return Ok(None),
    };
    match raw.trim().to_lowercase().as_str() {
        "" | "none" | "off" => Ok(None),
        value => {
            let count = value.parse::<usize>().map_err(|error| ConfigError::Invalid {
                name,
                source: anyhow::Error::new(error),
            })?;
            NonZeroUsize::new(count)
                .map(Some)
                .ok_or_else(|| invalid(name, "must be greater than zero or \"none\""))
        }
    }
}
