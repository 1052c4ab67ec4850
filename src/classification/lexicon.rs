//! 極性フレーズ辞書とオフライン分類器。
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{SentimentClassifier, SentimentLabel, SentimentPrediction, ThemeScore, TopicClassifier};
use crate::util::text::fold_case;

/// 強い極性を持つ既定フレーズ（トルコ語・英語）。
pub const DEFAULT_POLARITY_PHRASES: &[(&str, SentimentLabel)] = &[
    ("harika", SentimentLabel::Positive),
    ("mükemmel", SentimentLabel::Positive),
    ("muhteşem", SentimentLabel::Positive),
    ("bayıldım", SentimentLabel::Positive),
    ("çok güzel", SentimentLabel::Positive),
    ("çok iyi", SentimentLabel::Positive),
    ("efsane", SentimentLabel::Positive),
    ("süper", SentimentLabel::Positive),
    ("şahane", SentimentLabel::Positive),
    ("tavsiye ederim", SentimentLabel::Positive),
    ("great", SentimentLabel::Positive),
    ("excellent", SentimentLabel::Positive),
    ("amazing", SentimentLabel::Positive),
    ("awesome", SentimentLabel::Positive),
    ("wonderful", SentimentLabel::Positive),
    ("love it", SentimentLabel::Positive),
    ("berbat", SentimentLabel::Negative),
    ("rezalet", SentimentLabel::Negative),
    ("iğrenç", SentimentLabel::Negative),
    ("nefret", SentimentLabel::Negative),
    ("çok kötü", SentimentLabel::Negative),
    ("saçmalık", SentimentLabel::Negative),
    ("felaket", SentimentLabel::Negative),
    ("rezil", SentimentLabel::Negative),
    ("tavsiye etmem", SentimentLabel::Negative),
    ("hayal kırıklığı", SentimentLabel::Negative),
    ("terrible", SentimentLabel::Negative),
    ("awful", SentimentLabel::Negative),
    ("horrible", SentimentLabel::Negative),
    ("disgusting", SentimentLabel::Negative),
    ("worst", SentimentLabel::Negative),
    ("hate", SentimentLabel::Negative),
];

/// トピックごとの既定キーワード。
pub const DEFAULT_TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Teknoloji",
        &["teknoloji", "telefon", "bilgisayar", "yazılım", "internet", "uygulama", "technology", "software", "computer"],
    ),
    (
        "Politika",
        &["seçim", "hükümet", "meclis", "parti", "bakan", "siyaset", "politika", "election", "government"],
    ),
    (
        "Spor",
        &["maç", "futbol", "basketbol", "takım", "gol", "lig", "şampiyon", "football", "match"],
    ),
    (
        "Eğitim",
        &["okul", "üniversite", "öğrenci", "öğretmen", "sınav", "ders", "school", "university", "student"],
    ),
    (
        "Sağlık",
        &["hastane", "doktor", "ilaç", "sağlık", "hastalık", "tedavi", "hospital", "doctor", "health"],
    ),
    (
        "Ekonomi",
        &["ekonomi", "enflasyon", "dolar", "faiz", "borsa", "fiyat", "maaş", "economy", "inflation"],
    ),
    ("Kültür", &["kültür", "gelenek", "bayram", "festival", "culture", "tradition"]),
    ("Sanat", &["sanat", "resim", "sergi", "tiyatro", "müzik", "painting", "theatre"]),
    ("Bilim", &["bilim", "araştırma", "deney", "uzay", "science", "research"]),
    ("Eğlence", &["film", "dizi", "oyun", "eğlence", "komedi", "movie", "series"]),
    (
        "Sosyal Medya",
        &["twitter", "instagram", "tiktok", "youtube", "takipçi", "sosyal medya", "paylaşım"],
    ),
    (
        "İş Dünyası",
        &["şirket", "iş yeri", "patron", "mülakat", "kariyer", "çalışan", "company", "career"],
    ),
    ("Çevre", &["çevre", "iklim", "orman", "kirlilik", "environment", "climate", "pollution"]),
    ("Tarih", &["tarih", "osmanlı", "savaş", "imparatorluk", "history", "empire"]),
];

/// 極性別のヒット数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LexiconHits {
    pub positive: usize,
    pub negative: usize,
}

impl LexiconHits {
    #[must_use]
    pub fn for_label(&self, label: SentimentLabel) -> usize {
        match label {
            SentimentLabel::Positive => self.positive,
            SentimentLabel::Negative => self.negative,
            SentimentLabel::Neutral => 0,
        }
    }
}

fn build_matcher<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<AhoCorasick> {
    let folded: Vec<String> = patterns.into_iter().map(fold_case).collect();
    AhoCorasickBuilder::new()
        .match_kind(MatchKind::LeftmostLongest)
        .build(&folded)
        .context("failed to build phrase matcher")
}

/// 左側が単語境界であるか。右側は接尾辞（`berbattı` など）を許す。
fn starts_at_word_boundary(text: &str, start: usize) -> bool {
    !text[..start]
        .chars()
        .next_back()
        .is_some_and(char::is_alphanumeric)
}

/// 極性フレーズの照合器。
#[derive(Debug, Clone)]
pub struct PolarityLexicon {
    matcher: AhoCorasick,
    polarity: Vec<SentimentLabel>,
}

impl PolarityLexicon {
    /// # Errors
    /// フレーズから照合器を構築できない場合。
    pub fn new(entries: &[(&str, SentimentLabel)]) -> Result<Self> {
        let matcher = build_matcher(entries.iter().map(|(phrase, _)| *phrase))?;
        let polarity = entries.iter().map(|(_, label)| *label).collect();
        Ok(Self { matcher, polarity })
    }

    /// # Errors
    /// 既定辞書の構築に失敗した場合。
    pub fn forum_default() -> Result<Self> {
        Self::new(DEFAULT_POLARITY_PHRASES)
    }

    #[must_use]
    pub fn hits(&self, text: &str) -> LexiconHits {
        let folded = fold_case(text);
        let mut hits = LexiconHits::default();
        for found in self.matcher.find_iter(&folded) {
            if !starts_at_word_boundary(&folded, found.start()) {
                continue;
            }
            match self.polarity.get(found.pattern().as_usize()) {
                Some(SentimentLabel::Positive) => hits.positive += 1,
                Some(SentimentLabel::Negative) => hits.negative += 1,
                _ => {}
            }
        }
        hits
    }
}

/// 辞書照合だけで動くオフライン分類器。モデル無しのビルドで既定として使う。
#[derive(Debug, Clone)]
pub struct LexiconClassifier {
    polarity: PolarityLexicon,
    topic_matcher: AhoCorasick,
    pattern_topic: Vec<usize>,
    topics: Vec<String>,
}

impl LexiconClassifier {
    /// # Errors
    /// 照合器の構築に失敗した場合。
    pub fn new(polarity: PolarityLexicon, topic_keywords: &[(&str, &[&str])]) -> Result<Self> {
        let topics = topic_keywords
            .iter()
            .map(|(topic, _)| (*topic).to_string())
            .collect();
        let mut patterns = Vec::new();
        let mut pattern_topic = Vec::new();
        for (topic_idx, (_, keywords)) in topic_keywords.iter().enumerate() {
            for keyword in *keywords {
                patterns.push(*keyword);
                pattern_topic.push(topic_idx);
            }
        }
        let topic_matcher = build_matcher(patterns)?;
        Ok(Self {
            polarity,
            topic_matcher,
            pattern_topic,
            topics,
        })
    }

    /// # Errors
    /// 既定辞書の構築に失敗した場合。
    pub fn forum_default() -> Result<Self> {
        Self::new(PolarityLexicon::forum_default()?, DEFAULT_TOPIC_KEYWORDS)
    }
}

#[async_trait]
impl SentimentClassifier for LexiconClassifier {
    async fn classify_sentiment(&self, text: &str) -> Result<SentimentPrediction> {
        let hits = self.polarity.hits(text);
        let (label, margin) = if hits.positive > hits.negative {
            (SentimentLabel::Positive, hits.positive - hits.negative)
        } else if hits.negative > hits.positive {
            (SentimentLabel::Negative, hits.negative - hits.positive)
        } else {
            (SentimentLabel::Neutral, 0)
        };
        #[allow(clippy::cast_precision_loss)]
        let confidence = if label.is_polar() {
            (0.6 + 0.1 * margin as f32).min(0.95)
        } else {
            0.55
        };
        Ok(SentimentPrediction::new(
            label,
            confidence,
            label.as_str().to_uppercase(),
        ))
    }
}

#[async_trait]
impl TopicClassifier for LexiconClassifier {
    async fn classify_topics(&self, text: &str) -> Result<Vec<ThemeScore>> {
        let folded = fold_case(text);
        let mut counts = vec![0usize; self.topics.len()];
        for found in self.topic_matcher.find_iter(&folded) {
            if !starts_at_word_boundary(&folded, found.start()) {
                continue;
            }
            if let Some(topic_idx) = self.pattern_topic.get(found.pattern().as_usize()) {
                counts[*topic_idx] += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let scores = self
            .topics
            .iter()
            .zip(counts)
            .map(|(topic, count)| {
                let hits = count as f32;
                ThemeScore::new(topic.clone(), hits / (hits + 1.0))
            })
            .collect();
        Ok(scores)
    }
}
