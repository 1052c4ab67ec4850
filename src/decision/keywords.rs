//! 頻度順の簡易キーワード抽出。判定には使わず、確認用に出力へ載せるだけ。
use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

use crate::util::text::word_tokens;

const MIN_KEYWORD_CHARS: usize = 3;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Turkish
        "acaba", "ama", "ancak", "artık", "bana", "bazı", "belki", "ben", "beni", "benim",
        "bile", "bir", "biraz", "birçok", "biri", "birkaç", "bize", "bizim", "böyle", "bu",
        "buna", "bunu", "bunun", "burada", "çok", "çünkü", "daha", "değil", "diye", "gibi",
        "hem", "hep", "hepsi", "her", "hiç", "için", "ile", "ise", "kadar", "kendi", "kez",
        "kim", "mı", "mi", "mu", "mü", "nasıl", "ne", "neden", "nerede", "niye", "olan",
        "olarak", "oldu", "olduğu", "olur", "onu", "onun", "orada", "şey", "şimdi", "şöyle",
        "şu", "şunu", "tüm", "var", "veya", "ve", "yani", "yok", "zaten", "sonra", "önce",
        "bunlar", "onlar", "siz", "sen", "biz", "sadece", "gerçekten", "bence",
        // English
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her",
        "was", "one", "our", "out", "has", "have", "this", "that", "with", "from", "they",
        "will", "would", "there", "their", "what", "about", "which", "when", "been", "were",
        "just", "like", "very", "really", "into", "than", "then", "them", "some", "also",
    ]
    .into_iter()
    .collect()
});

fn is_candidate(token: &str) -> bool {
    token.chars().count() >= MIN_KEYWORD_CHARS
        && !token.chars().all(|c| c.is_numeric())
        && !STOP_WORDS.contains(token)
}

/// 本文から最大 `limit` 個のキーワードを抽出する。
///
/// Ranked by frequency, ties broken by first occurrence.
#[must_use]
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, token) in word_tokens(text).into_iter().enumerate() {
        if !is_candidate(&token) {
            continue;
        }
        counts
            .entry(token)
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, position));
    }
    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(token, (count, first))| (token, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(token, _, _)| token)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_by_frequency_then_first_occurrence() {
        let keywords = extract_keywords(
            "Enflasyon yine arttı. Maaş yetmiyor, enflasyon bitmiyor ve kira da arttı.",
            3,
        );
        assert_eq!(keywords, vec!["enflasyon", "arttı", "yine"]);
    }

    #[test]
    fn drops_stop_words_short_tokens_and_numbers() {
        let keywords = extract_keywords("Bu bir 2024 ve de the film", 6);
        assert_eq!(keywords, vec!["film"]);
    }

    #[test]
    fn respects_limit_and_empty_input() {
        assert!(extract_keywords("", 6).is_empty());
        let keywords = extract_keywords("alfa beta gama delta epsilon zeta eta teta", 6);
        assert_eq!(keywords.len(), 6);
    }
}
