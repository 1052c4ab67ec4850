//! テキスト処理ユーティリティ。
//!
//! 文分割、大文字小文字の畳み込み、カテゴリ比較キーの生成を提供します。
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// テキストを文に分割する。
///
/// Unicode UAX#29に準拠した文境界検出を使用します。
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    text.unicode_sentences()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 小文字化する。
///
/// `İ` は結合ドット付きの `i̇` ではなく素の `i` に畳み込む（トルコ語入力向け）。
#[must_use]
pub fn fold_case(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == 'İ' {
            folded.push('i');
        } else {
            folded.extend(ch.to_lowercase());
        }
    }
    folded
}

/// 単語トークン（小文字化済み）を返す。
#[must_use]
pub fn word_tokens(text: &str) -> Vec<String> {
    text.unicode_words().map(fold_case).collect()
}

/// 末尾 `max_chars` 文字だけを残す。
#[must_use]
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

/// カテゴリ文字列を比較用キーに変換する。
///
/// 小文字化、引用符の除去、記号の空白化、NFD分解後のASCII以外の除去、空白の正規化を行う。
/// 表記揺れ（`Sağlık` / `saglik` / `"Saglik"`）は同じキーになる。
#[must_use]
pub fn category_key(raw: &str) -> String {
    let folded: String = fold_case(raw.trim())
        .chars()
        .map(|ch| match ch {
            'ı' => 'i',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{00B4}' | '\u{02BC}' | '`' => {
                '\''
            }
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
            other => other,
        })
        .collect();

    let ascii: String = folded
        .nfd()
        .filter(char::is_ascii)
        .filter(|ch| *ch != '\'' && *ch != '"')
        .map(|ch| if ch.is_ascii_punctuation() { ' ' } else { ch })
        .collect();

    ascii.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sentences_handles_simple_text() {
        let text = "First sentence. Second sentence! Third sentence?";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "First sentence.");
        assert_eq!(sentences[1], "Second sentence!");
        assert_eq!(sentences[2], "Third sentence?");
    }

    #[test]
    fn split_sentences_handles_turkish() {
        let text = "Film çok güzeldi. Sonu biraz uzadı! Yine de izlenir.";
        assert_eq!(split_sentences(text).len(), 3);
    }

    #[test]
    fn split_sentences_filters_empty() {
        let text = "Sentence one.  \n\n  Sentence two.";
        assert_eq!(split_sentences(text).len(), 2);
        assert!(split_sentences("   \n ").is_empty());
    }

    #[test]
    fn fold_case_maps_dotted_capital_i() {
        assert_eq!(fold_case("İYİ"), "iyi");
        assert_eq!(fold_case("Harika"), "harika");
    }

    #[test]
    fn tail_chars_keeps_suffix_on_char_boundary() {
        assert_eq!(tail_chars("çğüşöı", 3), "şöı");
        assert_eq!(tail_chars("short", 100), "short");
        assert_eq!(tail_chars("abc", 0), "");
    }

    #[test]
    fn category_key_strips_diacritics_and_quotes() {
        assert_eq!(category_key("Sağlık"), "saglik");
        assert_eq!(category_key("  \u{201C}SAĞLIK\u{201D} "), "saglik");
        assert_eq!(category_key("İş Dünyası"), "is dunyasi");
        assert_eq!(category_key("is-dunyasi"), "is dunyasi");
        assert_eq!(category_key("Kültür\u{2019}"), "kultur");
    }

    #[test]
    fn category_key_is_idempotent() {
        for raw in ["Sosyal Medya", "Çevre", "Eğlence!", "Bilim & Teknoloji"] {
            let once = category_key(raw);
            assert_eq!(category_key(&once), once);
        }
    }
}
