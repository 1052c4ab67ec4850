//! 正解ラベルの正規化。
//!
//! Ground-truth sentiment arrives as integers (`0/1/2`), signed values
//! (`-1/+1`), floats from spreadsheets (`2.0`) or free text in Turkish and
//! English. Everything is folded into [`SentimentCode`]; anything unrecognised
//! becomes [`SentimentCode::Invalid`] instead of an error.
//!
//! Bare integers are ambiguous between the `0/1/2` and `-1/0/1` encodings, so
//! the encoding is decided once per dataset column with [`LabelScheme::detect`].
use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::classification::SentimentLabel;
use crate::util::text::fold_case;

pub use crate::util::text::category_key;

/// 整数ラベルの読み方。データセットの列ごとに決まる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LabelScheme {
    /// `0 = negative`, `1 = neutral`, `2 = positive`。
    #[default]
    Coded,
    /// `-1 = negative`, `0 = neutral`, `1 = positive`。
    Signed,
}

impl LabelScheme {
    /// 列の値全体から読み方を推定する。
    ///
    /// `-1` か `+` 付きの値があり `2` が一つも無ければ符号付き。`-1` と `2`
    /// が混在する列は判別できないので、警告を出して `Coded` のまま読む。
    #[must_use]
    pub fn detect<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let mut signed_hint = false;
        let mut has_two = false;
        let mut has_minus_one = false;
        for value in values {
            if let Value::String(text) = value {
                signed_hint |= text.trim().starts_with('+');
            }
            match integer_label(value) {
                Some(-1) => has_minus_one = true,
                Some(2) => has_two = true,
                _ => {}
            }
        }
        if has_minus_one && has_two {
            warn!(
                "sentiment column mixes -1 and 2; reading integers as 0/1/2 with -1 as negative"
            );
            return Self::Coded;
        }
        if (has_minus_one || signed_hint) && !has_two {
            Self::Signed
        } else {
            Self::Coded
        }
    }
}

/// 整数として読める値 (整数、整数値の小数、`+` の無い数値文字列)。
fn integer_label(value: &Value) -> Option<i64> {
    let float = match value {
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                return Some(integer);
            }
            number.as_f64()?
        }
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !float.is_finite() || float.fract() != 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some(float as i64)
}

/// 3値の正規化済み感情コード。0 = negative, 1 = neutral, 2 = positive。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentimentCode {
    Negative,
    Neutral,
    Positive,
    /// 認識できなかった値。精度計算から除外される。
    Invalid,
}

impl SentimentCode {
    /// 任意の JSON 値を `0/1/2` の読み方で正規化する。失敗しない。
    #[must_use]
    pub fn normalize(value: &Value) -> Self {
        Self::normalize_with(value, LabelScheme::Coded)
    }

    /// 列の読み方を指定して正規化する。
    #[must_use]
    pub fn normalize_with(value: &Value, scheme: LabelScheme) -> Self {
        match value {
            Value::Number(number) => {
                if let Some(integer) = number.as_i64() {
                    Self::from_integer_in(integer, scheme)
                } else {
                    number
                        .as_f64()
                        .map_or(Self::Invalid, |float| Self::from_float(float, scheme))
                }
            }
            Value::String(text) => Self::from_text_in(text, scheme),
            _ => Self::Invalid,
        }
    }

    /// 文字列表現を正規化する。`+` で始まる値は符号付きの数値として読む。
    #[must_use]
    pub fn from_text(raw: &str) -> Self {
        Self::from_text_in(raw, LabelScheme::Coded)
    }

    fn from_text_in(raw: &str, scheme: LabelScheme) -> Self {
        let trimmed = raw.trim();
        if let Some(signed) = trimmed.strip_prefix('+') {
            return match signed.trim().parse::<f64>() {
                Ok(value) if value.is_finite() && value > 0.0 => Self::Positive,
                Ok(value) if value == 0.0 => Self::Neutral,
                _ => Self::Invalid,
            };
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            return Self::from_float(value, scheme);
        }
        match fold_case(trimmed).as_str() {
            "positive" | "pos" | "olumlu" | "pozitif" | "positif" | "label_2" => Self::Positive,
            "negative" | "neg" | "olumsuz" | "negatif" | "label_0" => Self::Negative,
            "neutral" | "neu" | "nötr" | "notr" | "tarafsız" | "tarafsiz" | "label_1" => {
                Self::Neutral
            }
            _ => Self::Invalid,
        }
    }

    /// 整数コード。`-1` は符号付き表記の negative として扱う。
    #[must_use]
    pub fn from_integer(value: i64) -> Self {
        match value {
            -1 | 0 => Self::Negative,
            1 => Self::Neutral,
            2 => Self::Positive,
            _ => Self::Invalid,
        }
    }

    /// 読み方を指定した整数コード。
    #[must_use]
    pub fn from_integer_in(value: i64, scheme: LabelScheme) -> Self {
        match scheme {
            LabelScheme::Coded => Self::from_integer(value),
            LabelScheme::Signed => match value {
                -1 => Self::Negative,
                0 => Self::Neutral,
                1 => Self::Positive,
                _ => Self::Invalid,
            },
        }
    }

    fn from_float(value: f64, scheme: LabelScheme) -> Self {
        if !value.is_finite() || value.fract() != 0.0 {
            return Self::Invalid;
        }
        #[allow(clippy::cast_possible_truncation)]
        Self::from_integer_in(value as i64, scheme)
    }

    /// 数値コード。`Invalid` は `None`。
    #[must_use]
    pub fn code(self) -> Option<u8> {
        match self {
            Self::Negative => Some(0),
            Self::Neutral => Some(1),
            Self::Positive => Some(2),
            Self::Invalid => None,
        }
    }

    /// 行列の添字として使う位置。
    #[must_use]
    pub fn index(self) -> Option<usize> {
        self.code().map(usize::from)
    }

    /// 出力用の JSON 値。再度 [`SentimentCode::normalize`] に通しても同じコードになる。
    #[must_use]
    pub fn to_value(self) -> Value {
        self.code().map_or(Value::Null, Value::from)
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

impl From<SentimentLabel> for SentimentCode {
    fn from(label: SentimentLabel) -> Self {
        match label {
            SentimentLabel::Negative => Self::Negative,
            SentimentLabel::Neutral => Self::Neutral,
            SentimentLabel::Positive => Self::Positive,
        }
    }
}

impl fmt::Display for SentimentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Positive => "positive",
            Self::Invalid => "invalid",
        })
    }
}

/// 正規化キーが一致するか。空のキー同士は一致とみなさない。
#[must_use]
pub fn categories_match(left: &str, right: &str) -> bool {
    let left = category_key(left);
    !left.is_empty() && left == category_key(right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!("2"))]
    #[case(json!(2))]
    #[case(json!(2.0))]
    #[case(json!("positive"))]
    #[case(json!("pos"))]
    #[case(json!("olumlu"))]
    #[case(json!(" Pozitif "))]
    #[case(json!("+1"))]
    fn positive_encodings_agree(#[case] value: Value) {
        assert_eq!(SentimentCode::normalize(&value), SentimentCode::Positive);
    }

    #[rstest]
    #[case(json!(0), SentimentCode::Negative)]
    #[case(json!(-1), SentimentCode::Negative)]
    #[case(json!("-1"), SentimentCode::Negative)]
    #[case(json!("OLUMSUZ"), SentimentCode::Negative)]
    #[case(json!(1), SentimentCode::Neutral)]
    #[case(json!("+0"), SentimentCode::Neutral)]
    #[case(json!("Nötr"), SentimentCode::Neutral)]
    #[case(json!("tarafsız"), SentimentCode::Neutral)]
    fn other_encodings(#[case] value: Value, #[case] expected: SentimentCode) {
        assert_eq!(SentimentCode::normalize(&value), expected);
    }

    #[rstest]
    #[case(json!("belki"))]
    #[case(json!(""))]
    #[case(json!(7))]
    #[case(json!(1.5))]
    #[case(json!("+abc"))]
    #[case(json!(null))]
    #[case(json!(true))]
    #[case(json!([2]))]
    fn unrecognised_values_are_invalid(#[case] value: Value) {
        let code = SentimentCode::normalize(&value);
        assert_eq!(code, SentimentCode::Invalid);
        assert!(!code.is_valid());
        assert_eq!(code.code(), None);
    }

    #[test]
    fn normalizing_canonical_values_is_idempotent() {
        for code in [
            SentimentCode::Negative,
            SentimentCode::Neutral,
            SentimentCode::Positive,
            SentimentCode::Invalid,
        ] {
            assert_eq!(SentimentCode::normalize(&code.to_value()), code);
            if let Some(numeric) = code.code() {
                assert_eq!(SentimentCode::from_text(&numeric.to_string()), code);
            }
        }
    }

    #[rstest]
    #[case(vec![json!(-1), json!(0), json!(1)], LabelScheme::Signed)]
    #[case(vec![json!("-1"), json!("0"), json!(0)], LabelScheme::Signed)]
    #[case(vec![json!("+1"), json!(0), json!(1)], LabelScheme::Signed)]
    #[case(vec![json!(0), json!(1), json!(2)], LabelScheme::Coded)]
    #[case(vec![json!(0), json!(1), json!("olumlu")], LabelScheme::Coded)]
    #[case(vec![json!(-1), json!(1), json!(2)], LabelScheme::Coded)]
    #[case(vec![], LabelScheme::Coded)]
    fn label_scheme_is_detected_per_column(
        #[case] column: Vec<Value>,
        #[case] expected: LabelScheme,
    ) {
        assert_eq!(LabelScheme::detect(&column), expected);
    }

    #[rstest]
    #[case(json!(-1), SentimentCode::Negative)]
    #[case(json!(0), SentimentCode::Neutral)]
    #[case(json!("0"), SentimentCode::Neutral)]
    #[case(json!(1), SentimentCode::Positive)]
    #[case(json!(1.0), SentimentCode::Positive)]
    #[case(json!("+1"), SentimentCode::Positive)]
    #[case(json!("olumsuz"), SentimentCode::Negative)]
    #[case(json!(2), SentimentCode::Invalid)]
    fn signed_column_reads_zero_as_neutral(#[case] value: Value, #[case] expected: SentimentCode) {
        assert_eq!(
            SentimentCode::normalize_with(&value, LabelScheme::Signed),
            expected
        );
    }

    #[test]
    fn predicted_labels_map_to_codes() {
        assert_eq!(SentimentCode::from(SentimentLabel::Positive).code(), Some(2));
        assert_eq!(SentimentCode::from(SentimentLabel::Neutral).code(), Some(1));
        assert_eq!(SentimentCode::from(SentimentLabel::Negative).code(), Some(0));
    }

    #[test]
    fn categories_compare_by_key() {
        assert!(categories_match("Sağlık", "saglik"));
        assert!(categories_match("İş Dünyası", "is dunyasi"));
        assert!(!categories_match("Spor", "Sanat"));
        assert!(!categories_match("", ""));
    }
}
