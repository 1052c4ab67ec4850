//! 正解カテゴリ別の層化サンプリング。固定シードで再現可能。
use std::collections::BTreeMap;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::info;

use crate::dataset::DatasetRow;
use crate::util::text::category_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingSettings {
    pub per_category: usize,
    pub seed: u64,
}

/// カテゴリごとに最大 `per_category` 行を選び、全体をシャッフルして返す。
///
/// Categories are grouped by their comparison key and visited in key order so
/// the same seed always yields the same rows in the same order.
#[must_use]
pub fn stratified_sample(rows: Vec<DatasetRow>, settings: &SamplingSettings) -> Vec<DatasetRow> {
    let input = rows.len();
    let mut groups: BTreeMap<String, Vec<DatasetRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry(category_key(&row.ground_truth_category))
            .or_default()
            .push(row);
    }

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let category_count = groups.len();
    let mut sampled = Vec::new();
    for (_, mut group) in groups {
        group.shuffle(&mut rng);
        group.truncate(settings.per_category);
        sampled.extend(group);
    }
    sampled.shuffle(&mut rng);

    info!(
        input,
        sampled = sampled.len(),
        categories = category_count,
        per_category = settings.per_category,
        seed = settings.seed,
        "stratified sample drawn"
    );
    sampled
}
