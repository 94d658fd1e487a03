use std::collections::BTreeMap;

use pick_core::{SetupKey, SetupStats, TrackedCandidate};

/// Realised statistics per setup bucket, from CLOSED outcomes only.
///
/// The bucket direction is the tracked direction (the pick's, or the
/// prescreen bias for non-picks).
pub fn setup_stats(history: &[TrackedCandidate]) -> BTreeMap<SetupKey, SetupStats> {
    let mut acc: BTreeMap<SetupKey, (usize, usize, f64)> = BTreeMap::new();
    for row in history.iter().filter(|r| r.outcome.is_closed()) {
        let key = SetupKey::of(&row.candidate, row.outcome.direction);
        let entry = acc.entry(key).or_insert((0, 0, 0.0));
        entry.0 += 1;
        if row.outcome.hit_medium {
            entry.1 += 1;
        }
        entry.2 += row.outcome.max_gain_pct;
    }

    acc.into_iter()
        .map(|(key, (samples, hits, gain_sum))| {
            (
                key,
                SetupStats {
                    key,
                    samples,
                    medium_hit_rate: hits as f64 / samples as f64,
                    avg_max_gain_pct: gain_sum / samples as f64,
                },
            )
        })
        .collect()
}

/// Share of closed outcomes that reached their medium target.
pub fn medium_hit_rate<'a>(rows: impl Iterator<Item = &'a TrackedCandidate>) -> Option<f64> {
    let (n, hits) = rows
        .filter(|r| r.outcome.is_closed())
        .fold((0usize, 0usize), |(n, h), r| (n + 1, h + r.outcome.hit_medium as usize));
    (n > 0).then(|| hits as f64 / n as f64)
}
