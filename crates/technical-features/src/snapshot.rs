//! Feature snapshot captured for every symbol considered by the prescreen.

use std::collections::BTreeMap;

use pick_core::adaptive::percentile_rank;
use pick_core::{FeatureSnapshot, FeatureWeights, SymbolData};
use rayon::prelude::*;

use crate::indicators::{atr, momentum_pct, realized_volatility, rsi, sma, support_resistance};

pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const TREND_PERIOD: usize = 20;
pub const PIVOT_LOOKBACK: usize = 30;

/// Build the snapshot for one symbol from its stored window.
/// Returns None when the symbol has no bars.
pub fn compute_snapshot(data: &SymbolData) -> Option<FeatureSnapshot> {
    let last = data.last_bar()?;
    let closes: Vec<f64> = data.bars.iter().map(|b| b.close).collect();

    let volume_window = &data.bars[data.bars.len().saturating_sub(TREND_PERIOD)..];
    let avg_volume_20 =
        volume_window.iter().map(|b| b.volume).sum::<f64>() / volume_window.len() as f64;

    let atr_pct = atr(&data.bars, ATR_PERIOD)
        .last()
        .filter(|_| last.close > 0.0)
        .map(|a| a / last.close * 100.0);

    let sma20_gap_pct = sma(&closes, TREND_PERIOD)
        .last()
        .filter(|s| **s > 0.0)
        .map(|s| (last.close / s - 1.0) * 100.0);

    let levels = support_resistance(&data.bars, PIVOT_LOOKBACK.min(data.bars.len().saturating_sub(2)));

    Some(FeatureSnapshot {
        last_close: last.close,
        avg_volume_20,
        dollar_volume: avg_volume_20 * last.close,
        rsi_14: rsi(&closes, RSI_PERIOD).last().copied(),
        atr_pct,
        sma20_gap_pct,
        momentum_20d_pct: momentum_pct(&closes, TREND_PERIOD),
        volatility_20d_pct: realized_volatility(&closes, TREND_PERIOD),
        support: levels.support,
        resistance: levels.resistance,
        beta: data.fundamentals.beta,
        market_cap: data.fundamentals.market_cap,
        pe_ratio: data.fundamentals.pe_ratio,
    })
}

/// Snapshots for a whole tier, computed across the rayon pool.
/// Symbols without bars are left out.
pub fn compute_snapshots(universe: &[SymbolData]) -> BTreeMap<String, FeatureSnapshot> {
    universe
        .par_iter()
        .filter_map(|d| compute_snapshot(d).map(|s| (d.info.symbol.clone(), s)))
        .collect()
}

/// Weighted percentile score per symbol in [0, 1].
///
/// Each feature is ranked against the population; a symbol missing a feature
/// contributes nothing for it and the remaining weights are renormalised.
/// Used to order the payload sent to the prescreen service.
pub fn weighted_scores(
    snapshots: &BTreeMap<String, FeatureSnapshot>,
    weights: &FeatureWeights,
) -> Vec<(String, f64)> {
    let maps: Vec<(&String, BTreeMap<String, f64>)> =
        snapshots.iter().map(|(s, f)| (s, f.to_map())).collect();

    let populations: BTreeMap<&str, Vec<f64>> = weights
        .keys()
        .map(|key| {
            let values = maps.iter().filter_map(|(_, m)| m.get(key).copied()).collect();
            (key.as_str(), values)
        })
        .collect();

    let mut scores: Vec<(String, f64)> = maps
        .par_iter()
        .map(|(symbol, features)| {
            let mut total = 0.0;
            let mut weight_sum = 0.0;
            for (key, w) in weights {
                let (Some(value), Some(population)) =
                    (features.get(key), populations.get(key.as_str()))
                else {
                    continue;
                };
                total += w * percentile_rank(*value, population);
                weight_sum += w;
            }
            let score = if weight_sum > 0.0 { total / weight_sum } else { 0.0 };
            ((*symbol).clone(), score)
        })
        .collect();

    scores.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use pick_core::{Bar, Fundamentals, SymbolInfo, WeightSet};

    fn symbol(name: &str, start: f64, step: f64, days: usize) -> SymbolData {
        let d0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars = (0..days)
            .map(|i| {
                let close = start + step * i as f64;
                Bar {
                    date: d0 + Duration::days(i as i64),
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000_000.0,
                }
            })
            .collect();
        SymbolData {
            info: SymbolInfo {
                symbol: name.to_string(),
                exchange: "NASDAQ".to_string(),
                sector: None,
            },
            bars,
            fundamentals: Fundamentals {
                market_cap: Some(5e9),
                beta: Some(1.1),
                ..Default::default()
            },
        }
    }

    #[test]
    fn snapshot_of_uptrend() {
        let snap = compute_snapshot(&symbol("UP", 100.0, 1.0, 40)).unwrap();
        assert_eq!(snap.last_close, 139.0);
        assert!((snap.dollar_volume - 139_000_000.0).abs() < 1e-3);
        assert!(snap.sma20_gap_pct.unwrap() > 0.0);
        assert!(snap.momentum_20d_pct.unwrap() > 0.0);
        assert_eq!(snap.rsi_14, Some(100.0));
        assert!(snap.atr_pct.unwrap() > 0.0);
        assert_eq!(snap.beta, Some(1.1));
        assert!(snap.technical_bias() > 0.5);
    }

    #[test]
    fn short_history_leaves_indicators_empty() {
        let snap = compute_snapshot(&symbol("NEW", 50.0, 0.1, 5)).unwrap();
        assert!(snap.rsi_14.is_none());
        assert!(snap.sma20_gap_pct.is_none());
        assert!(snap.volatility_20d_pct.is_none());
        assert!(!snap.to_map().contains_key("rsi_14"));
    }

    #[test]
    fn empty_symbols_are_skipped() {
        let mut empty = symbol("EMPTY", 1.0, 0.0, 0);
        empty.bars.clear();
        let universe = vec![symbol("A", 10.0, 0.2, 30), empty];
        let snaps = compute_snapshots(&universe);
        assert_eq!(snaps.len(), 1);
        assert!(snaps.contains_key("A"));
    }

    #[test]
    fn weighted_scores_prefer_momentum_when_weighted() {
        let universe = vec![
            symbol("FLAT", 100.0, 0.0, 40),
            symbol("UP", 100.0, 2.0, 40),
            symbol("DOWN", 200.0, -2.0, 40),
        ];
        let snaps = compute_snapshots(&universe);
        let mut weights = WeightSet::default().feature_weights;
        for w in weights.values_mut() {
            *w = 0.0;
        }
        weights.insert("momentum_20d_pct".to_string(), 1.0);

        let ranked = weighted_scores(&snaps, &weights);
        assert_eq!(ranked[0].0, "UP");
        assert_eq!(ranked[2].0, "DOWN");
    }
}
