use super::indicators::*;
use chrono::{Duration, NaiveDate};
use pick_core::Bar;

// Helper function to create sample price data
fn sample_prices() -> Vec<f64> {
    vec![
        44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
        45.89, 46.03, 45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
    ]
}

// Helper function to create sample bars
fn sample_bars() -> Vec<Bar> {
    let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    (0..15)
        .map(|i| {
            let base = 100.0 + i as f64;
            Bar {
                date: start + Duration::days(i),
                open: base,
                high: base + 2.0,
                low: base - 1.0,
                close: base + 1.0,
                volume: 1_000_000.0,
            }
        })
        .collect()
}

fn bar(day: i64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(day),
        open: close,
        high,
        low,
        close,
        volume: 1.0,
    }
}

#[test]
fn test_sma_basic() {
    let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    let result = sma(&data, 3);

    assert_eq!(result.len(), 3);
    assert!((result[0] - 2.0).abs() < 0.001); // (1+2+3)/3 = 2
    assert!((result[1] - 3.0).abs() < 0.001);
    assert!((result[2] - 4.0).abs() < 0.001);
}

#[test]
fn test_sma_insufficient_data() {
    assert!(sma(&[1.0, 2.0], 5).is_empty());
}

#[test]
fn test_sma_real_prices() {
    let prices = sample_prices();
    let result = sma(&prices, 5);

    let expected_first = (44.34 + 44.09 + 44.15 + 43.61 + 44.33) / 5.0;
    assert!((result[0] - expected_first).abs() < 0.01);
}

#[test]
fn test_ema_starts_with_sma() {
    let data = vec![22.0, 24.0, 23.0, 25.0, 26.0];
    let result = ema(&data, 3);

    assert_eq!(result.len(), 3);
    let first_sma = (22.0 + 24.0 + 23.0) / 3.0;
    assert!((result[0] - first_sma).abs() < 0.01);
}

#[test]
fn test_ema_increases_with_uptrend() {
    let data: Vec<f64> = (1..=10).map(|i| i as f64).collect();
    let result = ema(&data, 3);

    for i in 1..result.len() {
        assert!(result[i] > result[i - 1]);
    }
}

#[test]
fn test_rsi_bounds() {
    let result = rsi(&sample_prices(), 14);

    assert!(!result.is_empty());
    for &value in &result {
        assert!((0.0..=100.0).contains(&value));
    }
}

#[test]
fn test_rsi_insufficient_data() {
    assert!(rsi(&[1.0, 2.0, 3.0], 14).is_empty());
}

#[test]
fn test_rsi_overbought_oversold() {
    let uptrend: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
    let downtrend: Vec<f64> = uptrend.iter().rev().copied().collect();

    assert!(*rsi(&uptrend, 14).last().unwrap() > 70.0);
    assert!(*rsi(&downtrend, 14).last().unwrap() < 30.0);
}

#[test]
fn test_atr_basic() {
    let result = atr(&sample_bars(), 14);

    assert_eq!(result.len(), 1);
    assert!(result.iter().all(|v| *v > 0.0));
}

#[test]
fn test_atr_insufficient_data() {
    let bars = sample_bars()[..5].to_vec();
    assert!(atr(&bars, 14).is_empty());
}

#[test]
fn test_atr_increases_with_volatility() {
    let normal_atr = atr(&sample_bars(), 5);

    let mut volatile_bars = sample_bars();
    for bar in &mut volatile_bars {
        bar.high += 10.0;
        bar.low -= 10.0;
    }
    let volatile_atr = atr(&volatile_bars, 5);

    assert!(volatile_atr[0] > normal_atr[0]);
}

#[test]
fn test_momentum_and_volatility() {
    let closes: Vec<f64> = (0..=20).map(|i| 100.0 + i as f64).collect();
    let momentum = momentum_pct(&closes, 20).unwrap();
    assert!((momentum - 20.0).abs() < 1e-9);

    let flat = vec![50.0; 30];
    assert_eq!(realized_volatility(&flat, 20), Some(0.0));
    assert!(realized_volatility(&flat[..10], 20).is_none());
}

#[test]
fn test_support_resistance_pivots() {
    // dip to 90 then a peak at 120, settling at 105
    let mut bars = Vec::new();
    let closes = [
        100.0, 99.0, 98.0, 95.0, 90.0, 94.0, 97.0, 100.0, 104.0, 110.0, 120.0, 114.0, 110.0,
        107.0, 106.0, 105.0,
    ];
    for (i, c) in closes.iter().enumerate() {
        bars.push(bar(i as i64, c + 0.5, c - 0.5, *c));
    }

    let levels = support_resistance(&bars, 14);
    assert_eq!(levels.support, Some(89.5));
    assert_eq!(levels.resistance, Some(120.5));
}

#[test]
fn test_support_resistance_short_window() {
    let bars = sample_bars()[..4].to_vec();
    let levels = support_resistance(&bars, 10);
    assert!(levels.support.is_none() && levels.resistance.is_none());
}
