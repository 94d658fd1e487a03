//! Deterministic price+volume raster per shortlisted symbol.
//!
//! Charts are drawn into an in-memory RGB buffer with no text, so the output
//! depends only on the bars and the layout. Each artifact carries a SHA-256 of
//! its pixels.

use std::collections::BTreeMap;

use pick_core::Bar;
use plotters::prelude::*;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use technical_features::sma;
use thiserror::Error;

const BACKGROUND: RGBColor = RGBColor(18, 18, 24);
const UP: RGBColor = RGBColor(0, 200, 83);
const DOWN: RGBColor = RGBColor(255, 23, 68);
const TREND: RGBColor = RGBColor(41, 121, 255);
const VOLUME: RGBColor = RGBColor(120, 120, 140);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("{symbol}: no bars to chart")]
    NoData { symbol: String },

    #[error("{symbol}: {got} bars, need at least {need}")]
    InsufficientBars { symbol: String, got: usize, need: usize },

    #[error("{symbol}: invalid bar on {date}")]
    InvalidBar { symbol: String, date: String },

    #[error("{symbol}: drawing failed: {reason}")]
    Draw { symbol: String, reason: String },
}

/// Fixed chart geometry
#[derive(Debug, Clone)]
pub struct ChartSpec {
    pub width: u32,
    pub height: u32,
    /// Most recent sessions drawn
    pub window: usize,
    pub min_bars: usize,
    /// Share of the height given to the volume pane
    pub volume_fraction: f64,
    pub trend_period: usize,
}

impl Default for ChartSpec {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            window: 60,
            min_bars: 10,
            volume_fraction: 0.25,
            trend_period: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChartArtifact {
    pub symbol: String,
    pub width: u32,
    pub height: u32,
    /// Row-major RGB8
    pub pixels: Vec<u8>,
    pub sha256: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChartRenderer {
    spec: ChartSpec,
}

impl ChartRenderer {
    pub fn new(spec: ChartSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ChartSpec {
        &self.spec
    }

    /// Render every input independently across the rayon pool. A failure for
    /// one symbol never affects the others.
    pub fn render_batch(
        &self,
        inputs: &[(String, Vec<Bar>)],
    ) -> BTreeMap<String, Result<ChartArtifact, RenderError>> {
        inputs
            .par_iter()
            .map(|(symbol, bars)| (symbol.clone(), self.render(symbol, bars)))
            .collect()
    }

    pub fn render(&self, symbol: &str, bars: &[Bar]) -> Result<ChartArtifact, RenderError> {
        if bars.is_empty() {
            return Err(RenderError::NoData {
                symbol: symbol.to_string(),
            });
        }
        if bars.len() < self.spec.min_bars {
            return Err(RenderError::InsufficientBars {
                symbol: symbol.to_string(),
                got: bars.len(),
                need: self.spec.min_bars,
            });
        }
        if let Some(bad) = bars.iter().find(|b| !is_valid(b)) {
            return Err(RenderError::InvalidBar {
                symbol: symbol.to_string(),
                date: bad.date.to_string(),
            });
        }

        let mut pixels = vec![0u8; (self.spec.width * self.spec.height * 3) as usize];
        self.draw(&mut pixels, bars).map_err(|reason| RenderError::Draw {
            symbol: symbol.to_string(),
            reason,
        })?;

        let sha256 = hex::encode(Sha256::digest(&pixels));
        tracing::debug!("Rendered chart for {} ({} bars, {})", symbol, bars.len(), &sha256[..12]);

        Ok(ChartArtifact {
            symbol: symbol.to_string(),
            width: self.spec.width,
            height: self.spec.height,
            pixels,
            sha256,
        })
    }

    fn draw(&self, pixels: &mut [u8], all_bars: &[Bar]) -> Result<(), String> {
        let spec = &self.spec;
        let start = all_bars.len().saturating_sub(spec.window);
        let bars = &all_bars[start..];
        let n = bars.len() as f64;

        let lo = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let hi = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let pad = ((hi - lo) * 0.05).max(hi.abs() * 0.001).max(1e-6);
        let max_volume = bars.iter().map(|b| b.volume).fold(0.0, f64::max).max(1.0);

        // Trend line over the full history so the first drawn session has a value
        let closes: Vec<f64> = all_bars.iter().map(|b| b.close).collect();
        let trend = sma(&closes, spec.trend_period);
        let trend_offset = spec.trend_period.saturating_sub(1);
        let trend_points: Vec<(f64, f64)> = trend
            .iter()
            .enumerate()
            .filter_map(|(i, v)| {
                let bar_index = i + trend_offset;
                (bar_index >= start).then(|| ((bar_index - start) as f64 + 0.5, *v))
            })
            .collect();

        let root = BitMapBackend::with_buffer(pixels, (spec.width, spec.height)).into_drawing_area();
        root.fill(&BACKGROUND).map_err(|e| e.to_string())?;

        let price_height = (spec.height as f64 * (1.0 - spec.volume_fraction)) as u32;
        let (price_area, volume_area) = root.split_vertically(price_height);

        let mut price_chart = ChartBuilder::on(&price_area)
            .margin(8)
            .build_cartesian_2d(0f64..n, (lo - pad)..(hi + pad))
            .map_err(|e| e.to_string())?;

        price_chart
            .draw_series(bars.iter().enumerate().map(|(i, b)| {
                CandleStick::new(
                    i as f64 + 0.5,
                    b.open,
                    b.high,
                    b.low,
                    b.close,
                    UP.filled(),
                    DOWN.filled(),
                    candle_width(spec.width, bars.len()),
                )
            }))
            .map_err(|e| e.to_string())?;

        if trend_points.len() >= 2 {
            price_chart
                .draw_series(LineSeries::new(trend_points, TREND.stroke_width(2)))
                .map_err(|e| e.to_string())?;
        }

        let mut volume_chart = ChartBuilder::on(&volume_area)
            .margin(8)
            .build_cartesian_2d(0f64..n, 0f64..max_volume)
            .map_err(|e| e.to_string())?;

        volume_chart
            .draw_series(bars.iter().enumerate().map(|(i, b)| {
                let color = if b.close >= b.open { UP } else { VOLUME };
                Rectangle::new([(i as f64 + 0.15, 0.0), (i as f64 + 0.85, b.volume)], color.filled())
            }))
            .map_err(|e| e.to_string())?;

        root.present().map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn is_valid(bar: &Bar) -> bool {
    let prices = [bar.open, bar.high, bar.low, bar.close];
    prices.iter().all(|p| p.is_finite() && *p > 0.0)
        && bar.volume.is_finite()
        && bar.volume >= 0.0
        && bar.high >= bar.low
}

fn candle_width(width: u32, count: usize) -> u32 {
    let per_bar = width as usize / count.max(1);
    (per_bar as u32 * 6 / 10).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn bars(count: usize) -> Vec<Bar> {
        let d0 = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        (0..count)
            .map(|i| {
                let close = 50.0 + (i as f64 * 0.7).sin() * 3.0 + i as f64 * 0.1;
                Bar {
                    date: d0 + Duration::days(i as i64),
                    open: close - 0.4,
                    high: close + 1.0,
                    low: close - 1.2,
                    close,
                    volume: 1_000_000.0 + i as f64 * 1_000.0,
                }
            })
            .collect()
    }

    fn small() -> ChartRenderer {
        ChartRenderer::new(ChartSpec {
            width: 160,
            height: 120,
            ..Default::default()
        })
    }

    #[test]
    fn render_is_deterministic() {
        let renderer = small();
        let a = renderer.render("AAPL", &bars(80)).unwrap();
        let b = renderer.render("AAPL", &bars(80)).unwrap();
        assert_eq!(a.pixels.len(), 160 * 120 * 3);
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.sha256.len(), 64);
    }

    #[test]
    fn different_bars_give_different_images() {
        let renderer = small();
        let a = renderer.render("X", &bars(40)).unwrap();
        let mut shifted = bars(40);
        for bar in &mut shifted {
            bar.close += 2.0;
            bar.high += 5.0;
        }
        let b = renderer.render("X", &shifted).unwrap();
        assert_ne!(a.sha256, b.sha256);
    }

    #[test]
    fn batch_isolates_failures() {
        let mut broken = bars(30);
        broken[5].high = f64::NAN;
        let inputs = vec![
            ("OK".to_string(), bars(30)),
            ("EMPTY".to_string(), vec![]),
            ("SHORT".to_string(), bars(3)),
            ("BROKEN".to_string(), broken),
        ];

        let results = small().render_batch(&inputs);
        assert_eq!(results.len(), 4);
        assert!(results["OK"].is_ok());
        assert!(matches!(results["EMPTY"], Err(RenderError::NoData { .. })));
        assert!(matches!(results["SHORT"], Err(RenderError::InsufficientBars { got: 3, .. })));
        assert!(matches!(results["BROKEN"], Err(RenderError::InvalidBar { .. })));
    }
}
