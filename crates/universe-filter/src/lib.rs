//! Cheap deterministic reduction of the full universe to the ACTIVE tier.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use pick_core::{FeatureSnapshot, PipelineError, PipelineResult, SymbolData};
use serde::{Deserialize, Serialize};
use technical_features::compute_snapshots;

/// Conjunctive thresholds. A symbol must pass every one of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub min_price: f64,
    pub min_avg_volume: f64,
    pub min_market_cap: f64,
    /// ATR(14) as % of price
    pub min_atr_pct: f64,
    pub max_atr_pct: f64,
    /// Applied only when beta is known
    pub min_beta: f64,
    pub max_beta: f64,
    /// Oldest acceptable latest-bar age, in calendar days
    pub max_data_age_days: i64,
    /// Window of bars loaded per symbol
    pub lookback_days: u32,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            min_price: 5.0,
            min_avg_volume: 500_000.0,
            min_market_cap: 300_000_000.0,
            min_atr_pct: 1.0,
            max_atr_pct: 15.0,
            min_beta: 0.3,
            max_beta: 3.5,
            max_data_age_days: 4,
            lookback_days: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NonStandardTicker,
    NoData,
    StaleSymbol,
    Price,
    Volume,
    MarketCap,
    Volatility,
    Beta,
}

/// A symbol admitted to the ACTIVE tier, with the snapshot it was judged on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSymbol {
    pub symbol: String,
    pub sector: Option<String>,
    pub features: FeatureSnapshot,
}

#[derive(Debug, Clone, Default)]
pub struct FilterReport {
    pub considered: usize,
    pub active: Vec<ActiveSymbol>,
    pub rejected: BTreeMap<RejectReason, usize>,
}

pub struct UniverseFilter {
    criteria: FilterCriteria,
}

impl UniverseFilter {
    pub fn new(criteria: FilterCriteria) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    /// Refuse to run on a store whose newest bar is too old for `as_of`.
    pub fn check_freshness(&self, latest: Option<NaiveDate>, as_of: NaiveDate) -> PipelineResult<()> {
        let stale = match latest {
            Some(date) => (as_of - date).num_days() > self.criteria.max_data_age_days,
            None => true,
        };
        if stale {
            return Err(PipelineError::StaleData {
                latest,
                as_of,
                max_age_days: self.criteria.max_data_age_days,
            });
        }
        Ok(())
    }

    /// Pure function of the stored window. Output is sorted by symbol.
    pub fn apply(&self, as_of: NaiveDate, universe: &[SymbolData]) -> FilterReport {
        let mut report = FilterReport {
            considered: universe.len(),
            ..Default::default()
        };

        let mut eligible = Vec::with_capacity(universe.len());
        for data in universe {
            if let Some(reason) = self.precheck(as_of, data) {
                *report.rejected.entry(reason).or_insert(0) += 1;
            } else {
                eligible.push(data.clone());
            }
        }

        let snapshots = compute_snapshots(&eligible);
        for data in &eligible {
            let Some(features) = snapshots.get(&data.info.symbol) else {
                *report.rejected.entry(RejectReason::NoData).or_insert(0) += 1;
                continue;
            };
            match self.evaluate(features) {
                Some(reason) => *report.rejected.entry(reason).or_insert(0) += 1,
                None => report.active.push(ActiveSymbol {
                    symbol: data.info.symbol.clone(),
                    sector: data.info.sector.clone(),
                    features: features.clone(),
                }),
            }
        }
        report.active.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        tracing::info!(
            "Universe filter: {} of {} symbols active ({:?} rejected)",
            report.active.len(),
            report.considered,
            report.rejected
        );
        report
    }

    fn precheck(&self, as_of: NaiveDate, data: &SymbolData) -> Option<RejectReason> {
        let symbol = &data.info.symbol;
        // Warrants, units and preferred shares
        if symbol.contains('.') || symbol.contains('-') || symbol.len() > 5 {
            return Some(RejectReason::NonStandardTicker);
        }
        let last = match data.last_bar() {
            Some(bar) => bar,
            None => return Some(RejectReason::NoData),
        };
        if (as_of - last.date).num_days() > self.criteria.max_data_age_days {
            return Some(RejectReason::StaleSymbol);
        }
        None
    }

    fn evaluate(&self, f: &FeatureSnapshot) -> Option<RejectReason> {
        let c = &self.criteria;
        if f.last_close < c.min_price {
            return Some(RejectReason::Price);
        }
        if f.avg_volume_20 < c.min_avg_volume {
            return Some(RejectReason::Volume);
        }
        match f.market_cap {
            Some(cap) if cap >= c.min_market_cap => {}
            _ => return Some(RejectReason::MarketCap),
        }
        match f.atr_pct {
            Some(a) if a >= c.min_atr_pct && a <= c.max_atr_pct => {}
            _ => return Some(RejectReason::Volatility),
        }
        if let Some(beta) = f.beta {
            if beta < c.min_beta || beta > c.max_beta {
                return Some(RejectReason::Beta);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pick_core::{Bar, Fundamentals, SymbolInfo};

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    /// 30 daily bars ending the day before `as_of`, 3% daily range
    fn symbol(name: &str, close: f64, volume: f64, cap: Option<f64>, beta: Option<f64>) -> SymbolData {
        let last = as_of() - Duration::days(1);
        let bars = (0..30)
            .map(|i| Bar {
                date: last - Duration::days(29 - i),
                open: close,
                high: close * 1.015,
                low: close * 0.985,
                close,
                volume,
            })
            .collect();
        SymbolData {
            info: SymbolInfo {
                symbol: name.to_string(),
                exchange: "NYSE".to_string(),
                sector: Some("Tech".to_string()),
            },
            bars,
            fundamentals: Fundamentals {
                market_cap: cap,
                beta,
                pe_ratio: None,
                as_of: None,
            },
        }
    }

    #[test]
    fn applies_every_predicate() {
        let universe = vec![
            symbol("GOOD", 50.0, 2e6, Some(1e10), Some(1.2)),
            symbol("NOBETA", 50.0, 2e6, Some(1e10), None),
            symbol("PENNY", 2.0, 2e6, Some(1e10), Some(1.0)),
            symbol("THIN", 50.0, 1e3, Some(1e10), Some(1.0)),
            symbol("MICRO", 50.0, 2e6, Some(1e7), Some(1.0)),
            symbol("NOCAP", 50.0, 2e6, None, Some(1.0)),
            symbol("WILD", 50.0, 2e6, Some(1e10), Some(5.0)),
            symbol("BRK.B", 50.0, 2e6, Some(1e10), Some(1.0)),
        ];
        let report = UniverseFilter::new(FilterCriteria::default()).apply(as_of(), &universe);

        let active: Vec<&str> = report.active.iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(active, vec!["GOOD", "NOBETA"]);
        assert_eq!(report.considered, 8);
        assert_eq!(report.rejected[&RejectReason::Price], 1);
        assert_eq!(report.rejected[&RejectReason::Volume], 1);
        assert_eq!(report.rejected[&RejectReason::MarketCap], 2);
        assert_eq!(report.rejected[&RejectReason::Beta], 1);
        assert_eq!(report.rejected[&RejectReason::NonStandardTicker], 1);
    }

    #[test]
    fn flat_symbols_fail_volatility_band() {
        let mut flat = symbol("FLAT", 50.0, 2e6, Some(1e10), Some(1.0));
        for bar in &mut flat.bars {
            bar.high = bar.close;
            bar.low = bar.close;
        }
        let report = UniverseFilter::new(FilterCriteria::default()).apply(as_of(), &[flat]);
        assert!(report.active.is_empty());
        assert_eq!(report.rejected[&RejectReason::Volatility], 1);
    }

    #[test]
    fn stale_symbol_is_dropped() {
        let mut old = symbol("OLD", 50.0, 2e6, Some(1e10), Some(1.0));
        for bar in &mut old.bars {
            bar.date = bar.date - Duration::days(30);
        }
        let report = UniverseFilter::new(FilterCriteria::default()).apply(as_of(), &[old]);
        assert_eq!(report.rejected[&RejectReason::StaleSymbol], 1);
    }

    #[test]
    fn freshness_guard() {
        let filter = UniverseFilter::new(FilterCriteria::default());
        let friday = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        assert!(filter.check_freshness(Some(friday), as_of()).is_ok());

        let err = filter
            .check_freshness(Some(friday - Duration::days(7)), as_of())
            .unwrap_err();
        assert_eq!(err.kind(), "data_freshness");
        assert!(filter.check_freshness(None, as_of()).is_err());
    }
}
