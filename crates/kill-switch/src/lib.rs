use chrono::NaiveDate;
use pick_core::{MarketCondition, PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Regime thresholds checked once per day before any agent work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    /// Halt when the volatility index is strictly above this level
    pub max_volatility_index: f64,
    /// Halt when the broad-index pre-market move (percent) is strictly below this
    pub min_premarket_change_pct: f64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            max_volatility_index: 35.0,
            min_premarket_change_pct: -1.5,
        }
    }
}

/// Two-state gate result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Pass,
    Halt { reason: String },
}

impl GateVerdict {
    pub fn is_halt(&self) -> bool {
        matches!(self, GateVerdict::Halt { .. })
    }
}

pub struct KillSwitch {
    config: KillSwitchConfig,
}

impl KillSwitch {
    pub fn new(config: KillSwitchConfig) -> Self {
        Self { config }
    }

    /// Evaluate the day's condition. A missing or mismatched row is an error,
    /// the gate never passes without data.
    pub fn evaluate(
        &self,
        trade_date: NaiveDate,
        condition: Option<&MarketCondition>,
    ) -> PipelineResult<GateVerdict> {
        let condition = match condition {
            Some(c) if c.trade_date == trade_date => c,
            _ => return Err(PipelineError::MissingMarketCondition(trade_date)),
        };

        if !condition.volatility_index.is_finite() || !condition.index_premarket_change_pct.is_finite() {
            return Err(PipelineError::InvalidData(format!(
                "non-finite market condition for {}",
                trade_date
            )));
        }

        let mut reasons = Vec::new();
        if condition.volatility_index > self.config.max_volatility_index {
            reasons.push(format!(
                "volatility index {:.2} above {:.2}",
                condition.volatility_index, self.config.max_volatility_index
            ));
        }
        if condition.index_premarket_change_pct < self.config.min_premarket_change_pct {
            reasons.push(format!(
                "index pre-market move {:.2}% below {:.2}%",
                condition.index_premarket_change_pct, self.config.min_premarket_change_pct
            ));
        }

        if reasons.is_empty() {
            info!(
                "Kill switch PASS for {} (vix {:.2}, pre-market {:+.2}%)",
                trade_date, condition.volatility_index, condition.index_premarket_change_pct
            );
            Ok(GateVerdict::Pass)
        } else {
            let reason = reasons.join("; ");
            warn!("Kill switch HALT for {}: {}", trade_date, reason);
            Ok(GateVerdict::Halt { reason })
        }
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new(KillSwitchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 5).unwrap()
    }

    fn condition(vix: f64, premarket: f64) -> MarketCondition {
        MarketCondition {
            trade_date: day(),
            volatility_index: vix,
            index_premarket_change_pct: premarket,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn normal_market_passes() {
        let verdict = KillSwitch::default().evaluate(day(), Some(&condition(18.0, 0.3))).unwrap();
        assert_eq!(verdict, GateVerdict::Pass);
    }

    #[test]
    fn high_volatility_halts() {
        let verdict = KillSwitch::default().evaluate(day(), Some(&condition(40.0, 0.0))).unwrap();
        assert!(verdict.is_halt());
    }

    #[test]
    fn premarket_drop_halts() {
        let verdict = KillSwitch::default().evaluate(day(), Some(&condition(20.0, -2.1))).unwrap();
        match verdict {
            GateVerdict::Halt { reason } => assert!(reason.contains("pre-market")),
            GateVerdict::Pass => panic!("expected halt"),
        }
    }

    #[test]
    fn thresholds_are_strict() {
        let verdict = KillSwitch::default().evaluate(day(), Some(&condition(35.0, -1.5))).unwrap();
        assert_eq!(verdict, GateVerdict::Pass);
    }

    #[test]
    fn missing_condition_is_a_freshness_error() {
        let err = KillSwitch::default().evaluate(day(), None).unwrap_err();
        assert_eq!(err.kind(), "data_freshness");

        let mut yesterday = condition(15.0, 0.0);
        yesterday.trade_date = day().pred_opt().unwrap();
        assert!(KillSwitch::default().evaluate(day(), Some(&yesterday)).is_err());
    }
}
