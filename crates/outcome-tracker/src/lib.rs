//! Outcome tracking for every shortlisted symbol, picked or not.
//!
//! The pure state machine lives in [`state`]; [`OutcomeTracker`] drives it
//! from stored bars and persists each change through an [`OutcomeLedger`].

pub mod state;
pub mod stats;

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use pick_core::{MarketDataStore, OutcomeLedger, PipelineResult};
use tracing::{debug, info, warn};

pub use state::{apply_bar, expire_if_overdue, seed_for_candidate, seed_for_pick, TrackerConfig, Transition};
pub use stats::{medium_hit_rate, setup_stats};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerReport {
    pub examined: usize,
    pub updated: usize,
    pub closed: usize,
    pub failed: usize,
}

pub struct OutcomeTracker {
    market: Arc<dyn MarketDataStore>,
    ledger: Arc<dyn OutcomeLedger>,
    config: TrackerConfig,
}

impl OutcomeTracker {
    pub fn new(market: Arc<dyn MarketDataStore>, ledger: Arc<dyn OutcomeLedger>, config: TrackerConfig) -> Self {
        Self { market, ledger, config }
    }

    /// Fold every unseen bar up to `as_of` into each open outcome.
    ///
    /// A failure on one symbol is logged and counted; the others still update.
    pub async fn update(&self, as_of: NaiveDate) -> PipelineResult<TrackerReport> {
        let open = self.ledger.open_outcomes().await?;
        let mut report = TrackerReport {
            examined: open.len(),
            ..Default::default()
        };

        for mut outcome in open {
            let from = outcome
                .last_bar_date
                .map(|d| d + Duration::days(1))
                .unwrap_or(outcome.trade_date);
            let bars = if from <= as_of {
                match self.market.load_bars(&outcome.symbol, from, as_of).await {
                    Ok(bars) => bars,
                    Err(e) => {
                        warn!("Outcome update for {} ({}) failed: {}", outcome.symbol, outcome.trade_date, e);
                        report.failed += 1;
                        continue;
                    }
                }
            } else {
                Vec::new()
            };

            let now = Utc::now();
            let mut changed = false;
            let mut closed = false;
            for bar in &bars {
                match apply_bar(&mut outcome, bar, &self.config, now) {
                    Transition::Ignored => {}
                    Transition::Updated => changed = true,
                    Transition::Closed(reason) => {
                        debug!("{} ({}) closed: {}", outcome.symbol, outcome.trade_date, reason.as_str());
                        changed = true;
                        closed = true;
                        break;
                    }
                }
            }
            if !closed {
                if let Transition::Closed(_) = expire_if_overdue(&mut outcome, as_of, &self.config, now) {
                    changed = true;
                    closed = true;
                }
            }
            if !changed {
                continue;
            }

            match self.ledger.update_outcome(&outcome).await {
                Ok(true) => {
                    report.updated += 1;
                    if closed {
                        report.closed += 1;
                    }
                }
                Ok(false) => debug!("{} ({}) already closed in store", outcome.symbol, outcome.trade_date),
                Err(e) => {
                    warn!("Failed to persist outcome for {}: {}", outcome.symbol, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Outcome tracker: {} open, {} updated, {} closed, {} failed",
            report.examined, report.updated, report.closed, report.failed
        );
        Ok(report)
    }
}
