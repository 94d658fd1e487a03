//! Rotating arbitration: fuse the enriched shortlist into a bounded set of
//! directional picks plus an audit record of how they were scored.

pub mod consensus;
pub mod rotation;
pub mod selection;

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use agent_client::{ArbitrationCandidate, ArbitrationRequest, ProposedPick};
use chrono::{NaiveDate, Utc};
use pick_core::{
    ArbitratorDecision, DecisionFactors, Direction, Pick, PipelineError, PipelineResult, SetupKey,
    SetupStats, ShortlistCandidate, Stage, WeightSet,
};
use tracing::{info, warn};

pub use consensus::ConsensusParams;
pub use rotation::{Rotation, StrategyRegistry};
pub use selection::SelectionRules;

#[derive(Debug, Clone)]
pub struct ArbitratorConfig {
    pub rules: SelectionRules,
    pub consensus: ConsensusParams,
    /// Hard wall-clock limit on the strategy call
    pub timeout: Duration,
    /// Proposed entry must sit within this % of the last close
    pub max_entry_drift_pct: f64,
}

impl Default for ArbitratorConfig {
    fn default() -> Self {
        Self {
            rules: SelectionRules::default(),
            consensus: ConsensusParams::default(),
            timeout: Duration::from_secs(240),
            max_entry_drift_pct: 10.0,
        }
    }
}

/// Result of one arbitration event. `picks` is empty when nothing qualified.
#[derive(Debug, Clone)]
pub struct Arbitration {
    pub picks: Vec<Pick>,
    pub decision: ArbitratorDecision,
}

impl Arbitration {
    pub fn qualified(&self) -> bool {
        !self.picks.is_empty()
    }
}

pub struct ArbitratorAgent {
    rotation: Rotation,
    registry: StrategyRegistry,
    config: ArbitratorConfig,
}

impl ArbitratorAgent {
    pub fn new(rotation: Rotation, registry: StrategyRegistry, config: ArbitratorConfig) -> Self {
        Self {
            rotation,
            registry,
            config,
        }
    }

    pub fn strategy_for(&self, date: NaiveDate) -> &str {
        self.rotation.strategy_for(date)
    }

    pub fn config(&self) -> &ArbitratorConfig {
        &self.config
    }

    pub async fn arbitrate(
        &self,
        trade_date: NaiveDate,
        candidates: &[ShortlistCandidate],
        weights: &WeightSet,
        setup_stats: &BTreeMap<SetupKey, SetupStats>,
    ) -> PipelineResult<Arbitration> {
        let strategy = self.rotation.strategy_for(trade_date).to_string();
        let service = self.registry.resolve(&strategy)?;
        let model = service.model_name().to_string();

        let request = self.build_request(trade_date, &strategy, candidates, weights, setup_stats);
        info!(
            "Arbitrating {} candidates with strategy '{}' ({})",
            candidates.len(),
            strategy,
            model
        );

        let response = match tokio::time::timeout(self.config.timeout, service.arbitrate(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(PipelineError::ServiceUnavailable {
                    service: format!("arbitrator:{}", strategy),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(PipelineError::Timeout {
                    stage: Stage::Arbitration,
                    seconds: self.config.timeout.as_secs(),
                })
            }
        };

        let by_symbol: BTreeMap<&str, &ShortlistCandidate> =
            candidates.iter().map(|c| (c.symbol.as_str(), c)).collect();

        let total = response.proposals.len();
        let mut seen = HashSet::new();
        let mut accepted: Vec<(Direction, &ProposedPick, &ShortlistCandidate)> = Vec::new();
        for proposal in &response.proposals {
            match self.check_proposal(proposal, &by_symbol) {
                Ok((direction, candidate)) => {
                    if seen.insert(proposal.symbol.clone()) {
                        accepted.push((direction, proposal, candidate));
                    } else {
                        warn!("Duplicate proposal for {} ignored", proposal.symbol);
                    }
                }
                Err(reason) => warn!("Dropping proposal for {}: {}", proposal.symbol, reason),
            }
        }
        if total > 0 && accepted.is_empty() {
            return Err(PipelineError::Malformed {
                stage: Stage::Arbitration,
                reason: format!("none of {} proposals were valid", total),
                attempts: 1,
            });
        }

        let mut factors: Vec<DecisionFactors> = accepted
            .iter()
            .map(|(direction, proposal, candidate)| {
                consensus::score(
                    candidate,
                    *direction,
                    proposal.conviction,
                    &weights.agent_weights,
                    setup_stats,
                    &self.config.consensus,
                )
            })
            .collect();

        let selected = selection::select(&factors, &self.config.rules);
        for &i in &selected {
            factors[i].selected = true;
        }

        let picks: Vec<Pick> = selected
            .iter()
            .map(|&i| {
                let (direction, proposal, _) = accepted[i];
                Pick {
                    trade_date,
                    symbol: proposal.symbol.clone(),
                    direction,
                    entry_price: proposal.entry_price,
                    confidence: factors[i].confidence,
                    targets: proposal.targets,
                    stop: proposal.stop,
                    rationale: proposal.rationale.clone(),
                    strategy: strategy.clone(),
                    model: model.clone(),
                }
            })
            .collect();

        let final_confidence = if picks.is_empty() {
            0.0
        } else {
            picks.iter().map(|p| p.confidence).sum::<f64>() / picks.len() as f64
        };
        let outcome = if picks.is_empty() {
            "no_qualifying_picks"
        } else {
            "selected"
        };

        info!(
            "Arbitration '{}': {} proposals, {} valid, {} selected (confidence {:.3})",
            strategy,
            total,
            accepted.len(),
            picks.len(),
            final_confidence
        );

        Ok(Arbitration {
            picks,
            decision: ArbitratorDecision {
                trade_date,
                strategy,
                model,
                weights_version: weights.version,
                considered: candidates.iter().map(|c| c.symbol.clone()).collect(),
                factors,
                final_confidence,
                outcome: outcome.to_string(),
                created_at: Utc::now(),
            },
        })
    }

    fn build_request(
        &self,
        trade_date: NaiveDate,
        strategy: &str,
        candidates: &[ShortlistCandidate],
        weights: &WeightSet,
        setup_stats: &BTreeMap<SetupKey, SetupStats>,
    ) -> ArbitrationRequest {
        let candidates = candidates
            .iter()
            .map(|c| ArbitrationCandidate {
                symbol: c.symbol.clone(),
                sector: c.sector.clone(),
                bias: c.bias.as_str().to_string(),
                prescreen_score: c.prescreen_score,
                features: c.features.clone(),
                vision: c.vision.clone(),
                social: c.social.clone(),
                similar_setups: [Direction::Long, Direction::Short]
                    .iter()
                    .filter_map(|d| setup_stats.get(&SetupKey::of(c, *d)).cloned())
                    .collect(),
            })
            .collect();

        ArbitrationRequest {
            trade_date,
            strategy: strategy.to_string(),
            min_picks: self.config.rules.min_picks,
            max_picks: self.config.rules.max_picks,
            candidates,
            agent_trust: weights.agent_weights.trust.clone(),
            guidance: weights.guidance.clone(),
        }
    }

    fn check_proposal<'a>(
        &self,
        proposal: &ProposedPick,
        by_symbol: &BTreeMap<&str, &'a ShortlistCandidate>,
    ) -> Result<(Direction, &'a ShortlistCandidate), String> {
        let candidate = by_symbol
            .get(proposal.symbol.as_str())
            .copied()
            .ok_or_else(|| "not on the shortlist".to_string())?;
        let direction =
            Direction::parse(&proposal.direction).ok_or_else(|| format!("unknown direction '{}'", proposal.direction))?;
        if !proposal.targets.is_consistent(direction, proposal.entry_price, proposal.stop) {
            return Err("targets and stop are not ordered for the direction".to_string());
        }
        let last = candidate.features.last_close;
        if last > 0.0 && ((proposal.entry_price / last - 1.0) * 100.0).abs() > self.config.max_entry_drift_pct {
            return Err(format!(
                "entry {:.2} too far from last close {:.2}",
                proposal.entry_price, last
            ));
        }
        if !proposal.conviction.is_finite() {
            return Err("conviction is not finite".to_string());
        }
        Ok((direction, candidate))
    }
}
