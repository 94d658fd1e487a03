//! Confidence blend for one (candidate, direction) proposal.
//!
//! Each term is in [0, 1]. Terms that cannot be computed (social sentiment
//! unavailable, too few similar setups) are left out and the remaining
//! coefficients renormalised, so a missing signal never reads as neutral.

use std::collections::BTreeMap;

use pick_core::adaptive::weighted_mean;
use pick_core::{
    AgentWeights, DecisionFactors, Direction, SetupKey, SetupStats, ShortlistCandidate, AGENTS, AGENT_SOCIAL,
    AGENT_TECHNICAL, AGENT_VISION,
};

/// Knobs of the volatility and history terms
#[derive(Debug, Clone)]
pub struct ConsensusParams {
    /// ATR% at or below which no volatility penalty applies
    pub calm_atr_pct: f64,
    /// ATR% at or above which the penalty is maximal
    pub wild_atr_pct: f64,
    pub min_volatility_adjustment: f64,
    /// Similar setups needed before history enters the blend
    pub min_history_samples: usize,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            calm_atr_pct: 2.0,
            wild_atr_pct: 8.0,
            min_volatility_adjustment: 0.2,
            min_history_samples: 5,
        }
    }
}

/// Directional lean of every signal that is available for this candidate
pub fn signal_leans(candidate: &ShortlistCandidate) -> Vec<(&'static str, f64)> {
    let mut leans = vec![(AGENT_TECHNICAL, candidate.features.technical_bias())];
    if let Some(flags) = candidate.vision.available() {
        leans.push((AGENT_VISION, flags.bias()));
    }
    if let Some(social) = candidate.social.available() {
        leans.push((AGENT_SOCIAL, social.sentiment.clamp(-1.0, 1.0)));
    }
    leans
}

/// Trust-weighted share of available signals agreeing with `direction`.
pub fn agreement(candidate: &ShortlistCandidate, direction: Direction, weights: &AgentWeights) -> f64 {
    let pairs: Vec<(f64, f64)> = signal_leans(candidate)
        .into_iter()
        .map(|(agent, lean)| ((1.0 + direction.sign() * lean) / 2.0, weights.trust_for(agent)))
        .collect();
    weighted_mean(&pairs).unwrap_or(0.5)
}

/// Share of the total trust budget backed by signals that actually arrived.
pub fn trust_coverage(candidate: &ShortlistCandidate, weights: &AgentWeights) -> f64 {
    let total: f64 = AGENTS.iter().map(|a| weights.trust_for(a)).sum();
    if total <= f64::EPSILON {
        return 0.0;
    }
    let present: f64 = signal_leans(candidate)
        .iter()
        .map(|(agent, _)| weights.trust_for(agent))
        .sum();
    present / total
}

pub fn volatility_adjustment(atr_pct: Option<f64>, params: &ConsensusParams) -> f64 {
    let Some(atr) = atr_pct else {
        return 0.5;
    };
    if atr <= params.calm_atr_pct {
        return 1.0;
    }
    if atr >= params.wild_atr_pct {
        return params.min_volatility_adjustment;
    }
    let t = (atr - params.calm_atr_pct) / (params.wild_atr_pct - params.calm_atr_pct);
    1.0 - t * (1.0 - params.min_volatility_adjustment)
}

/// Social sentiment vs the chosen direction; None when social is unavailable.
pub fn alignment(candidate: &ShortlistCandidate, direction: Direction) -> Option<f64> {
    candidate
        .social
        .available()
        .map(|s| (1.0 + direction.sign() * s.sentiment.clamp(-1.0, 1.0)) / 2.0)
}

pub fn history(
    candidate: &ShortlistCandidate,
    direction: Direction,
    stats: &BTreeMap<SetupKey, SetupStats>,
    params: &ConsensusParams,
) -> Option<f64> {
    stats
        .get(&SetupKey::of(candidate, direction))
        .filter(|s| s.samples >= params.min_history_samples)
        .map(|s| s.medium_hit_rate.clamp(0.0, 1.0))
}

pub fn score(
    candidate: &ShortlistCandidate,
    direction: Direction,
    model_conviction: f64,
    weights: &AgentWeights,
    stats: &BTreeMap<SetupKey, SetupStats>,
    params: &ConsensusParams,
) -> DecisionFactors {
    let agreement = agreement(candidate, direction, weights);
    let trust = trust_coverage(candidate, weights);
    let volatility_adjustment = volatility_adjustment(candidate.features.atr_pct, params);
    let alignment = alignment(candidate, direction);
    let history = history(candidate, direction, stats, params);

    let c = &weights.coefficients;
    let mut terms = vec![
        (agreement, c.agreement),
        (trust, c.trust),
        (volatility_adjustment, c.volatility),
    ];
    if let Some(a) = alignment {
        terms.push((a, c.alignment));
    }
    if let Some(h) = history {
        terms.push((h, c.history));
    }
    let confidence = weighted_mean(&terms).unwrap_or(0.0).clamp(0.0, 1.0);

    DecisionFactors {
        symbol: candidate.symbol.clone(),
        direction,
        agreement,
        trust,
        volatility_adjustment,
        alignment,
        history,
        model_conviction: model_conviction.clamp(0.0, 1.0),
        confidence,
        selected: false,
    }
}
