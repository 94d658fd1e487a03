//! Pure weight-update step: trailing outcome history in, candidate weight set out.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use outcome_tracker::medium_hit_rate;
use pick_core::adaptive::{mean, pearson};
use pick_core::{
    ArbitratorDecision, ConfidenceCoefficients, DecisionFactors, TrackedCandidate, WeightSet, AGENTS,
    AGENT_SOCIAL, AGENT_TECHNICAL, AGENT_VISION, FEATURE_KEYS,
};

use crate::LearnerConfig;

/// Result of one learning computation, before bounds are checked.
#[derive(Debug, Clone)]
pub enum Proposal {
    /// Too little tracked history to learn from.
    Insufficient { samples: usize, required: usize },
    Ready { weights: WeightSet, samples: usize },
}

/// Directional excursion realised by a tracked candidate, percent.
fn net_excursion(row: &TrackedCandidate) -> f64 {
    row.outcome.max_gain_pct + row.outcome.max_loss_pct
}

/// Absolute (long-positive) price move of a tracked candidate, percent.
fn price_move(row: &TrackedCandidate) -> f64 {
    row.outcome.direction.sign() * row.outcome.last_return_pct
}

/// Outcomes that have seen at least one bar.
fn observed(history: &[TrackedCandidate]) -> Vec<&TrackedCandidate> {
    history.iter().filter(|r| r.outcome.days_tracked > 0).collect()
}

pub fn propose(
    current: &WeightSet,
    history: &[TrackedCandidate],
    decisions: &[ArbitratorDecision],
    config: &LearnerConfig,
) -> Proposal {
    let rows = observed(history);
    if rows.len() < config.min_samples {
        return Proposal::Insufficient {
            samples: rows.len(),
            required: config.min_samples,
        };
    }

    let mut weights = current.clone();
    weights.feature_weights = feature_weights(current, &rows, config.learning_rate);
    weights.agent_weights.trust = trust(current, &rows, config);
    weights.agent_weights.coefficients = coefficients(current, &rows, decisions, config);
    weights.guidance = Some(guidance(history, config));

    Proposal::Ready {
        weights,
        samples: rows.len(),
    }
}

/// Blend current feature weights toward each feature's |correlation| with the
/// realised excursion. Features without a usable correlation get zero pull.
fn feature_weights(current: &WeightSet, rows: &[&TrackedCandidate], lr: f64) -> BTreeMap<String, f64> {
    let samples: Vec<(BTreeMap<String, f64>, f64)> = rows
        .iter()
        .map(|r| (r.candidate.features.to_map(), net_excursion(r)))
        .collect();

    let mut importance: BTreeMap<String, f64> = BTreeMap::new();
    for key in FEATURE_KEYS {
        let (xs, ys): (Vec<f64>, Vec<f64>) = samples
            .iter()
            .filter_map(|(features, y)| features.get(*key).map(|x| (*x, *y)))
            .unzip();
        let r = pearson(&xs, &ys).map(f64::abs).unwrap_or(0.0);
        importance.insert(key.to_string(), r);
    }

    let total: f64 = importance.values().sum();
    if total <= f64::EPSILON {
        return current.feature_weights.clone();
    }

    FEATURE_KEYS
        .iter()
        .map(|key| {
            let old = current.feature_weights.get(*key).copied().unwrap_or(0.0);
            let target = importance[*key] / total;
            (key.to_string(), (1.0 - lr) * old + lr * target)
        })
        .collect()
}

/// Share of non-zero leans that matched the realised price move.
pub fn directional_accuracy(pairs: &[(f64, f64)]) -> Option<(f64, usize)> {
    let votes: Vec<bool> = pairs
        .iter()
        .filter(|(lean, realised)| lean.abs() > f64::EPSILON && realised.abs() > f64::EPSILON)
        .map(|(lean, realised)| lean.signum() == realised.signum())
        .collect();
    if votes.is_empty() {
        return None;
    }
    let hits = votes.iter().filter(|v| **v).count();
    Some((hits as f64 / votes.len() as f64, votes.len()))
}

fn trust(current: &WeightSet, rows: &[&TrackedCandidate], config: &LearnerConfig) -> BTreeMap<String, f64> {
    let mut leans: HashMap<&str, Vec<(f64, f64)>> = HashMap::new();
    for row in rows {
        let realised = price_move(row);
        leans
            .entry(AGENT_TECHNICAL)
            .or_default()
            .push((row.candidate.features.technical_bias(), realised));
        if let Some(v) = row.candidate.vision.available() {
            leans.entry(AGENT_VISION).or_default().push((v.bias(), realised));
        }
        if let Some(s) = row.candidate.social.available() {
            leans.entry(AGENT_SOCIAL).or_default().push((s.sentiment, realised));
        }
    }

    AGENTS
        .iter()
        .map(|agent| {
            let old = current.agent_weights.trust_for(agent);
            let pairs = leans.get(agent).map(Vec::as_slice).unwrap_or(&[]);
            let new = match directional_accuracy(pairs) {
                Some((accuracy, n)) if n >= config.min_agent_samples => {
                    (1.0 - config.learning_rate) * old + config.learning_rate * accuracy
                }
                _ => old,
            };
            (agent.to_string(), new)
        })
        .collect()
}

/// Factor values that entered a decision, by coefficient name.
fn factor_terms(f: &DecisionFactors) -> [(&'static str, Option<f64>); 5] {
    [
        ("agreement", Some(f.agreement)),
        ("trust", Some(f.trust)),
        ("volatility", Some(f.volatility_adjustment)),
        ("alignment", f.alignment),
        ("history", f.history),
    ]
}

/// Scale each confidence coefficient by how much better its factor separated
/// winners from losers, then renormalise to the previous total.
fn coefficients(
    current: &WeightSet,
    rows: &[&TrackedCandidate],
    decisions: &[ArbitratorDecision],
    config: &LearnerConfig,
) -> ConfidenceCoefficients {
    let old = &current.agent_weights.coefficients;
    let by_key: HashMap<(NaiveDate, &str), &TrackedCandidate> = rows
        .iter()
        .map(|r| ((r.outcome.trade_date, r.outcome.symbol.as_str()), *r))
        .collect();

    let mut winners: HashMap<&str, Vec<f64>> = HashMap::new();
    let mut losers: HashMap<&str, Vec<f64>> = HashMap::new();
    let mut matched = 0usize;
    for decision in decisions {
        for f in decision.factors.iter().filter(|f| f.selected) {
            let Some(row) = by_key.get(&(decision.trade_date, f.symbol.as_str())) else {
                continue;
            };
            // Only score factors whose tracked direction matches the pick.
            if row.outcome.direction != f.direction {
                continue;
            }
            let won = net_excursion(row) > 0.0;
            matched += 1;
            for (name, value) in factor_terms(f) {
                if let Some(v) = value {
                    let bucket = if won { &mut winners } else { &mut losers };
                    bucket.entry(name).or_default().push(v);
                }
            }
        }
    }

    if matched < config.min_agent_samples {
        return old.clone();
    }

    let scaled: Vec<(&str, f64)> = old
        .values()
        .iter()
        .map(|(name, c)| {
            let w = winners.get(name).map(Vec::as_slice).unwrap_or(&[]);
            let l = losers.get(name).map(Vec::as_slice).unwrap_or(&[]);
            let edge = if w.is_empty() || l.is_empty() { 0.0 } else { mean(w) - mean(l) };
            (*name, c * (1.0 + config.learning_rate * edge).max(0.0))
        })
        .collect();

    let new_sum: f64 = scaled.iter().map(|(_, c)| c).sum();
    if new_sum <= f64::EPSILON {
        return old.clone();
    }
    let factor = old.sum() / new_sum;
    let get = |name: &str| {
        scaled
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, c)| c * factor)
            .unwrap_or(0.0)
    };
    ConfidenceCoefficients {
        agreement: get("agreement"),
        trust: get("trust"),
        volatility: get("volatility"),
        alignment: get("alignment"),
        history: get("history"),
    }
}

/// Short note forwarded to prescreen and arbitration: hit rates and the best
/// non-pick movers of the window.
fn guidance(history: &[TrackedCandidate], config: &LearnerConfig) -> String {
    let picks = medium_hit_rate(history.iter().filter(|r| r.outcome.was_pick));
    let others = medium_hit_rate(history.iter().filter(|r| !r.outcome.was_pick));
    let pct = |rate: Option<f64>| match rate {
        Some(r) => format!("{:.0}%", r * 100.0),
        None => "n/a".to_string(),
    };

    let mut missed: Vec<&TrackedCandidate> = history
        .iter()
        .filter(|r| !r.outcome.was_pick && r.outcome.hit_medium)
        .collect();
    missed.sort_by(|a, b| {
        b.outcome
            .max_gain_pct
            .total_cmp(&a.outcome.max_gain_pct)
            .then_with(|| a.outcome.symbol.cmp(&b.outcome.symbol))
    });
    missed.truncate(config.missed_movers);

    let mut note = format!(
        "Trailing {} days: medium-target hit rate {} for picks, {} for other shortlisted names.",
        config.window_days,
        pct(picks),
        pct(others)
    );
    if !missed.is_empty() {
        let names: Vec<String> = missed
            .iter()
            .map(|r| {
                format!(
                    "{} {} +{:.1}% ({})",
                    r.outcome.symbol, r.outcome.direction, r.outcome.max_gain_pct, r.outcome.trade_date
                )
            })
            .collect();
        note.push_str(&format!(" Missed movers: {}.", names.join(", ")));
    }
    note
}
