//! Versioned weight sets owned by the learner.
//!
//! Pipeline components only ever see a `WeightSet` snapshot loaded at the start
//! of a run; nothing here mutates stored weights.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PipelineError;
use crate::types::FEATURE_KEYS;

pub const AGENT_TECHNICAL: &str = "technical";
pub const AGENT_VISION: &str = "vision";
pub const AGENT_SOCIAL: &str = "social";
pub const AGENTS: &[&str] = &[AGENT_TECHNICAL, AGENT_VISION, AGENT_SOCIAL];

/// Feature importance consumed by the prescreen stage
pub type FeatureWeights = BTreeMap<String, f64>;

/// Coefficients of the arbitrator's confidence blend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceCoefficients {
    pub agreement: f64,
    pub trust: f64,
    pub volatility: f64,
    pub alignment: f64,
    pub history: f64,
}

impl Default for ConfidenceCoefficients {
    fn default() -> Self {
        Self {
            agreement: 0.35,
            trust: 0.15,
            volatility: 0.2,
            alignment: 0.2,
            history: 0.1,
        }
    }
}

impl ConfidenceCoefficients {
    pub fn values(&self) -> [(&'static str, f64); 5] {
        [
            ("agreement", self.agreement),
            ("trust", self.trust),
            ("volatility", self.volatility),
            ("alignment", self.alignment),
            ("history", self.history),
        ]
    }

    pub fn sum(&self) -> f64 {
        self.values().iter().map(|(_, v)| v).sum()
    }
}

/// Per-agent trust plus the confidence blend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentWeights {
    pub trust: BTreeMap<String, f64>,
    pub coefficients: ConfidenceCoefficients,
}

impl Default for AgentWeights {
    fn default() -> Self {
        let trust = AGENTS
            .iter()
            .map(|a| (a.to_string(), 0.6))
            .collect();
        Self {
            trust,
            coefficients: ConfidenceCoefficients::default(),
        }
    }
}

impl AgentWeights {
    pub fn trust_for(&self, agent: &str) -> f64 {
        self.trust.get(agent).copied().unwrap_or(0.0)
    }
}

/// One immutable version of the learned configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    /// 0 is the built-in baseline that exists before any learning run
    pub version: i64,
    pub feature_weights: FeatureWeights,
    pub agent_weights: AgentWeights,
    /// Free-text guidance forwarded to the prescreen and arbitrator services
    pub guidance: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for WeightSet {
    fn default() -> Self {
        let equal = 1.0 / FEATURE_KEYS.len() as f64;
        Self {
            version: 0,
            feature_weights: FEATURE_KEYS.iter().map(|k| (k.to_string(), equal)).collect(),
            agent_weights: AgentWeights::default(),
            guidance: None,
            created_at: DateTime::<Utc>::default(),
        }
    }
}

/// Sanity bounds a candidate weight set must satisfy before it may be committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    pub max_feature_weight: f64,
    pub feature_sum_min: f64,
    pub feature_sum_max: f64,
    pub max_trust: f64,
    pub coefficient_sum_min: f64,
    pub coefficient_sum_max: f64,
}

impl Default for WeightBounds {
    fn default() -> Self {
        Self {
            max_feature_weight: 0.6,
            feature_sum_min: 0.9,
            feature_sum_max: 1.1,
            max_trust: 1.0,
            coefficient_sum_min: 0.8,
            coefficient_sum_max: 1.2,
        }
    }
}

impl WeightBounds {
    pub fn validate(&self, set: &WeightSet) -> Result<(), PipelineError> {
        let fail = |msg: String| -> Result<(), PipelineError> { Err(PipelineError::WeightIntegrity(msg)) };

        if set.feature_weights.is_empty() {
            return fail("feature weights are empty".to_string());
        }
        for (key, w) in &set.feature_weights {
            if !FEATURE_KEYS.contains(&key.as_str()) {
                return fail(format!("unknown feature '{}'", key));
            }
            if !w.is_finite() || *w < 0.0 {
                return fail(format!("feature weight {}={} is negative or not finite", key, w));
            }
            if *w > self.max_feature_weight {
                return fail(format!(
                    "feature weight {}={:.3} exceeds max {:.3}",
                    key, w, self.max_feature_weight
                ));
            }
        }
        let feature_sum: f64 = set.feature_weights.values().sum();
        if feature_sum < self.feature_sum_min || feature_sum > self.feature_sum_max {
            return fail(format!(
                "feature weights sum to {:.3}, outside [{:.2}, {:.2}]",
                feature_sum, self.feature_sum_min, self.feature_sum_max
            ));
        }

        for agent in AGENTS {
            match set.agent_weights.trust.get(*agent) {
                None => return fail(format!("missing trust weight for {}", agent)),
                Some(t) if !t.is_finite() || *t < 0.0 || *t > self.max_trust => {
                    return fail(format!(
                        "trust weight {}={} outside [0, {}]",
                        agent, t, self.max_trust
                    ))
                }
                Some(_) => {}
            }
        }

        let coefficients = &set.agent_weights.coefficients;
        for (name, c) in coefficients.values() {
            if !c.is_finite() || c < 0.0 {
                return fail(format!("confidence coefficient {}={} is negative or not finite", name, c));
            }
        }
        let coefficient_sum = coefficients.sum();
        if coefficient_sum < self.coefficient_sum_min || coefficient_sum > self.coefficient_sum_max {
            return fail(format!(
                "confidence coefficients sum to {:.3}, outside [{:.2}, {:.2}]",
                coefficient_sum, self.coefficient_sum_min, self.coefficient_sum_max
            ));
        }

        Ok(())
    }
}
