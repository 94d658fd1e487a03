//! Single prescreen call per day with exact-cardinality enforcement.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use agent_client::{AgentError, PrescreenCandidate, PrescreenEntry, PrescreenRequest, PrescreenService};
use chrono::NaiveDate;
use pick_core::{Direction, Enrichment, PipelineError, PipelineResult, ShortlistCandidate, Stage, WeightSet};
use technical_features::weighted_scores;
use tracing::{info, warn};
use universe_filter::ActiveSymbol;

use crate::PipelineConfig;

pub struct PrescreenStage {
    service: Arc<dyn PrescreenService>,
    shortlist_size: usize,
    timeout: Duration,
    attempts: u32,
    backoff: Duration,
}

impl PrescreenStage {
    pub fn new(service: Arc<dyn PrescreenService>, config: &PipelineConfig) -> Self {
        Self {
            service,
            shortlist_size: config.shortlist_size,
            timeout: config.prescreen_timeout,
            attempts: config.prescreen_attempts.max(1),
            backoff: config.retry_backoff,
        }
    }

    pub fn model_name(&self) -> &str {
        self.service.model_name()
    }

    /// Rank the ACTIVE tier down to exactly `shortlist_size` candidates.
    ///
    /// Short, long or malformed answers are retried with exponential backoff
    /// up to the attempt limit; then the stage fails. Nothing is persisted here.
    pub async fn run(
        &self,
        trade_date: NaiveDate,
        active: &[ActiveSymbol],
        weights: &WeightSet,
    ) -> PipelineResult<Vec<ShortlistCandidate>> {
        if active.len() < self.shortlist_size {
            return Err(PipelineError::InsufficientUniverse {
                active: active.len(),
                required: self.shortlist_size,
            });
        }

        let request = self.build_request(trade_date, active, weights);
        let by_symbol: HashMap<&str, &ActiveSymbol> = active.iter().map(|a| (a.symbol.as_str(), a)).collect();

        let mut last_error = None;
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                let delay = self.backoff.saturating_mul(2u32.saturating_pow(attempt - 2));
                warn!("Prescreen attempt {} in {:?}", attempt, delay);
                tokio::time::sleep(delay).await;
            }

            let result = match tokio::time::timeout(self.timeout, self.service.prescreen(&request)).await {
                Ok(Ok(response)) => validate(trade_date, response.entries, &by_symbol, self.shortlist_size, attempt),
                Ok(Err(AgentError::InvalidResponse(reason))) => Err(PipelineError::Malformed {
                    stage: Stage::Prescreen,
                    reason,
                    attempts: attempt,
                }),
                Ok(Err(e)) => {
                    let retry = e.is_transient();
                    let err = PipelineError::ServiceUnavailable {
                        service: format!("prescreen:{}", self.service.model_name()),
                        reason: e.to_string(),
                    };
                    if !retry {
                        warn!("Prescreen rejected the request, not retrying: {}", err);
                        return Err(err);
                    }
                    Err(err)
                }
                Err(_) => Err(PipelineError::Timeout {
                    stage: Stage::Prescreen,
                    seconds: self.timeout.as_secs(),
                }),
            };

            match result {
                Ok(shortlist) => {
                    info!(
                        "Prescreen returned {} candidates for {} (attempt {})",
                        shortlist.len(),
                        trade_date,
                        attempt
                    );
                    return Ok(shortlist);
                }
                Err(e) => {
                    warn!("Prescreen attempt {}/{} failed: {}", attempt, self.attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(PipelineError::Malformed {
            stage: Stage::Prescreen,
            reason: "no attempt made".to_string(),
            attempts: 0,
        }))
    }

    fn build_request(&self, trade_date: NaiveDate, active: &[ActiveSymbol], weights: &WeightSet) -> PrescreenRequest {
        let snapshots: BTreeMap<String, _> = active
            .iter()
            .map(|a| (a.symbol.clone(), a.features.clone()))
            .collect();
        let by_symbol: HashMap<&str, &ActiveSymbol> = active.iter().map(|a| (a.symbol.as_str(), a)).collect();

        let candidates = weighted_scores(&snapshots, &weights.feature_weights)
            .into_iter()
            .filter_map(|(symbol, score)| {
                by_symbol.get(symbol.as_str()).map(|a| PrescreenCandidate {
                    symbol: a.symbol.clone(),
                    sector: a.sector.clone(),
                    features: a.features.clone(),
                    local_score: score,
                })
            })
            .collect();

        PrescreenRequest {
            trade_date,
            shortlist_size: self.shortlist_size,
            candidates,
            feature_weights: weights.feature_weights.clone(),
            guidance: weights.guidance.clone(),
        }
    }
}

/// Turn a prescreen answer into shortlist rows, or explain why it is unusable.
pub fn validate(
    trade_date: NaiveDate,
    entries: Vec<PrescreenEntry>,
    active: &HashMap<&str, &ActiveSymbol>,
    expected: usize,
    attempt: u32,
) -> PipelineResult<Vec<ShortlistCandidate>> {
    if entries.len() != expected {
        return Err(PipelineError::Cardinality {
            stage: Stage::Prescreen,
            expected,
            got: entries.len(),
            attempts: attempt,
        });
    }
    let malformed = |reason: String| PipelineError::Malformed {
        stage: Stage::Prescreen,
        reason,
        attempts: attempt,
    };

    let mut seen = HashSet::new();
    let mut shortlist = Vec::with_capacity(entries.len());
    for (i, entry) in entries.into_iter().enumerate() {
        let symbol = entry.symbol.trim().to_ascii_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(malformed(format!("duplicate symbol {}", symbol)));
        }
        let Some(source) = active.get(symbol.as_str()) else {
            return Err(malformed(format!("{} is not in the ACTIVE tier", symbol)));
        };
        let Some(bias) = Direction::parse(&entry.bias) else {
            return Err(malformed(format!("{} has unknown bias '{}'", symbol, entry.bias)));
        };
        if !entry.score.is_finite() {
            return Err(malformed(format!("{} has a non-finite score", symbol)));
        }

        shortlist.push(ShortlistCandidate {
            trade_date,
            symbol,
            sector: source.sector.clone(),
            rank: i as u32 + 1,
            prescreen_score: entry.score,
            prescreen_reasoning: entry.reasoning,
            bias,
            features: source.features.clone(),
            vision: Enrichment::Pending,
            social: Enrichment::Pending,
            selected_as_pick: false,
        });
    }
    Ok(shortlist)
}
