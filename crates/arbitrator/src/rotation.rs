//! Which named strategy arbitrates on a given day.

use std::collections::HashMap;
use std::sync::Arc;

use agent_client::ArbitrationService;
use chrono::{Datelike, NaiveDate};
use pick_core::{PipelineError, PipelineResult};

/// Weekday → strategy id, Monday first
#[derive(Debug, Clone)]
pub struct Rotation {
    by_weekday: [String; 7],
}

impl Default for Rotation {
    fn default() -> Self {
        Self::new([
            "momentum",
            "mean_reversion",
            "breakout",
            "sentiment_driven",
            "risk_balanced",
            "risk_balanced",
            "risk_balanced",
        ])
    }
}

impl Rotation {
    pub fn new(ids: [&str; 7]) -> Self {
        Self {
            by_weekday: ids.map(|s| s.to_string()),
        }
    }

    /// Pure function of the calendar date.
    pub fn strategy_for(&self, date: NaiveDate) -> &str {
        &self.by_weekday[date.weekday().num_days_from_monday() as usize]
    }

    pub fn strategies(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_weekday.iter().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Interchangeable arbitration strategies keyed by id
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    services: HashMap<String, Arc<dyn ArbitrationService>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, service: Arc<dyn ArbitrationService>) {
        self.services.insert(id.into(), service);
    }

    pub fn with(mut self, id: impl Into<String>, service: Arc<dyn ArbitrationService>) -> Self {
        self.register(id, service);
        self
    }

    /// A missing strategy is an explicit failure; there is no default.
    pub fn resolve(&self, id: &str) -> PipelineResult<Arc<dyn ArbitrationService>> {
        self.services
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::ServiceUnavailable {
                service: format!("arbitrator:{}", id),
                reason: "no service registered for strategy".to_string(),
            })
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.services.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}
