use std::collections::BTreeMap;
use std::time::Instant;

use pick_core::Stage;
use serde::{Deserialize, Serialize};

/// Per-stage wall-clock timings and item counters for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub durations_ms: BTreeMap<String, u64>,
    pub counters: BTreeMap<String, u64>,
}

impl StageMetrics {
    pub fn record(&mut self, stage: Stage, started: Instant) -> u64 {
        let ms = started.elapsed().as_millis() as u64;
        *self.durations_ms.entry(stage.as_str().to_string()).or_insert(0) += ms;
        ms
    }

    pub fn count(&mut self, key: &str, n: usize) {
        *self.counters.entry(key.to_string()).or_insert(0) += n as u64;
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub fn total_ms(&self) -> u64 {
        self.durations_ms.values().sum()
    }
}
