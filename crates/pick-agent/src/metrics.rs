use std::collections::{BTreeMap, VecDeque};

use learner::LearningReport;
use outcome_tracker::TrackerReport;
use pick_core::RunStatus;
use pick_store::LearningRunStatus;
use pipeline_orchestrator::RunReport;
use serde::{Deserialize, Serialize};

/// Process-lifetime telemetry for the agent, persisted between restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub runs: u64,
    pub published_days: u64,
    pub halted_days: u64,
    pub empty_days: u64,
    pub failed_days: u64,
    pub skipped_days: u64,
    pub picks_published: u64,

    pub tracking_passes: u64,
    pub outcomes_updated: u64,
    pub outcomes_closed: u64,
    pub tracking_failures: u64,

    pub learning_committed: u64,
    pub learning_rejected: u64,
    pub learning_skipped: u64,

    pub last_run_ms: u64,
    pub last_stage_ms: BTreeMap<String, u64>,

    /// Pick counts of the last 20 published days
    #[serde(default)]
    recent_picks: VecDeque<usize>,
    #[serde(skip)]
    ticks: u64,
}

impl AgentMetrics {
    pub fn record_run(&mut self, report: &RunReport) {
        self.runs += 1;
        match &report.status {
            RunStatus::Published { picks } => {
                self.published_days += 1;
                self.picks_published += *picks as u64;
                self.recent_picks.push_back(*picks);
                if self.recent_picks.len() > 20 {
                    self.recent_picks.pop_front();
                }
            }
            RunStatus::NoQualifyingPicks => self.empty_days += 1,
            RunStatus::Halted { .. } => self.halted_days += 1,
            RunStatus::Failed { .. } => self.failed_days += 1,
            RunStatus::Skipped => self.skipped_days += 1,
        }
        self.last_run_ms = report.metrics.total_ms();
        self.last_stage_ms = report.metrics.durations_ms.clone();
    }

    pub fn record_tracking(&mut self, report: &TrackerReport) {
        self.tracking_passes += 1;
        self.outcomes_updated += report.updated as u64;
        self.outcomes_closed += report.closed as u64;
        self.tracking_failures += report.failed as u64;
    }

    pub fn record_learning(&mut self, report: &LearningReport) {
        match report.status {
            LearningRunStatus::Committed => self.learning_committed += 1,
            LearningRunStatus::Skipped => self.learning_skipped += 1,
            LearningRunStatus::Rejected | LearningRunStatus::Failed => self.learning_rejected += 1,
        }
    }

    pub fn record_learning_error(&mut self) {
        self.learning_rejected += 1;
    }

    /// Average picks per published day over the recent window
    pub fn recent_avg_picks(&self) -> f64 {
        if self.recent_picks.is_empty() {
            return 0.0;
        }
        self.recent_picks.iter().sum::<usize>() as f64 / self.recent_picks.len() as f64
    }

    /// Count a scheduler tick; logs a summary every `interval` ticks.
    pub fn tick(&mut self, interval: u64) {
        self.ticks += 1;
        if interval > 0 && self.ticks % interval == 0 {
            self.log_metrics();
        }
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            runs = self.runs,
            published_days = self.published_days,
            halted_days = self.halted_days,
            empty_days = self.empty_days,
            failed_days = self.failed_days,
            skipped_days = self.skipped_days,
            picks_published = self.picks_published,
            recent_avg_picks = format!("{:.1}", self.recent_avg_picks()),
            outcomes_closed = self.outcomes_closed,
            tracking_failures = self.tracking_failures,
            learning_committed = self.learning_committed,
            learning_rejected = self.learning_rejected,
            last_run_ms = self.last_run_ms,
            "Agent metrics summary"
        );
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Restore counters from persisted JSON; unreadable state starts from zero.
    pub fn restore_from_json(json: &str) -> Self {
        match serde_json::from_str::<Self>(json) {
            Ok(restored) => {
                tracing::info!("Restored metrics from persisted state (runs={})", restored.runs);
                restored
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable persisted metrics: {}", e);
                Self::default()
            }
        }
    }
}
