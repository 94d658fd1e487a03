//! Nightly learning loop.
//!
//! Reads the trailing window of tracked outcomes and arbitration audit rows,
//! proposes a new weight set, checks it against [`WeightBounds`] and commits
//! it as a new active version. A rejected proposal leaves the previous
//! version active and is returned as an error.

mod proposal;
mod writer;


use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use pick_core::{PipelineError, PipelineResult, WeightBounds};
use pick_store::{LearningRunRecord, LearningRunStatus, PickStore};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub use proposal::{directional_accuracy, propose, Proposal};
use writer::WeightWriter;

pub const STATE_LAST_LEARNING_DAY: &str = "last_learning_day";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Trailing window of trade days to learn from
    pub window_days: i64,
    /// Observed outcomes required before any weight moves
    pub min_samples: usize,
    /// Per-agent (and per-factor) samples required before trust moves
    pub min_agent_samples: usize,
    /// Blend factor toward the newly measured values, 0..=1
    pub learning_rate: f64,
    /// Non-pick movers named in the guidance note
    pub missed_movers: usize,
    pub bounds: WeightBounds,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_samples: 20,
            min_agent_samples: 10,
            learning_rate: 0.2,
            missed_movers: 3,
            bounds: WeightBounds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningReport {
    pub run_date: NaiveDate,
    pub status: LearningRunStatus,
    /// Version active after the run
    pub active_version: i64,
    pub samples: usize,
    pub reason: Option<String>,
}

pub struct LearnerAgent {
    store: Arc<PickStore>,
    writer: WeightWriter,
    config: LearnerConfig,
}

impl LearnerAgent {
    pub fn new(store: Arc<PickStore>, config: LearnerConfig) -> Self {
        let writer = WeightWriter::new(store.pool().clone());
        Self { store, writer, config }
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// One nightly learning pass for `run_date`.
    pub async fn run(&self, run_date: NaiveDate) -> PipelineResult<LearningReport> {
        let current = self.store.load_active_weights().await.map_err(PipelineError::store)?;

        if !self.store.pipeline_enabled().await.map_err(PipelineError::store)? {
            info!("Learning skipped for {}: pipeline disabled", run_date);
            return Ok(LearningReport {
                run_date,
                status: LearningRunStatus::Skipped,
                active_version: current.version,
                samples: 0,
                reason: Some("pipeline disabled".to_string()),
            });
        }

        let since = run_date - Duration::days(self.config.window_days);
        let history = self
            .store
            .tracked_candidates(since)
            .await
            .map_err(PipelineError::store)?;
        let decisions = self
            .store
            .load_decisions(since)
            .await
            .map_err(PipelineError::store)?;

        let report = match propose(&current, &history, &decisions, &self.config) {
            Proposal::Insufficient { samples, required } => {
                let reason = format!("{} observed outcomes, {} required", samples, required);
                info!("Learning skipped for {}: {}", run_date, reason);
                self.record(run_date, LearningRunStatus::Skipped, None, samples, Some(reason.clone()))
                    .await?;
                LearningReport {
                    run_date,
                    status: LearningRunStatus::Skipped,
                    active_version: current.version,
                    samples,
                    reason: Some(reason),
                }
            }
            Proposal::Ready { weights, samples } => {
                if let Err(e) = self.config.bounds.validate(&weights) {
                    error!(
                        "Learning rejected for {}: {} (version {} stays active)",
                        run_date, e, current.version
                    );
                    self.record(run_date, LearningRunStatus::Rejected, None, samples, Some(e.to_string()))
                        .await?;
                    return Err(e);
                }

                let version = match self.writer.commit(&weights).await {
                    Ok(v) => v,
                    Err(e) => {
                        error!("Weight commit failed for {}: {:#}", run_date, e);
                        self.record(run_date, LearningRunStatus::Failed, None, samples, Some(e.to_string()))
                            .await?;
                        return Err(PipelineError::store(e));
                    }
                };
                info!(
                    "Learning committed weight version {} from {} outcomes ({} decisions)",
                    version,
                    samples,
                    decisions.len()
                );
                self.record(run_date, LearningRunStatus::Committed, Some(version), samples, None)
                    .await?;
                LearningReport {
                    run_date,
                    status: LearningRunStatus::Committed,
                    active_version: version,
                    samples,
                    reason: None,
                }
            }
        };

        if let Err(e) = self
            .store
            .save_state(STATE_LAST_LEARNING_DAY, &run_date.to_string())
            .await
        {
            warn!("Failed to save last learning day: {}", e);
        }
        Ok(report)
    }

    async fn record(
        &self,
        run_date: NaiveDate,
        status: LearningRunStatus,
        weights_version: Option<i64>,
        samples: usize,
        reason: Option<String>,
    ) -> PipelineResult<()> {
        self.store
            .record_learning_run(&LearningRunRecord {
                run_date,
                status,
                weights_version,
                samples,
                reason,
                created_at: Utc::now(),
            })
            .await
            .map_err(PipelineError::store)
    }
}
