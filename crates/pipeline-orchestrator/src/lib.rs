//! The daily selection run.
//!
//! Stages execute strictly in order and each one consumes the complete output
//! of the previous one: universe filter, kill switch, prescreen, chart render,
//! vision/social enrichment, arbitration, publish. A stage failure ends the
//! day with a `Failed` status and leaves everything committed so far intact,
//! so a later re-run picks up from the last committed stage.

mod config;
mod enrichment;
mod metrics;
mod prescreen;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use agent_client::{PrescreenService, SocialService, VisionService};
use arbitrator::{ArbitratorAgent, StrategyRegistry};
use chart_renderer::{ChartArtifact, ChartRenderer, RenderError};
use chrono::{Duration, NaiveDate, Utc};
use kill_switch::{GateVerdict, KillSwitch};
use outcome_tracker::{seed_for_candidate, seed_for_pick, setup_stats};
use pick_core::{
    MarketDataStore, Pick, PickBatch, PickOutcome, PipelineError, PipelineResult, Publisher, RunStatus,
    ShortlistCandidate, Stage, Tier, WeightSet,
};
use pick_store::{PickStore, RunRecord};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use universe_filter::{ActiveSymbol, UniverseFilter};

pub use config::PipelineConfig;
pub use enrichment::{EnrichmentReport, EnrichmentStage};
pub use metrics::StageMetrics;
pub use prescreen::{validate as validate_prescreen, PrescreenStage};

pub const STATE_LAST_PIPELINE_DAY: &str = "last_pipeline_day";
pub const STATE_LAST_PIPELINE_METRICS: &str = "last_pipeline_metrics";

/// External collaborators of one run
pub struct PipelineServices {
    pub prescreen: Arc<dyn PrescreenService>,
    pub vision: Arc<dyn VisionService>,
    pub social: Arc<dyn SocialService>,
    pub arbitrators: StrategyRegistry,
    pub publisher: Arc<dyn Publisher>,
}

/// What a caller learns about a day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub trade_date: NaiveDate,
    pub status: RunStatus,
    pub shortlist_count: usize,
    pub pick_count: usize,
    pub strategy: Option<String>,
    pub weights_version: Option<i64>,
    pub metrics: StageMetrics,
}

impl RunReport {
    fn skipped(trade_date: NaiveDate) -> Self {
        Self {
            trade_date,
            status: RunStatus::Skipped,
            shortlist_count: 0,
            pick_count: 0,
            strategy: None,
            weights_version: None,
            metrics: StageMetrics::default(),
        }
    }

    fn from_record(record: &RunRecord, status: RunStatus, metrics: StageMetrics) -> Self {
        Self {
            trade_date: record.trade_date,
            status,
            shortlist_count: record.shortlist_count,
            pick_count: record.pick_count,
            strategy: record.strategy.clone(),
            weights_version: record.weights_version,
            metrics,
        }
    }
}

struct StageFailure {
    stage: Stage,
    error: PipelineError,
}

fn at(stage: Stage) -> impl FnOnce(PipelineError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

fn store_at(stage: Stage) -> impl FnOnce(anyhow::Error) -> StageFailure {
    move |e| StageFailure {
        stage,
        error: PipelineError::store(format!("{:#}", e)),
    }
}

type ChartMap = BTreeMap<String, Result<ChartArtifact, RenderError>>;

pub struct DailyPipeline {
    store: Arc<PickStore>,
    filter: UniverseFilter,
    kill_switch: KillSwitch,
    prescreen: PrescreenStage,
    renderer: Arc<ChartRenderer>,
    enrichment: EnrichmentStage,
    arbitrator: ArbitratorAgent,
    publisher: Arc<dyn Publisher>,
    config: PipelineConfig,
}

impl DailyPipeline {
    pub fn new(store: Arc<PickStore>, services: PipelineServices, config: PipelineConfig) -> Self {
        Self {
            filter: UniverseFilter::new(config.filter.clone()),
            kill_switch: KillSwitch::new(config.kill_switch.clone()),
            prescreen: PrescreenStage::new(services.prescreen, &config),
            renderer: Arc::new(ChartRenderer::new(config.chart.clone())),
            enrichment: EnrichmentStage::new(services.vision, services.social, &config),
            arbitrator: ArbitratorAgent::new(config.rotation.clone(), services.arbitrators, config.arbitrator.clone()),
            publisher: services.publisher,
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run (or resume) the pipeline for one trading day.
    ///
    /// Returns `Err` only when the run record itself cannot be written; stage
    /// failures come back as `RunStatus::Failed` in the report.
    pub async fn run_day(&self, trade_date: NaiveDate) -> PipelineResult<RunReport> {
        if !self.store.pipeline_enabled().await.map_err(PipelineError::store)? {
            info!("Pipeline disabled, skipping {}", trade_date);
            return Ok(RunReport::skipped(trade_date));
        }

        if let Some(previous) = self.store.load_run(trade_date).await.map_err(PipelineError::store)? {
            if let Some(status) = previous.status.clone().filter(|s| s.is_terminal_success()) {
                info!("{} already finished as {}, not re-running", trade_date, status.as_str());
                return Ok(RunReport::from_record(&previous, status, StageMetrics::default()));
            }
        }

        let mut record = self.store.start_run(trade_date).await.map_err(PipelineError::store)?;
        let weights = Arc::new(self.store.load_active_weights().await.map_err(PipelineError::store)?);
        record.weights_version = Some(weights.version);
        record.strategy = Some(self.arbitrator.strategy_for(trade_date).to_string());
        info!(
            "Starting run for {} (weights v{}, strategy '{}')",
            trade_date,
            weights.version,
            self.arbitrator.strategy_for(trade_date)
        );

        let mut metrics = StageMetrics::default();
        let status = match self.execute(trade_date, &weights, &mut record, &mut metrics).await {
            Ok(status) => status,
            Err(StageFailure { stage, error: e }) => {
                error!("Run for {} failed at {}: {}", trade_date, stage, e);
                RunStatus::Failed {
                    stage,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        };

        if !matches!(status, RunStatus::Published { .. }) {
            if let Err(e) = self.publisher.publish_status(trade_date, &status).await {
                warn!("Could not announce {} status for {}: {}", status.as_str(), trade_date, e);
            }
        }

        record.status = Some(status.clone());
        record.finished_at = Some(Utc::now());
        self.store.finish_run(&record).await.map_err(PipelineError::store)?;

        if let Err(e) = self.store.save_state(STATE_LAST_PIPELINE_DAY, &trade_date.to_string()).await {
            warn!("Failed to save pipeline state: {}", e);
        }
        match serde_json::to_string(&metrics) {
            Ok(json) => {
                if let Err(e) = self.store.save_state(STATE_LAST_PIPELINE_METRICS, &json).await {
                    warn!("Failed to save run metrics: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize run metrics: {}", e),
        }

        info!(
            "Run for {} finished: {} ({} shortlisted, {} picks, {}ms, stages {:?}, counters {:?})",
            trade_date,
            status.as_str(),
            record.shortlist_count,
            record.pick_count,
            metrics.total_ms(),
            metrics.durations_ms,
            metrics.counters
        );
        Ok(RunReport::from_record(&record, status, metrics))
    }

    async fn execute(
        &self,
        trade_date: NaiveDate,
        weights: &Arc<WeightSet>,
        record: &mut RunRecord,
        metrics: &mut StageMetrics,
    ) -> Result<RunStatus, StageFailure> {
        let started = Instant::now();
        let active = self.filter_universe(trade_date).await?;
        metrics.record(Stage::UniverseFilter, started);
        metrics.count("active", active.len());

        let started = Instant::now();
        let condition = self
            .store
            .latest_market_condition(trade_date)
            .await
            .map_err(store_at(Stage::KillSwitch))?;
        let verdict = self
            .kill_switch
            .evaluate(trade_date, condition.as_ref())
            .map_err(at(Stage::KillSwitch))?;
        metrics.record(Stage::KillSwitch, started);
        if let GateVerdict::Halt { reason } = verdict {
            warn!("Kill switch halted {}: {}", trade_date, reason);
            return Ok(RunStatus::Halted { reason });
        }

        let started = Instant::now();
        let shortlist = self.shortlist(trade_date, &active, weights, metrics).await?;
        record.shortlist_count = shortlist.len();
        metrics.record(Stage::Prescreen, started);

        if self
            .store
            .is_arbitrated(trade_date)
            .await
            .map_err(store_at(Stage::Arbitration))?
        {
            let picks = self.store.load_picks(trade_date).await.map_err(store_at(Stage::Publish))?;
            info!("{} already arbitrated, re-publishing {} picks", trade_date, picks.len());
            return self.publish(trade_date, picks, record, metrics).await;
        }

        let started = Instant::now();
        let charts = self.render_charts(trade_date, &shortlist).await?;
        let failed = charts.values().filter(|c| c.is_err()).count();
        if failed > 0 {
            warn!("{} of {} charts failed to render", failed, charts.len());
        }
        metrics.record(Stage::ChartRender, started);
        metrics.count("charts_rendered", charts.len() - failed);
        metrics.count("charts_failed", failed);

        let started = Instant::now();
        let (shortlist, report) = self.enrichment.run(trade_date, shortlist, charts).await;
        self.store
            .save_enrichments(trade_date, &shortlist)
            .await
            .map_err(store_at(Stage::Enrichment))?;
        metrics.record(Stage::Enrichment, started);
        metrics.count("vision_unavailable", report.vision_unavailable);
        metrics.count("social_unavailable", report.social_unavailable);
        info!(
            "Enrichment for {}: vision {}/{}, social {}/{} available",
            trade_date,
            report.vision_available,
            shortlist.len(),
            report.social_available,
            shortlist.len()
        );

        let started = Instant::now();
        let picks = self.arbitrate(trade_date, &shortlist, weights).await?;
        metrics.record(Stage::Arbitration, started);

        self.publish(trade_date, picks, record, metrics).await
    }

    async fn filter_universe(&self, trade_date: NaiveDate) -> Result<Vec<ActiveSymbol>, StageFailure> {
        let stage = Stage::UniverseFilter;
        let latest = self.store.latest_bar_date().await.map_err(at(stage))?;
        self.filter.check_freshness(latest, trade_date).map_err(at(stage))?;

        let universe = self
            .store
            .load_universe(trade_date, self.filter.criteria().lookback_days)
            .await
            .map_err(at(stage))?;
        let report = self.filter.apply(trade_date, &universe);

        let symbols: Vec<String> = report.active.iter().map(|a| a.symbol.clone()).collect();
        self.store
            .promote_tier(trade_date, &symbols, Tier::Active)
            .await
            .map_err(store_at(stage))?;
        Ok(report.active)
    }

    /// The day's committed shortlist, or a fresh one from the prescreen service.
    async fn shortlist(
        &self,
        trade_date: NaiveDate,
        active: &[ActiveSymbol],
        weights: &WeightSet,
        metrics: &mut StageMetrics,
    ) -> Result<Vec<ShortlistCandidate>, StageFailure> {
        let stage = Stage::Prescreen;
        let existing = self.store.load_shortlist(trade_date).await.map_err(store_at(stage))?;
        if !existing.is_empty() {
            info!("Reusing committed shortlist of {} for {}", existing.len(), trade_date);
            metrics.count("shortlist_reused", 1);
            return Ok(existing);
        }

        let shortlist = self.prescreen.run(trade_date, active, weights).await.map_err(at(stage))?;
        // Every shortlisted symbol is tracked whether or not arbitration succeeds.
        let seeds: Vec<PickOutcome> = shortlist
            .iter()
            .map(|c| seed_for_candidate(c, &self.config.tracker))
            .collect();
        self.store
            .commit_shortlist(trade_date, &shortlist, &seeds)
            .await
            .map_err(store_at(stage))?;
        metrics.count("shortlisted", shortlist.len());
        Ok(shortlist)
    }

    /// Charts for every candidate still waiting on vision; rendered off the
    /// async runtime.
    async fn render_charts(
        &self,
        trade_date: NaiveDate,
        shortlist: &[ShortlistCandidate],
    ) -> Result<ChartMap, StageFailure> {
        let stage = Stage::ChartRender;
        let from = trade_date - Duration::days(self.config.chart_lookback_days);
        let mut inputs = Vec::new();
        for candidate in shortlist.iter().filter(|c| c.vision.is_pending()) {
            let bars = self
                .store
                .load_bars(&candidate.symbol, from, trade_date)
                .await
                .map_err(at(stage))?;
            inputs.push((candidate.symbol.clone(), bars));
        }

        let renderer = Arc::clone(&self.renderer);
        tokio::task::spawn_blocking(move || renderer.render_batch(&inputs))
            .await
            .map_err(|e| StageFailure {
                stage,
                error: PipelineError::InvalidData(format!("chart render task failed: {}", e)),
            })
    }

    /// Arbitrate and commit picks, the audit row and the pick outcomes in one go.
    async fn arbitrate(
        &self,
        trade_date: NaiveDate,
        shortlist: &[ShortlistCandidate],
        weights: &WeightSet,
    ) -> Result<Vec<Pick>, StageFailure> {
        let stage = Stage::Arbitration;
        let since = trade_date - Duration::days(self.config.setup_history_days);
        let history = self
            .store
            .tracked_candidates(since)
            .await
            .map_err(store_at(stage))?;
        let stats = setup_stats(&history);

        let arbitration = self
            .arbitrator
            .arbitrate(trade_date, shortlist, weights, &stats)
            .await
            .map_err(at(stage))?;

        let picked: BTreeMap<&str, &Pick> = arbitration.picks.iter().map(|p| (p.symbol.as_str(), p)).collect();
        let outcomes: Vec<PickOutcome> = shortlist
            .iter()
            .map(|c| match picked.get(c.symbol.as_str()) {
                Some(pick) => seed_for_pick(pick),
                None => seed_for_candidate(c, &self.config.tracker),
            })
            .collect();

        self.store
            .commit_arbitration(trade_date, &arbitration.picks, &arbitration.decision, &outcomes)
            .await
            .map_err(store_at(stage))?;
        if !arbitration.qualified() {
            info!("No proposal for {} cleared selection", trade_date);
        }
        Ok(arbitration.picks)
    }

    async fn publish(
        &self,
        trade_date: NaiveDate,
        picks: Vec<Pick>,
        record: &mut RunRecord,
        metrics: &mut StageMetrics,
    ) -> Result<RunStatus, StageFailure> {
        record.pick_count = picks.len();
        if picks.is_empty() {
            return Ok(RunStatus::NoQualifyingPicks);
        }

        let started = Instant::now();
        let strategy = picks
            .first()
            .map(|p| p.strategy.clone())
            .or_else(|| record.strategy.clone())
            .unwrap_or_default();
        let batch = PickBatch {
            trade_date,
            strategy,
            picks,
            published_at: Utc::now(),
        };
        self.publisher.publish(&batch).await.map_err(at(Stage::Publish))?;
        self.store
            .mark_published(trade_date)
            .await
            .map_err(store_at(Stage::Publish))?;
        metrics.record(Stage::Publish, started);
        metrics.count("published", batch.picks.len());

        info!("Published {} picks for {}", batch.picks.len(), trade_date);
        Ok(RunStatus::Published {
            picks: batch.picks.len(),
        })
    }
}

#[cfg(test)]
mod tests;
