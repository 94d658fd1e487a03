use std::time::Duration;

use arbitrator::{ArbitratorConfig, Rotation};
use chart_renderer::ChartSpec;
use kill_switch::KillSwitchConfig;
use outcome_tracker::TrackerConfig;
use universe_filter::FilterCriteria;

/// Everything one daily run needs besides the services and the store.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Exact number of shortlist candidates the prescreen must return
    pub shortlist_size: usize,
    pub prescreen_timeout: Duration,
    /// Total prescreen attempts, first call included
    pub prescreen_attempts: u32,
    /// Delay before the second attempt; doubles after each further failure
    pub retry_backoff: Duration,
    /// Max in-flight calls per enrichment service
    pub enrichment_concurrency: usize,
    pub vision_timeout: Duration,
    pub social_timeout: Duration,
    /// Calendar days of bars loaded for each chart
    pub chart_lookback_days: i64,
    /// Trailing trade days of outcomes summarised for the arbitrator
    pub setup_history_days: i64,
    pub filter: FilterCriteria,
    pub kill_switch: KillSwitchConfig,
    pub chart: ChartSpec,
    pub rotation: Rotation,
    pub arbitrator: ArbitratorConfig,
    pub tracker: TrackerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shortlist_size: 75,
            prescreen_timeout: Duration::from_secs(180),
            prescreen_attempts: 2,
            retry_backoff: Duration::from_secs(2),
            enrichment_concurrency: 8,
            vision_timeout: Duration::from_secs(45),
            social_timeout: Duration::from_secs(30),
            chart_lookback_days: 120,
            setup_history_days: 90,
            filter: FilterCriteria::default(),
            kill_switch: KillSwitchConfig::default(),
            chart: ChartSpec::default(),
            rotation: Rotation::default(),
            arbitrator: ArbitratorConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}
