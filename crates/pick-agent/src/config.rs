use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use agent_client::ServicesConfig;
use anyhow::{Context, Result};
use chrono::NaiveTime;
use learner::LearnerConfig;
use outcome_tracker::TrackerConfig;
use pipeline_orchestrator::PipelineConfig;

/// Read `key` or fall back to `default`, failing loudly on an unparsable value.
fn var_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        _ => Ok(default),
    }
}

fn time_or(key: &str, default: NaiveTime) -> Result<NaiveTime> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .with_context(|| format!("{} must be HH:MM, got '{}'", key, raw)),
        _ => Ok(default),
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Daily pipeline start, US/Eastern, weekdays only
    pub pipeline_at: NaiveTime,
    /// Nightly learning start, US/Eastern
    pub learn_at: NaiveTime,
    pub track_interval: Duration,
    /// Scheduler wake-up period
    pub tick: Duration,
    pub metrics_log_interval_ticks: u64,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub database_url: String,
    pub db_max_connections: u32,

    pub services: ServicesConfig,
    pub prescreen_model: String,
    pub vision_model: String,
    pub social_model: String,
    /// Strategy id → model served behind the arbitrator endpoint
    pub strategy_models: BTreeMap<String, String>,

    /// Empty disables publishing; picks are still stored
    pub webhook_url: String,

    pub pipeline: PipelineConfig,
    pub tracker: TrackerConfig,
    pub learner: LearnerConfig,
    pub schedule: ScheduleConfig,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let mut pipeline = PipelineConfig::default();
        pipeline.shortlist_size = var_or("SHORTLIST_SIZE", pipeline.shortlist_size)?;
        pipeline.prescreen_attempts = var_or("PRESCREEN_ATTEMPTS", pipeline.prescreen_attempts)?;
        pipeline.retry_backoff = Duration::from_millis(var_or("RETRY_BACKOFF_MS", 2_000u64)?);
        pipeline.enrichment_concurrency = var_or("ENRICHMENT_CONCURRENCY", pipeline.enrichment_concurrency)?;
        pipeline.chart_lookback_days = var_or("CHART_LOOKBACK_DAYS", pipeline.chart_lookback_days)?;
        pipeline.setup_history_days = var_or("SETUP_HISTORY_DAYS", pipeline.setup_history_days)?;

        pipeline.filter.min_price = var_or("FILTER_MIN_PRICE", pipeline.filter.min_price)?;
        pipeline.filter.min_avg_volume = var_or("FILTER_MIN_AVG_VOLUME", pipeline.filter.min_avg_volume)?;
        pipeline.filter.min_market_cap = var_or("FILTER_MIN_MARKET_CAP", pipeline.filter.min_market_cap)?;
        pipeline.filter.max_data_age_days = var_or("MAX_DATA_AGE_DAYS", pipeline.filter.max_data_age_days)?;

        pipeline.kill_switch.max_volatility_index =
            var_or("KILL_SWITCH_MAX_VIX", pipeline.kill_switch.max_volatility_index)?;
        pipeline.kill_switch.min_premarket_change_pct =
            var_or("KILL_SWITCH_MIN_PREMARKET_PCT", pipeline.kill_switch.min_premarket_change_pct)?;

        pipeline.arbitrator.rules.min_picks = var_or("MIN_PICKS", pipeline.arbitrator.rules.min_picks)?;
        pipeline.arbitrator.rules.max_picks = var_or("MAX_PICKS", pipeline.arbitrator.rules.max_picks)?;
        pipeline.arbitrator.rules.confidence_floor =
            var_or("CONFIDENCE_FLOOR", pipeline.arbitrator.rules.confidence_floor)?;

        let services = ServicesConfig::from_env();
        // The per-call budgets follow the service endpoints
        pipeline.prescreen_timeout = services.prescreen.timeout;
        pipeline.vision_timeout = services.vision.timeout;
        pipeline.social_timeout = services.social.timeout;
        pipeline.arbitrator.timeout = services.arbitrator.timeout;

        let mut tracker = TrackerConfig::default();
        tracker.window_days = var_or("TRACKING_WINDOW_DAYS", tracker.window_days)?;
        tracker.grace_days = var_or("TRACKING_GRACE_DAYS", tracker.grace_days)?;
        pipeline.tracker = tracker.clone();

        let mut learner = LearnerConfig::default();
        learner.window_days = var_or("LEARNER_WINDOW_DAYS", learner.window_days)?;
        learner.min_samples = var_or("LEARNER_MIN_SAMPLES", learner.min_samples)?;
        learner.learning_rate = var_or("LEARNING_RATE", learner.learning_rate)?;
        learner.bounds.max_feature_weight = var_or("MAX_FEATURE_WEIGHT", learner.bounds.max_feature_weight)?;

        let strategy_models = pipeline
            .rotation
            .strategies()
            .into_iter()
            .map(|id| {
                let key = format!("ARBITRATOR_MODEL_{}", id.to_ascii_uppercase());
                let model = env::var(&key).unwrap_or_else(|_| id.to_string());
                (id.to_string(), model)
            })
            .collect();

        let config = Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:picks.db?mode=rwc".to_string()),
            db_max_connections: var_or("DB_MAX_CONNECTIONS", 5)?,
            services,
            prescreen_model: env::var("PRESCREEN_MODEL").unwrap_or_else(|_| "prescreen".to_string()),
            vision_model: env::var("VISION_MODEL").unwrap_or_else(|_| "vision".to_string()),
            social_model: env::var("SOCIAL_MODEL").unwrap_or_else(|_| "social".to_string()),
            strategy_models,
            webhook_url: env::var("PICKS_WEBHOOK_URL").unwrap_or_default(),
            pipeline,
            tracker,
            learner,
            schedule: ScheduleConfig {
                pipeline_at: time_or("PIPELINE_AT", NaiveTime::from_hms_opt(8, 30, 0).unwrap_or_default())?,
                learn_at: time_or("LEARN_AT", NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default())?,
                track_interval: Duration::from_secs(var_or("TRACK_INTERVAL_SECS", 3_600u64)?),
                tick: Duration::from_secs(var_or("SCHEDULER_TICK_SECS", 60u64)?),
                metrics_log_interval_ticks: var_or("METRICS_LOG_INTERVAL_TICKS", 60u64)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let rules = &self.pipeline.arbitrator.rules;
        anyhow::ensure!(self.pipeline.shortlist_size > 0, "SHORTLIST_SIZE must be positive");
        anyhow::ensure!(
            rules.min_picks <= rules.max_picks,
            "MIN_PICKS ({}) exceeds MAX_PICKS ({})",
            rules.min_picks,
            rules.max_picks
        );
        anyhow::ensure!(
            rules.max_picks <= self.pipeline.shortlist_size,
            "MAX_PICKS ({}) exceeds SHORTLIST_SIZE ({})",
            rules.max_picks,
            self.pipeline.shortlist_size
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.learner.learning_rate),
            "LEARNING_RATE must be within [0, 1]"
        );
        anyhow::ensure!(self.schedule.tick >= Duration::from_secs(1), "SCHEDULER_TICK_SECS must be at least 1");
        Ok(())
    }
}
