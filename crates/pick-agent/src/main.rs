use std::sync::Arc;
use std::time::Instant;

use agent_client::{HttpArbitration, HttpPrescreen, HttpSocial, HttpVision};
use anyhow::{Context, Result};
use arbitrator::StrategyRegistry;
use chrono::{NaiveDate, Utc};
use chrono_tz::US::Eastern;
use learner::{LearnerAgent, STATE_LAST_LEARNING_DAY};
use outcome_tracker::{OutcomeTracker, TrackerReport};
use pick_core::MarketCondition;
use pick_store::{PickStore, FLAG_PIPELINE_ENABLED};
use pipeline_orchestrator::{DailyPipeline, PipelineServices, STATE_LAST_PIPELINE_DAY};
use tokio::signal::unix::SignalKind;
use tokio::time;

mod config;
mod metrics;
mod publisher;
mod schedule;

use config::AgentConfig;
use metrics::AgentMetrics;
use publisher::WebhookPublisher;

const STATE_AGENT_METRICS: &str = "agent_metrics";

const USAGE: &str = "usage: pick-agent [serve | run-day [YYYY-MM-DD] | track [YYYY-MM-DD] | learn [YYYY-MM-DD] \
                     | set-enabled true|false | record-condition YYYY-MM-DD VIX PREMARKET_PCT | status [YYYY-MM-DD]]";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    let config = AgentConfig::from_env()?;
    let store = Arc::new(
        PickStore::connect(&config.database_url, config.db_max_connections)
            .await
            .with_context(|| format!("Failed to open store at {}", config.database_url))?,
    );
    sqlx::query("SELECT 1")
        .execute(store.pool())
        .await
        .map_err(|e| anyhow::anyhow!("Database connectivity check failed: {}", e))?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("serve");
    let date_arg = || -> Result<NaiveDate> {
        match args.get(1) {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("bad date '{}'", raw)),
            None => Ok(Utc::now().with_timezone(&Eastern).date_naive()),
        }
    };

    match command {
        "serve" => {
            check_services(&config).await;
            serve(config, store).await?
        }
        "run-day" => {
            check_services(&config).await;
            let pipeline = build_pipeline(&config, &store)?;
            let report = pipeline.run_day(date_arg()?).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "track" => {
            let tracker = OutcomeTracker::new(store.clone(), store.clone(), config.tracker.clone());
            match track(&store, &tracker, date_arg()?).await? {
                Some(report) => println!("{:?}", report),
                None => println!("pipeline disabled, tracking skipped"),
            }
        }
        "learn" => {
            let learner = LearnerAgent::new(Arc::clone(&store), config.learner.clone());
            let report = learner.run(date_arg()?).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "set-enabled" => {
            let enabled: bool = args
                .get(1)
                .context(USAGE)?
                .parse()
                .context("set-enabled expects true or false")?;
            store.set_flag(FLAG_PIPELINE_ENABLED, enabled).await?;
            tracing::info!("Pipeline {}", if enabled { "enabled" } else { "disabled" });
        }
        "record-condition" => {
            let condition = MarketCondition {
                trade_date: date_arg()?,
                volatility_index: args.get(2).context(USAGE)?.parse().context("VIX must be a number")?,
                index_premarket_change_pct: args
                    .get(3)
                    .context(USAGE)?
                    .parse()
                    .context("PREMARKET_PCT must be a number")?,
                observed_at: Utc::now(),
            };
            store.record_market_condition(&condition).await?;
            tracing::info!(
                "Recorded market condition for {}: VIX {:.2}, pre-market {:+.2}%",
                condition.trade_date,
                condition.volatility_index,
                condition.index_premarket_change_pct
            );
        }
        "status" => {
            let day = date_arg()?;
            match store.load_run(day).await? {
                Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
                None => println!("no run recorded for {}", day),
            }
        }
        other => anyhow::bail!("unknown command '{}'\n{}", other, USAGE),
    }
    Ok(())
}

/// Log the reachability of every scoring service. A down service is not
/// fatal at startup; the stage that needs it fails on its own.
async fn check_services(config: &AgentConfig) {
    for (service, healthy) in config.services.health().await {
        if healthy {
            tracing::info!("{} service is healthy", service);
        } else {
            tracing::warn!("{} service is not reachable", service);
        }
    }
}

fn build_pipeline(config: &AgentConfig, store: &Arc<PickStore>) -> Result<DailyPipeline> {
    let endpoints = &config.services;
    let mut arbitrators = StrategyRegistry::new();
    for (id, model) in &config.strategy_models {
        arbitrators.register(id.clone(), Arc::new(HttpArbitration::new(&endpoints.arbitrator, model.clone())?));
    }
    tracing::info!("Arbitration strategies: {:?}", arbitrators.ids());

    let services = PipelineServices {
        prescreen: Arc::new(HttpPrescreen::new(&endpoints.prescreen, config.prescreen_model.clone())?),
        vision: Arc::new(HttpVision::new(&endpoints.vision, config.vision_model.clone())?),
        social: Arc::new(HttpSocial::new(&endpoints.social, config.social_model.clone())?),
        arbitrators,
        publisher: Arc::new(WebhookPublisher::new(config.webhook_url.clone())),
    };
    Ok(DailyPipeline::new(Arc::clone(store), services, config.pipeline.clone()))
}

/// One tracking pass; `None` when the operational flag is off.
async fn track(store: &PickStore, tracker: &OutcomeTracker, as_of: NaiveDate) -> Result<Option<TrackerReport>> {
    if !store.pipeline_enabled().await? {
        tracing::info!("Pipeline disabled, skipping outcome tracking");
        return Ok(None);
    }
    let report = tracker.update(as_of).await?;
    tracing::info!(
        "Tracking pass as of {}: {} open, {} updated, {} closed, {} failed",
        as_of,
        report.examined,
        report.updated,
        report.closed,
        report.failed
    );
    Ok(Some(report))
}

async fn load_day(store: &PickStore, key: &str) -> Option<NaiveDate> {
    match store.load_state(key).await {
        Ok(Some(raw)) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok(),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Failed to load {}: {}", key, e);
            None
        }
    }
}

/// Scheduler loop: daily pipeline on weekday mornings, tracking on an
/// interval, learning every weekday evening. Exits on SIGINT or SIGTERM.
async fn serve(config: AgentConfig, store: Arc<PickStore>) -> Result<()> {
    let pipeline = build_pipeline(&config, &store)?;
    let tracker = OutcomeTracker::new(store.clone(), store.clone(), config.tracker.clone());
    let learner = LearnerAgent::new(Arc::clone(&store), config.learner.clone());
    let plan = &config.schedule;

    let mut metrics = match store.load_state(STATE_AGENT_METRICS).await {
        Ok(Some(saved)) => AgentMetrics::restore_from_json(&saved),
        _ => AgentMetrics::default(),
    };
    let mut last_pipeline_day = load_day(&store, STATE_LAST_PIPELINE_DAY).await;
    let mut last_learning_day = load_day(&store, STATE_LAST_LEARNING_DAY).await;
    let mut last_tracked: Option<Instant> = None;

    tracing::info!(
        "Scheduler started: pipeline at {} ET, learning at {} ET, tracking every {}s (last run {:?}, last learning {:?})",
        plan.pipeline_at,
        plan.learn_at,
        plan.track_interval.as_secs(),
        last_pipeline_day,
        last_learning_day
    );

    let mut interval = time::interval(plan.tick);
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now().with_timezone(&Eastern);

                if last_tracked.map_or(true, |t| t.elapsed() >= plan.track_interval) {
                    last_tracked = Some(Instant::now());
                    match track(&store, &tracker, now.date_naive()).await {
                        Ok(Some(report)) => metrics.record_tracking(&report),
                        Ok(None) => {}
                        Err(e) => tracing::error!("Tracking pass failed: {:#}", e),
                    }
                }

                if let Some(day) = schedule::pipeline_due(now, plan.pipeline_at, last_pipeline_day) {
                    // one scheduled attempt per day; a failed day is retried with `run-day`
                    last_pipeline_day = Some(day);
                    match pipeline.run_day(day).await {
                        Ok(report) => metrics.record_run(&report),
                        Err(e) => tracing::error!("Run for {} could not be recorded: {}", day, e),
                    }
                }

                if let Some(day) = schedule::learning_due(now, plan.learn_at, last_learning_day) {
                    last_learning_day = Some(day);
                    match learner.run(day).await {
                        Ok(report) => metrics.record_learning(&report),
                        Err(e) => {
                            tracing::error!("Learning for {} failed: {}", day, e);
                            metrics.record_learning_error();
                        }
                    }
                }

                metrics.tick(plan.metrics_log_interval_ticks);
                if let Err(e) = store.save_state(STATE_AGENT_METRICS, &metrics.to_json()).await {
                    tracing::debug!("Failed to persist metrics: {}", e);
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                store.save_state(STATE_AGENT_METRICS, &metrics.to_json()).await.ok();
                metrics.log_metrics();
                break;
            }
        }
    }

    tracing::info!("Pick agent shut down.");
    Ok(())
}
