use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use agent_client::{
    AgentError, AgentResult, ArbitrationRequest, ArbitrationResponse, ArbitrationService, PrescreenEntry,
    PrescreenRequest, PrescreenResponse, ProposedPick, SocialRequest, VisionRequest,
};
use arbitrator::Rotation;
use async_trait::async_trait;
use chart_renderer::ChartSpec;
use pick_core::{
    Bar, BarDelta, Direction, Fundamentals, MarketCondition, PriceTargets, SocialSignal, SymbolInfo, VisionFlags,
};

use super::*;

fn trade_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 4).unwrap()
}

/// Shortlists the alphabetically first `count` symbols, alternating bias.
struct FakePrescreen {
    count: AtomicUsize,
    calls: AtomicUsize,
}

impl FakePrescreen {
    fn returning(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrescreenService for FakePrescreen {
    async fn prescreen(&self, request: &PrescreenRequest) -> AgentResult<PrescreenResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = self.count.load(Ordering::SeqCst);
        let mut symbols: Vec<&str> = request.candidates.iter().map(|c| c.symbol.as_str()).collect();
        symbols.sort_unstable();
        let entries = symbols
            .into_iter()
            .take(n)
            .enumerate()
            .map(|(i, symbol)| PrescreenEntry {
                symbol: symbol.to_string(),
                score: 1.0 - i as f64 / 100.0,
                reasoning: "liquid, trending".to_string(),
                bias: if i % 2 == 0 { "long" } else { "short" }.to_string(),
            })
            .collect();
        Ok(PrescreenResponse { entries })
    }

    fn model_name(&self) -> &str {
        "fake-prescreen"
    }
}

/// Current and peak number of calls inside a fake service.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct FakeVision {
    slow_symbol: Option<String>,
    latency: Option<StdDuration>,
    in_flight: InFlight,
    calls: AtomicUsize,
}

#[async_trait]
impl VisionService for FakeVision {
    async fn detect_patterns(&self, request: &VisionRequest) -> AgentResult<VisionFlags> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.enter();
        if self.slow_symbol.as_deref() == Some(request.symbol.as_str()) {
            tokio::time::sleep(StdDuration::from_secs(5)).await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.leave();
        Ok(VisionFlags {
            breakout: true,
            ..Default::default()
        })
    }

    fn model_name(&self) -> &str {
        "fake-vision"
    }
}

#[derive(Default)]
struct FakeSocial {
    failing_symbol: Option<String>,
    latency: Option<StdDuration>,
    in_flight: InFlight,
    calls: AtomicUsize,
}

#[async_trait]
impl SocialService for FakeSocial {
    async fn score(&self, request: &SocialRequest) -> AgentResult<SocialSignal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_symbol.as_deref() == Some(request.symbol.as_str()) {
            return Err(AgentError::RateLimited("429".into()));
        }
        self.in_flight.enter();
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.leave();
        Ok(SocialSignal {
            sentiment: 0.4,
            mentions: 120,
            ..Default::default()
        })
    }

    fn model_name(&self) -> &str {
        "fake-social"
    }
}

/// Proposes the first eight candidates in their prescreen direction.
#[derive(Default)]
struct FakeStrategy {
    calls: AtomicUsize,
}

#[async_trait]
impl ArbitrationService for FakeStrategy {
    async fn arbitrate(&self, request: &ArbitrationRequest) -> AgentResult<ArbitrationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let proposals = request
            .candidates
            .iter()
            .take(8)
            .map(|c| {
                let direction = Direction::parse(&c.bias).unwrap_or(Direction::Long);
                let entry = c.features.last_close;
                ProposedPick {
                    symbol: c.symbol.clone(),
                    direction: direction.as_str().to_string(),
                    entry_price: entry,
                    targets: PriceTargets::from_percentages(direction, entry, [3.0, 6.0, 10.0]),
                    stop: entry * (1.0 - direction.sign() * 0.04),
                    conviction: 0.8,
                    rationale: format!("{} {}", c.symbol, direction),
                }
            })
            .collect();
        Ok(ArbitrationResponse { proposals })
    }

    fn model_name(&self) -> &str {
        "fake-arbitrator"
    }
}

#[derive(Default)]
struct RecordingPublisher {
    batches: Mutex<Vec<PickBatch>>,
    statuses: Mutex<Vec<RunStatus>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, batch: &PickBatch) -> PipelineResult<()> {
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn publish_status(&self, _trade_date: NaiveDate, status: &RunStatus) -> PipelineResult<()> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }
}

struct Harness {
    store: Arc<PickStore>,
    prescreen: Arc<FakePrescreen>,
    vision: Arc<FakeVision>,
    social: Arc<FakeSocial>,
    strategy: Arc<FakeStrategy>,
    publisher: Arc<RecordingPublisher>,
}

impl Harness {
    async fn new(symbols: usize, volatility_index: Option<f64>) -> Self {
        let store = PickStore::connect("sqlite::memory:", 1).await.unwrap();
        seed_universe(&store, symbols).await;
        if let Some(vix) = volatility_index {
            store
                .record_market_condition(&MarketCondition {
                    trade_date: trade_date(),
                    volatility_index: vix,
                    index_premarket_change_pct: 0.2,
                    observed_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        Self {
            store: Arc::new(store),
            prescreen: Arc::new(FakePrescreen::returning(75)),
            vision: Arc::new(FakeVision::default()),
            social: Arc::new(FakeSocial::default()),
            strategy: Arc::new(FakeStrategy::default()),
            publisher: Arc::new(RecordingPublisher::default()),
        }
    }

    fn pipeline(&self, config: PipelineConfig) -> DailyPipeline {
        let services = PipelineServices {
            prescreen: self.prescreen.clone(),
            vision: self.vision.clone(),
            social: self.social.clone(),
            arbitrators: StrategyRegistry::new().with("fake", self.strategy.clone()),
            publisher: self.publisher.clone(),
        };
        DailyPipeline::new(Arc::clone(&self.store), services, config)
    }

    fn arbitrator_calls(&self) -> usize {
        self.strategy.calls.load(Ordering::SeqCst)
    }
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig {
        retry_backoff: StdDuration::from_millis(1),
        vision_timeout: StdDuration::from_millis(200),
        chart: ChartSpec {
            width: 160,
            height: 120,
            ..Default::default()
        },
        rotation: Rotation::new(["fake"; 7]),
        ..Default::default()
    };
    config.arbitrator.rules.confidence_floor = 0.0;
    config
}

/// `n` liquid symbols with 30 daily bars ending the day before the trade date.
async fn seed_universe(store: &PickStore, n: usize) {
    let last = trade_date() - Duration::days(1);
    let mut deltas = Vec::with_capacity(n * 30);
    for i in 0..n {
        let symbol = format!("S{:04}", i);
        store
            .upsert_symbol(
                &SymbolInfo {
                    symbol: symbol.clone(),
                    exchange: "NYSE".to_string(),
                    sector: Some(if i % 2 == 0 { "Tech" } else { "Energy" }.to_string()),
                },
                &Fundamentals {
                    market_cap: Some(5e9),
                    beta: Some(1.1),
                    pe_ratio: Some(18.0),
                    as_of: None,
                },
            )
            .await
            .unwrap();
        let base = 20.0 + (i % 50) as f64;
        let drift = if i % 3 == 0 { 0.004 } else { -0.002 };
        for d in 0..30 {
            let close = base * (1.0 + drift * d as f64);
            deltas.push(BarDelta {
                symbol: symbol.clone(),
                bar: Bar {
                    date: last - Duration::days(29 - d),
                    open: close,
                    high: close * 1.015,
                    low: close * 0.985,
                    close,
                    volume: 1_000_000.0 + (i * 1_000) as f64,
                },
            });
        }
    }
    store.upsert_bars(&deltas).await.unwrap();
}

#[tokio::test]
async fn normal_day_shortlists_enriches_and_publishes() {
    let h = Harness::new(1000, Some(18.0)).await;
    let report = h.pipeline(test_config()).run_day(trade_date()).await.unwrap();

    let RunStatus::Published { picks } = report.status else {
        panic!("expected published, got {:?}", report.status);
    };
    assert!((3..=6).contains(&picks));
    assert_eq!(report.shortlist_count, 75);
    assert_eq!(report.metrics.counter("active"), 1000);

    let shortlist = h.store.load_shortlist(trade_date()).await.unwrap();
    assert_eq!(shortlist.len(), 75);
    assert!(shortlist.iter().all(|c| c.vision.available().is_some()));
    assert!(shortlist.iter().all(|c| c.social.available().is_some()));
    assert_eq!(h.vision.calls.load(Ordering::SeqCst), 75);
    assert_eq!(h.social.calls.load(Ordering::SeqCst), 75);

    let batches = h.publisher.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 1);
    let directions: Vec<Direction> = batches[0].picks.iter().map(|p| p.direction).collect();
    assert!(directions.contains(&Direction::Long));
    assert!(directions.contains(&Direction::Short));

    let tiers = h.store.tier_counts(trade_date()).await.unwrap();
    assert_eq!(tiers[&Tier::Active], 1000);
    assert_eq!(tiers[&Tier::Shortlist], 75);
    assert_eq!(tiers[&Tier::Pick], picks);

    // every shortlisted symbol is tracked, picks against their own levels
    let outcomes = h.store.load_outcomes(trade_date()).await.unwrap();
    assert_eq!(outcomes.len(), 75);
    assert_eq!(outcomes.iter().filter(|o| o.was_pick).count(), picks);

    let run = h.store.load_run(trade_date()).await.unwrap().unwrap();
    assert_eq!(run.status, Some(RunStatus::Published { picks }));
    assert_eq!(run.weights_version, Some(0));
}

#[tokio::test]
async fn completed_day_is_not_rerun() {
    let h = Harness::new(100, Some(18.0)).await;
    let pipeline = h.pipeline(test_config());
    let first = pipeline.run_day(trade_date()).await.unwrap();
    let second = pipeline.run_day(trade_date()).await.unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(h.prescreen.calls(), 1);
    assert_eq!(h.arbitrator_calls(), 1);
    assert_eq!(h.publisher.batches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn high_volatility_halts_before_any_agent_call() {
    let h = Harness::new(200, Some(40.0)).await;
    let report = h.pipeline(test_config()).run_day(trade_date()).await.unwrap();

    assert!(matches!(report.status, RunStatus::Halted { .. }));
    assert_eq!(report.pick_count, 0);
    assert_eq!(h.prescreen.calls(), 0);
    assert_eq!(h.vision.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.arbitrator_calls(), 0);
    assert!(h.store.load_picks(trade_date()).await.unwrap().is_empty());
    assert!(h.publisher.batches.lock().unwrap().is_empty());

    let statuses = h.publisher.statuses.lock().unwrap().clone();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].as_str(), "halted");
}

#[tokio::test]
async fn missing_market_condition_fails_closed() {
    let h = Harness::new(100, None).await;
    let report = h.pipeline(test_config()).run_day(trade_date()).await.unwrap();

    match report.status {
        RunStatus::Failed { stage, kind, .. } => {
            assert_eq!(stage, Stage::KillSwitch);
            assert_eq!(kind, "data_freshness");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.prescreen.calls(), 0);
}

#[tokio::test]
async fn short_prescreen_fails_day_without_committing() {
    let h = Harness::new(200, Some(18.0)).await;
    h.prescreen.count.store(60, Ordering::SeqCst);
    let pipeline = h.pipeline(test_config());
    let report = pipeline.run_day(trade_date()).await.unwrap();

    match &report.status {
        RunStatus::Failed { stage, kind, .. } => {
            assert_eq!(*stage, Stage::Prescreen);
            assert_eq!(kind, "cardinality");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.prescreen.calls(), 2);
    assert!(h.store.load_shortlist(trade_date()).await.unwrap().is_empty());
    assert_eq!(h.arbitrator_calls(), 0);
    assert_eq!(h.publisher.statuses.lock().unwrap()[0].as_str(), "failed");

    // a failed day may be retried once the service behaves
    h.prescreen.count.store(75, Ordering::SeqCst);
    let retry = pipeline.run_day(trade_date()).await.unwrap();
    assert!(matches!(retry.status, RunStatus::Published { .. }));
    assert_eq!(h.prescreen.calls(), 3);
}

#[tokio::test]
async fn undersized_active_tier_is_a_failure() {
    let h = Harness::new(50, Some(18.0)).await;
    let report = h.pipeline(test_config()).run_day(trade_date()).await.unwrap();

    match report.status {
        RunStatus::Failed { stage, message, .. } => {
            assert_eq!(stage, Stage::Prescreen);
            assert!(message.contains("50"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.prescreen.calls(), 0);
}

#[tokio::test]
async fn slow_or_failing_item_does_not_abort_siblings() {
    let mut h = Harness::new(100, Some(18.0)).await;
    let shortlisted = "S0000".to_string();
    h.vision = Arc::new(FakeVision {
        slow_symbol: Some(shortlisted.clone()),
        ..Default::default()
    });
    h.social = Arc::new(FakeSocial {
        failing_symbol: Some(shortlisted.clone()),
        ..Default::default()
    });

    let report = h.pipeline(test_config()).run_day(trade_date()).await.unwrap();
    assert!(matches!(report.status, RunStatus::Published { .. }));

    let shortlist = h.store.load_shortlist(trade_date()).await.unwrap();
    assert_eq!(shortlist.len(), 75);
    let (affected, siblings): (Vec<_>, Vec<_>) = shortlist.iter().partition(|c| c.symbol == shortlisted);
    assert_eq!(affected.len(), 1, "fake prescreen should have shortlisted {}", shortlisted);
    assert!(affected[0].vision.is_unavailable());
    assert!(affected[0].social.is_unavailable());
    assert_eq!(siblings.len(), 74);
    assert!(siblings.iter().all(|c| c.vision.available().is_some() && c.social.available().is_some()));
    assert_eq!(report.metrics.counter("vision_unavailable"), 1);
    assert_eq!(report.metrics.counter("social_unavailable"), 1);
}

#[tokio::test]
async fn enrichment_respects_in_flight_limit() {
    let mut h = Harness::new(100, Some(18.0)).await;
    h.vision = Arc::new(FakeVision {
        latency: Some(StdDuration::from_millis(20)),
        ..Default::default()
    });
    h.social = Arc::new(FakeSocial {
        latency: Some(StdDuration::from_millis(20)),
        ..Default::default()
    });
    let mut config = test_config();
    config.enrichment_concurrency = 4;

    let report = h.pipeline(config).run_day(trade_date()).await.unwrap();
    assert!(matches!(report.status, RunStatus::Published { .. }));

    assert_eq!(h.vision.calls.load(Ordering::SeqCst), 75);
    assert_eq!(h.social.calls.load(Ordering::SeqCst), 75);
    for peak in [h.vision.in_flight.peak(), h.social.in_flight.peak()] {
        assert!(peak <= 4, "{} calls in flight with a limit of 4", peak);
        assert!(peak > 1, "calls never overlapped");
    }
    assert_eq!(report.metrics.counter("vision_unavailable"), 0);
    assert_eq!(report.metrics.counter("social_unavailable"), 0);
}

#[tokio::test]
async fn failed_arbitration_still_tracks_the_shortlist() {
    let h = Harness::new(100, Some(18.0)).await;
    let mut config = test_config();
    config.rotation = Rotation::new(["unregistered"; 7]);
    let report = h.pipeline(config).run_day(trade_date()).await.unwrap();

    match &report.status {
        RunStatus::Failed { stage, kind, .. } => {
            assert_eq!(*stage, Stage::Arbitration);
            assert_eq!(kind, "service");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(h.store.load_picks(trade_date()).await.unwrap().is_empty());

    let shortlist = h.store.load_shortlist(trade_date()).await.unwrap();
    let outcomes = h.store.load_outcomes(trade_date()).await.unwrap();
    assert_eq!(shortlist.len(), 75);
    assert_eq!(outcomes.len(), shortlist.len());
    assert!(outcomes.iter().all(|o| !o.was_pick && !o.is_closed()));
    let leans: BTreeMap<&str, Direction> = shortlist.iter().map(|c| (c.symbol.as_str(), c.bias)).collect();
    for outcome in &outcomes {
        assert_eq!(leans.get(outcome.symbol.as_str()), Some(&outcome.direction));
    }
}

#[tokio::test]
async fn empty_selection_is_distinct_from_halt_and_failure() {
    let h = Harness::new(100, Some(18.0)).await;
    let mut config = test_config();
    config.arbitrator.rules.confidence_floor = 2.0;
    let report = h.pipeline(config).run_day(trade_date()).await.unwrap();

    assert_eq!(report.status, RunStatus::NoQualifyingPicks);
    assert_eq!(h.arbitrator_calls(), 1);
    assert!(h.publisher.batches.lock().unwrap().is_empty());
    assert_eq!(h.publisher.statuses.lock().unwrap()[0].as_str(), "no_qualifying_picks");

    // non-picks are still tracked against their prescreen lean
    let outcomes = h.store.load_outcomes(trade_date()).await.unwrap();
    assert_eq!(outcomes.len(), 75);
    assert!(outcomes.iter().all(|o| !o.was_pick));
}

#[tokio::test]
async fn disabled_pipeline_has_no_side_effects() {
    let h = Harness::new(100, Some(18.0)).await;
    h.store.set_flag(pick_store::FLAG_PIPELINE_ENABLED, false).await.unwrap();
    let report = h.pipeline(test_config()).run_day(trade_date()).await.unwrap();

    assert_eq!(report.status, RunStatus::Skipped);
    assert!(h.store.load_run(trade_date()).await.unwrap().is_none());
    assert!(h.publisher.statuses.lock().unwrap().is_empty());
    assert_eq!(h.prescreen.calls(), 0);
}
