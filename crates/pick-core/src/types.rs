use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Daily OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest fundamentals for a symbol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub market_cap: Option<f64>,
    pub beta: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub as_of: Option<NaiveDate>,
}

/// Static symbol metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub exchange: String,
    pub sector: Option<String>,
}

/// Stored window for one symbol: time-ordered bars plus latest fundamentals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolData {
    pub info: SymbolInfo,
    pub bars: Vec<Bar>,
    pub fundamentals: Fundamentals,
}

impl SymbolData {
    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }
}

/// One daily upsert keyed by (symbol, date)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarDelta {
    pub symbol: String,
    pub bar: Bar,
}

/// Funnel tier. Ordered: a symbol only ever moves to a higher tier within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    All,
    Active,
    Shortlist,
    Pick,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::All => "ALL",
            Tier::Active => "ACTIVE",
            Tier::Shortlist => "SHORTLIST",
            Tier::Pick => "PICK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALL" => Some(Tier::All),
            "ACTIVE" => Some(Tier::Active),
            "SHORTLIST" => Some(Tier::Shortlist),
            "PICK" => Some(Tier::Pick),
            _ => None,
        }
    }

    pub fn rank(&self) -> i64 {
        match self {
            Tier::All => 0,
            Tier::Active => 1,
            Tier::Shortlist => 2,
            Tier::Pick => 3,
        }
    }

    /// The tier a symbol must currently hold before it may enter `self`.
    pub fn previous(&self) -> Option<Tier> {
        match self {
            Tier::All => None,
            Tier::Active => Some(Tier::All),
            Tier::Shortlist => Some(Tier::Active),
            Tier::Pick => Some(Tier::Shortlist),
        }
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "long" | "buy" | "bullish" => Some(Direction::Long),
            "short" | "sell" | "bearish" => Some(Direction::Short),
            _ => None,
        }
    }

    /// Signed percentage move from `entry` to `price` in this direction.
    pub fn move_pct(&self, entry: f64, price: f64) -> f64 {
        if entry <= 0.0 {
            return 0.0;
        }
        self.sign() * (price - entry) / entry * 100.0
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature snapshot captured when a symbol is considered for the shortlist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub last_close: f64,
    pub avg_volume_20: f64,
    pub dollar_volume: f64,
    pub rsi_14: Option<f64>,
    /// ATR(14) as a percentage of the last close
    pub atr_pct: Option<f64>,
    /// Percent distance of the last close from SMA(20)
    pub sma20_gap_pct: Option<f64>,
    pub momentum_20d_pct: Option<f64>,
    /// Annualised stdev of daily returns over 20 sessions, in percent
    pub volatility_20d_pct: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub beta: Option<f64>,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
}

/// Keys of the numeric features a FeatureWeights map may refer to.
pub const FEATURE_KEYS: &[&str] = &[
    "dollar_volume",
    "rsi_14",
    "atr_pct",
    "sma20_gap_pct",
    "momentum_20d_pct",
    "volatility_20d_pct",
    "beta",
    "market_cap",
    "pe_ratio",
];

impl FeatureSnapshot {
    /// Weightable features; missing values are left out rather than zero-filled.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        map.insert("dollar_volume".to_string(), self.dollar_volume);
        let optional = [
            ("rsi_14", self.rsi_14),
            ("atr_pct", self.atr_pct),
            ("sma20_gap_pct", self.sma20_gap_pct),
            ("momentum_20d_pct", self.momentum_20d_pct),
            ("volatility_20d_pct", self.volatility_20d_pct),
            ("beta", self.beta),
            ("market_cap", self.market_cap),
            ("pe_ratio", self.pe_ratio),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                if v.is_finite() {
                    map.insert(key.to_string(), v);
                }
            }
        }
        map
    }

    /// Technical lean in [-1, 1] from trend, momentum and RSI.
    pub fn technical_bias(&self) -> f64 {
        let mut votes = Vec::new();
        if let Some(gap) = self.sma20_gap_pct {
            votes.push((gap / 5.0).clamp(-1.0, 1.0));
        }
        if let Some(mom) = self.momentum_20d_pct {
            votes.push((mom / 10.0).clamp(-1.0, 1.0));
        }
        if let Some(rsi) = self.rsi_14 {
            votes.push(((rsi - 50.0) / 25.0).clamp(-1.0, 1.0));
        }
        if votes.is_empty() {
            return 0.0;
        }
        votes.iter().sum::<f64>() / votes.len() as f64
    }
}

/// Pattern flags returned by the vision agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionFlags {
    pub breakout: bool,
    pub bull_flag: bool,
    pub double_bottom: bool,
    pub support_bounce: bool,
    pub breakdown: bool,
    pub bear_flag: bool,
    pub double_top: bool,
    pub head_and_shoulders: bool,
}

impl VisionFlags {
    pub fn bullish_count(&self) -> usize {
        [self.breakout, self.bull_flag, self.double_bottom, self.support_bounce]
            .iter()
            .filter(|f| **f)
            .count()
    }

    pub fn bearish_count(&self) -> usize {
        [self.breakdown, self.bear_flag, self.double_top, self.head_and_shoulders]
            .iter()
            .filter(|f| **f)
            .count()
    }

    /// Pattern lean in [-1, 1]; 0 when no pattern fired.
    pub fn bias(&self) -> f64 {
        let bull = self.bullish_count() as f64;
        let bear = self.bearish_count() as f64;
        if bull + bear == 0.0 {
            return 0.0;
        }
        (bull - bear) / (bull + bear)
    }
}

/// Sentiment score and context returned by the social agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialSignal {
    /// Bounded to [-1, 1]
    pub sentiment: f64,
    #[serde(default)]
    pub mentions: i64,
    #[serde(default)]
    pub headlines: Vec<String>,
    /// Known near-term events (earnings, FDA dates, ...)
    #[serde(default)]
    pub events: Vec<String>,
}

/// Per-agent enrichment slot on a shortlist row.
///
/// `Unavailable` is not a neutral reading: consumers must leave it out of
/// any consensus instead of treating it as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Enrichment<T> {
    Pending,
    Available(T),
    Unavailable(String),
}

impl<T> Enrichment<T> {
    pub fn available(&self) -> Option<&T> {
        match self {
            Enrichment::Available(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Enrichment::Unavailable(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Enrichment::Pending)
    }
}

/// One row per symbol per day, created by the prescreen stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlistCandidate {
    pub trade_date: NaiveDate,
    pub symbol: String,
    pub sector: Option<String>,
    pub rank: u32,
    pub prescreen_score: f64,
    pub prescreen_reasoning: String,
    /// The prescreen's leaning direction; the "likely outcome" for non-picks
    pub bias: Direction,
    pub features: FeatureSnapshot,
    pub vision: Enrichment<VisionFlags>,
    pub social: Enrichment<SocialSignal>,
    pub selected_as_pick: bool,
}

/// Low/medium/high price targets. For shorts the targets sit below entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTargets {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl PriceTargets {
    /// Default tiers as percentage moves from entry.
    pub fn from_percentages(direction: Direction, entry: f64, pcts: [f64; 3]) -> Self {
        let at = |p: f64| entry * (1.0 + direction.sign() * p / 100.0);
        Self {
            low: at(pcts[0]),
            medium: at(pcts[1]),
            high: at(pcts[2]),
        }
    }

    /// Targets must move progressively further from entry in the trade direction,
    /// and the stop must sit on the other side of entry.
    pub fn is_consistent(&self, direction: Direction, entry: f64, stop: f64) -> bool {
        let values = [stop, entry, self.low, self.medium, self.high];
        if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return false;
        }
        match direction {
            Direction::Long => stop < entry && entry < self.low && self.low < self.medium && self.medium < self.high,
            Direction::Short => stop > entry && entry > self.low && self.low > self.medium && self.medium > self.high,
        }
    }
}

/// Final directional recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    pub trade_date: NaiveDate,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub confidence: f64,
    pub targets: PriceTargets,
    /// Support for longs, resistance for shorts
    pub stop: f64,
    pub rationale: String,
    pub strategy: String,
    pub model: String,
}

/// Batch handed to the publisher, keyed by trade day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickBatch {
    pub trade_date: NaiveDate,
    pub strategy: String,
    pub picks: Vec<Pick>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingStatus {
    Tracking,
    Closed,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Tracking => "TRACKING",
            TrackingStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRACKING" => Some(TrackingStatus::Tracking),
            "CLOSED" => Some(TrackingStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TargetHit,
    WindowExpired,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TargetHit => "target_hit",
            CloseReason::WindowExpired => "window_expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "target_hit" => Some(CloseReason::TargetHit),
            "window_expired" => Some(CloseReason::WindowExpired),
            _ => None,
        }
    }
}

/// Realised outcome summary for one shortlisted symbol (pick or not).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickOutcome {
    pub trade_date: NaiveDate,
    pub symbol: String,
    pub was_pick: bool,
    pub direction: Direction,
    pub entry_price: f64,
    pub targets: PriceTargets,
    pub stop: f64,
    pub status: TrackingStatus,
    pub close_reason: Option<CloseReason>,
    /// Best favourable excursion, percent
    pub max_gain_pct: f64,
    /// Worst adverse excursion, percent (<= 0)
    pub max_loss_pct: f64,
    pub days_to_peak: Option<u32>,
    pub hit_low: bool,
    pub hit_medium: bool,
    pub hit_high: bool,
    pub stop_hit: bool,
    /// Directional return at the last processed close, percent
    pub last_return_pct: f64,
    pub days_tracked: u32,
    pub last_bar_date: Option<NaiveDate>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PickOutcome {
    pub fn new(
        trade_date: NaiveDate,
        symbol: String,
        was_pick: bool,
        direction: Direction,
        entry_price: f64,
        targets: PriceTargets,
        stop: f64,
    ) -> Self {
        Self {
            trade_date,
            symbol,
            was_pick,
            direction,
            entry_price,
            targets,
            stop,
            status: TrackingStatus::Tracking,
            close_reason: None,
            max_gain_pct: 0.0,
            max_loss_pct: 0.0,
            days_to_peak: None,
            hit_low: false,
            hit_medium: false,
            hit_high: false,
            stop_hit: false,
            last_return_pct: 0.0,
            days_tracked: 0,
            last_bar_date: None,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == TrackingStatus::Closed
    }
}

/// Factor breakdown for one arbitrated candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionFactors {
    pub symbol: String,
    pub direction: Direction,
    pub agreement: f64,
    pub trust: f64,
    pub volatility_adjustment: f64,
    /// None when the social signal was unavailable
    pub alignment: Option<f64>,
    /// None when too few similar setups exist
    pub history: Option<f64>,
    pub model_conviction: f64,
    pub confidence: f64,
    pub selected: bool,
}

/// Audit record of one arbitration event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitratorDecision {
    pub trade_date: NaiveDate,
    pub strategy: String,
    pub model: String,
    pub weights_version: i64,
    pub considered: Vec<String>,
    pub factors: Vec<DecisionFactors>,
    pub final_confidence: f64,
    pub outcome: String,
    pub created_at: DateTime<Utc>,
}

/// Daily regime snapshot consumed by the kill switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketCondition {
    pub trade_date: NaiveDate,
    pub volatility_index: f64,
    pub index_premarket_change_pct: f64,
    pub observed_at: DateTime<Utc>,
}

/// Volatility bucket of a setup, from ATR% of price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityBucket {
    Low,
    Mid,
    High,
}

impl VolatilityBucket {
    pub fn from_atr_pct(atr_pct: Option<f64>) -> Self {
        match atr_pct {
            Some(a) if a >= 5.0 => VolatilityBucket::High,
            Some(a) if a >= 2.5 => VolatilityBucket::Mid,
            _ => VolatilityBucket::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentBucket {
    Negative,
    Neutral,
    Positive,
    Unknown,
}

impl SentimentBucket {
    pub fn from_social(social: &Enrichment<SocialSignal>) -> Self {
        match social.available() {
            Some(s) if s.sentiment >= 0.2 => SentimentBucket::Positive,
            Some(s) if s.sentiment <= -0.2 => SentimentBucket::Negative,
            Some(_) => SentimentBucket::Neutral,
            None => SentimentBucket::Unknown,
        }
    }
}

/// Structural key used to compare a setup against historical outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SetupKey {
    pub direction: Direction,
    pub volatility: VolatilityBucket,
    pub sentiment: SentimentBucket,
}

impl SetupKey {
    pub fn of(candidate: &ShortlistCandidate, direction: Direction) -> Self {
        Self {
            direction,
            volatility: VolatilityBucket::from_atr_pct(candidate.features.atr_pct),
            sentiment: SentimentBucket::from_social(&candidate.social),
        }
    }
}

/// Realised statistics for one setup bucket over the trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupStats {
    pub key: SetupKey,
    pub samples: usize,
    pub medium_hit_rate: f64,
    pub avg_max_gain_pct: f64,
}

/// A shortlisted candidate joined with its tracked outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedCandidate {
    pub candidate: ShortlistCandidate,
    pub outcome: PickOutcome,
}

/// Pipeline stage identity, used in run records and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    UniverseFilter,
    KillSwitch,
    Prescreen,
    ChartRender,
    Enrichment,
    Arbitration,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::UniverseFilter => "universe_filter",
            Stage::KillSwitch => "kill_switch",
            Stage::Prescreen => "prescreen",
            Stage::ChartRender => "chart_render",
            Stage::Enrichment => "enrichment",
            Stage::Arbitration => "arbitration",
            Stage::Publish => "publish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "universe_filter" => Some(Stage::UniverseFilter),
            "kill_switch" => Some(Stage::KillSwitch),
            "prescreen" => Some(Stage::Prescreen),
            "chart_render" => Some(Stage::ChartRender),
            "enrichment" => Some(Stage::Enrichment),
            "arbitration" => Some(Stage::Arbitration),
            "publish" => Some(Stage::Publish),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a daily run. Halted, failed and "ran but found nothing"
/// are separate variants and must stay that way at every boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Published { picks: usize },
    NoQualifyingPicks,
    Halted { reason: String },
    Failed { stage: Stage, kind: String, message: String },
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Published { .. } => "published",
            RunStatus::NoQualifyingPicks => "no_qualifying_picks",
            RunStatus::Halted { .. } => "halted",
            RunStatus::Failed { .. } => "failed",
            RunStatus::Skipped => "skipped",
        }
    }

    /// A completed day is never re-run; failures may be retried.
    pub fn is_terminal_success(&self) -> bool {
        matches!(
            self,
            RunStatus::Published { .. } | RunStatus::NoQualifyingPicks | RunStatus::Halted { .. }
        )
    }
}
