use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    Bar, BarDelta, Fundamentals, PickBatch, PickOutcome, PipelineResult, RunStatus, SymbolData, SymbolInfo,
};

/// Rolling OHLCV + fundamentals window for the tradable universe
#[async_trait]
pub trait MarketDataStore: Send + Sync {
    /// Every known symbol with bars in `(as_of - lookback_days, as_of]`.
    async fn load_universe(&self, as_of: NaiveDate, lookback_days: u32) -> PipelineResult<Vec<SymbolData>>;

    /// Time-ordered bars for one symbol, inclusive range.
    async fn load_bars(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> PipelineResult<Vec<Bar>>;

    /// Date of the most recent bar across the universe.
    async fn latest_bar_date(&self) -> PipelineResult<Option<NaiveDate>>;

    async fn upsert_symbol(&self, info: &SymbolInfo, fundamentals: &Fundamentals) -> PipelineResult<()>;

    /// Daily delta upsert keyed by (symbol, date). Returns rows written.
    async fn upsert_bars(&self, deltas: &[BarDelta]) -> PipelineResult<usize>;
}

/// External real-time store consuming the day's picks
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, batch: &PickBatch) -> PipelineResult<()>;

    /// Announce a day without published picks so readers can tell why.
    async fn publish_status(&self, trade_date: NaiveDate, status: &RunStatus) -> PipelineResult<()>;
}

/// Persistence of tracked outcomes
#[async_trait]
pub trait OutcomeLedger: Send + Sync {
    /// Every outcome still in TRACKING state.
    async fn open_outcomes(&self) -> PipelineResult<Vec<PickOutcome>>;

    /// Persist an update. Returns false when the stored row is already CLOSED,
    /// in which case nothing is written.
    async fn update_outcome(&self, outcome: &PickOutcome) -> PipelineResult<bool>;
}
