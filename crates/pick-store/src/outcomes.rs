use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use pick_core::{
    CloseReason, Direction, OutcomeLedger, PickOutcome, PipelineError, PipelineResult, PriceTargets,
    TrackedCandidate, TrackingStatus,
};

use crate::shortlist::{ShortlistRow, SHORTLIST_COLUMNS};
use crate::{date_str, parse_date, parse_ts, PickStore};

const OUTCOME_COLUMNS: &str = "trade_date, symbol, was_pick, direction, entry_price, target_low, \
     target_medium, target_high, stop, status, close_reason, max_gain_pct, max_loss_pct, days_to_peak, \
     hit_low, hit_medium, hit_high, stop_hit, last_return_pct, days_tracked, last_bar_date, closed_at";

#[derive(sqlx::FromRow)]
struct OutcomeRow {
    trade_date: String,
    symbol: String,
    was_pick: i64,
    direction: String,
    entry_price: f64,
    target_low: f64,
    target_medium: f64,
    target_high: f64,
    stop: f64,
    status: String,
    close_reason: Option<String>,
    max_gain_pct: f64,
    max_loss_pct: f64,
    days_to_peak: Option<i64>,
    hit_low: i64,
    hit_medium: i64,
    hit_high: i64,
    stop_hit: i64,
    last_return_pct: f64,
    days_tracked: i64,
    last_bar_date: Option<String>,
    closed_at: Option<String>,
}

impl OutcomeRow {
    fn into_outcome(self) -> Result<PickOutcome> {
        let close_reason = match self.close_reason.as_deref() {
            Some(r) => Some(CloseReason::parse(r).ok_or_else(|| anyhow!("bad close reason '{}'", r))?),
            None => None,
        };
        Ok(PickOutcome {
            trade_date: parse_date(&self.trade_date)?,
            direction: Direction::parse(&self.direction)
                .ok_or_else(|| anyhow!("bad direction '{}'", self.direction))?,
            status: TrackingStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("bad status '{}'", self.status))?,
            symbol: self.symbol,
            was_pick: self.was_pick != 0,
            entry_price: self.entry_price,
            targets: PriceTargets {
                low: self.target_low,
                medium: self.target_medium,
                high: self.target_high,
            },
            stop: self.stop,
            close_reason,
            max_gain_pct: self.max_gain_pct,
            max_loss_pct: self.max_loss_pct,
            days_to_peak: self.days_to_peak.map(|d| d.max(0) as u32),
            hit_low: self.hit_low != 0,
            hit_medium: self.hit_medium != 0,
            hit_high: self.hit_high != 0,
            stop_hit: self.stop_hit != 0,
            last_return_pct: self.last_return_pct,
            days_tracked: self.days_tracked.max(0) as u32,
            last_bar_date: self.last_bar_date.as_deref().map(parse_date).transpose()?,
            closed_at: self.closed_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

fn flag(b: bool) -> i64 {
    b as i64
}

/// Seed an outcome row; an existing row for (trade_date, symbol) wins.
pub(crate) async fn insert_outcome_on(conn: &mut sqlx::AnyConnection, o: &PickOutcome) -> Result<()> {
    sqlx::query(
        "INSERT INTO pick_outcomes
         (trade_date, symbol, was_pick, direction, entry_price, target_low, target_medium, target_high,
          stop, status, close_reason, max_gain_pct, max_loss_pct, days_to_peak, hit_low, hit_medium,
          hit_high, stop_hit, last_return_pct, days_tracked, last_bar_date, closed_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(trade_date, symbol) DO NOTHING",
    )
    .bind(date_str(o.trade_date))
    .bind(&o.symbol)
    .bind(flag(o.was_pick))
    .bind(o.direction.as_str())
    .bind(o.entry_price)
    .bind(o.targets.low)
    .bind(o.targets.medium)
    .bind(o.targets.high)
    .bind(o.stop)
    .bind(o.status.as_str())
    .bind(o.close_reason.map(|r| r.as_str().to_string()))
    .bind(o.max_gain_pct)
    .bind(o.max_loss_pct)
    .bind(o.days_to_peak.map(|d| d as i64))
    .bind(flag(o.hit_low))
    .bind(flag(o.hit_medium))
    .bind(flag(o.hit_high))
    .bind(flag(o.stop_hit))
    .bind(o.last_return_pct)
    .bind(o.days_tracked as i64)
    .bind(o.last_bar_date.map(date_str))
    .bind(o.closed_at.map(|t| t.to_rfc3339()))
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Swap a still-open non-pick seed for the pick's own outcome. A closed or
/// already-picked row is left alone.
pub(crate) async fn replace_seed_on(conn: &mut sqlx::AnyConnection, o: &PickOutcome) -> Result<()> {
    sqlx::query(
        "DELETE FROM pick_outcomes
         WHERE trade_date = ? AND symbol = ? AND was_pick = 0 AND status = ?",
    )
    .bind(date_str(o.trade_date))
    .bind(&o.symbol)
    .bind(TrackingStatus::Tracking.as_str())
    .execute(&mut *conn)
    .await?;
    insert_outcome_on(conn, o).await
}

impl PickStore {
    pub async fn load_outcome(&self, trade_date: NaiveDate, symbol: &str) -> Result<Option<PickOutcome>> {
        let sql = format!(
            "SELECT {} FROM pick_outcomes WHERE trade_date = ? AND symbol = ?",
            OUTCOME_COLUMNS
        );
        let row: Option<OutcomeRow> = sqlx::query_as(&sql)
            .bind(date_str(trade_date))
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OutcomeRow::into_outcome).transpose()
    }

    /// Outcomes of trade days on or after `since`, open and closed.
    pub async fn load_outcomes(&self, since: NaiveDate) -> Result<Vec<PickOutcome>> {
        let sql = format!(
            "SELECT {} FROM pick_outcomes WHERE trade_date >= ? ORDER BY trade_date, symbol",
            OUTCOME_COLUMNS
        );
        let rows: Vec<OutcomeRow> = sqlx::query_as(&sql)
            .bind(date_str(since))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OutcomeRow::into_outcome).collect()
    }

    /// Shortlist rows joined with their outcomes for trade days on or after
    /// `since`. Candidates without an outcome row are left out.
    pub async fn tracked_candidates(&self, since: NaiveDate) -> Result<Vec<TrackedCandidate>> {
        let mut outcomes: HashMap<(NaiveDate, String), PickOutcome> = self
            .load_outcomes(since)
            .await?
            .into_iter()
            .map(|o| ((o.trade_date, o.symbol.clone()), o))
            .collect();

        let sql = format!(
            "SELECT {} FROM shortlist_candidates c WHERE c.trade_date >= ? ORDER BY c.trade_date, c.rank",
            SHORTLIST_COLUMNS
        );
        let rows: Vec<ShortlistRow> = sqlx::query_as(&sql)
            .bind(date_str(since))
            .fetch_all(&self.pool)
            .await?;

        let mut tracked = Vec::new();
        for row in rows {
            let candidate = row.into_candidate()?;
            if let Some(outcome) = outcomes.remove(&(candidate.trade_date, candidate.symbol.clone())) {
                tracked.push(TrackedCandidate { candidate, outcome });
            }
        }
        Ok(tracked)
    }

    async fn open_outcomes_inner(&self) -> Result<Vec<PickOutcome>> {
        let sql = format!(
            "SELECT {} FROM pick_outcomes WHERE status = ? ORDER BY trade_date, symbol",
            OUTCOME_COLUMNS
        );
        let rows: Vec<OutcomeRow> = sqlx::query_as(&sql)
            .bind(TrackingStatus::Tracking.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OutcomeRow::into_outcome).collect()
    }

    async fn update_outcome_inner(&self, o: &PickOutcome) -> Result<bool> {
        // CLOSED rows are frozen: the status guard makes the write a no-op.
        let result = sqlx::query(
            "UPDATE pick_outcomes SET
               status = ?, close_reason = ?, max_gain_pct = ?, max_loss_pct = ?, days_to_peak = ?,
               hit_low = ?, hit_medium = ?, hit_high = ?, stop_hit = ?, last_return_pct = ?,
               days_tracked = ?, last_bar_date = ?, closed_at = ?, updated_at = ?
             WHERE trade_date = ? AND symbol = ? AND status = ?",
        )
        .bind(o.status.as_str())
        .bind(o.close_reason.map(|r| r.as_str().to_string()))
        .bind(o.max_gain_pct)
        .bind(o.max_loss_pct)
        .bind(o.days_to_peak.map(|d| d as i64))
        .bind(flag(o.hit_low))
        .bind(flag(o.hit_medium))
        .bind(flag(o.hit_high))
        .bind(flag(o.stop_hit))
        .bind(o.last_return_pct)
        .bind(o.days_tracked as i64)
        .bind(o.last_bar_date.map(date_str))
        .bind(o.closed_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(date_str(o.trade_date))
        .bind(&o.symbol)
        .bind(TrackingStatus::Tracking.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OutcomeLedger for PickStore {
    async fn open_outcomes(&self) -> PipelineResult<Vec<PickOutcome>> {
        self.open_outcomes_inner().await.map_err(PipelineError::store)
    }

    async fn update_outcome(&self, outcome: &PickOutcome) -> PipelineResult<bool> {
        self.update_outcome_inner(outcome).await.map_err(PipelineError::store)
    }
}
