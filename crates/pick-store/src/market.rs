use std::collections::BTreeMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use pick_core::{
    Bar, BarDelta, Fundamentals, MarketCondition, MarketDataStore, PipelineError, PipelineResult,
    SymbolData, SymbolInfo, Tier,
};
use tracing::debug;

use crate::{date_str, parse_date, parse_ts, PickStore};

#[derive(sqlx::FromRow)]
struct SymbolRow {
    symbol: String,
    exchange: String,
    sector: Option<String>,
    market_cap: Option<f64>,
    beta: Option<f64>,
    pe_ratio: Option<f64>,
    fundamentals_as_of: Option<String>,
}

#[derive(sqlx::FromRow)]
struct BarRow {
    symbol: String,
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl BarRow {
    fn into_bar(self) -> Result<(String, Bar)> {
        let date = parse_date(&self.date)?;
        Ok((
            self.symbol,
            Bar {
                date,
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
                volume: self.volume,
            },
        ))
    }
}

fn tier_column(tier: Tier) -> Option<&'static str> {
    match tier {
        Tier::All => None,
        Tier::Active => Some("active_at"),
        Tier::Shortlist => Some("shortlist_at"),
        Tier::Pick => Some("pick_at"),
    }
}

/// Move `symbols` up to `tier` for `trade_date` on an open connection.
///
/// A symbol must currently sit exactly one tier below; symbols already at or
/// above `tier` are left untouched. Returns the number of rows promoted.
pub(crate) async fn promote_on(
    conn: &mut sqlx::AnyConnection,
    trade_date: NaiveDate,
    symbols: &[String],
    tier: Tier,
) -> Result<usize> {
    let Some(column) = tier_column(tier) else {
        return Ok(0);
    };
    let day = date_str(trade_date);
    let now = Utc::now().to_rfc3339();
    let mut promoted = 0;

    for symbol in symbols {
        let current: Option<(i64,)> =
            sqlx::query_as("SELECT tier_rank FROM symbol_tiers WHERE trade_date = ? AND symbol = ?")
                .bind(&day)
                .bind(symbol)
                .fetch_optional(&mut *conn)
                .await?;
        let current_rank = current.map(|(r,)| r).unwrap_or(Tier::All.rank());

        if current_rank >= tier.rank() {
            continue;
        }
        if current_rank != tier.rank() - 1 {
            bail!(
                "{} on {} cannot move to {} from tier rank {}",
                symbol,
                day,
                tier.as_str(),
                current_rank
            );
        }

        if current.is_none() {
            let sql = format!(
                "INSERT INTO symbol_tiers (trade_date, symbol, tier, tier_rank, {}) VALUES (?, ?, ?, ?, ?)",
                column
            );
            sqlx::query(&sql)
                .bind(&day)
                .bind(symbol)
                .bind(tier.as_str())
                .bind(tier.rank())
                .bind(&now)
                .execute(&mut *conn)
                .await?;
        } else {
            let sql = format!(
                "UPDATE symbol_tiers SET tier = ?, tier_rank = ?, {} = ? WHERE trade_date = ? AND symbol = ?",
                column
            );
            sqlx::query(&sql)
                .bind(tier.as_str())
                .bind(tier.rank())
                .bind(&now)
                .bind(&day)
                .bind(symbol)
                .execute(&mut *conn)
                .await?;
        }
        promoted += 1;
    }

    Ok(promoted)
}

impl PickStore {
    /// Record a tier transition for the day. Tiers never move down.
    pub async fn promote_tier(&self, trade_date: NaiveDate, symbols: &[String], tier: Tier) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let promoted = promote_on(&mut *tx, trade_date, symbols, tier).await?;
        tx.commit().await?;
        debug!("Promoted {} symbols to {} for {}", promoted, tier.as_str(), trade_date);
        Ok(promoted)
    }

    pub async fn symbol_tier(&self, trade_date: NaiveDate, symbol: &str) -> Result<Tier> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT tier FROM symbol_tiers WHERE trade_date = ? AND symbol = ?")
                .bind(date_str(trade_date))
                .bind(symbol)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((t,)) => Tier::parse(&t).ok_or_else(|| anyhow::anyhow!("unknown tier '{}'", t)),
            None => Ok(Tier::All),
        }
    }

    /// Symbols holding each tier (or higher) on `trade_date`.
    pub async fn tier_counts(&self, trade_date: NaiveDate) -> Result<BTreeMap<Tier, usize>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT tier_rank, COUNT(*) FROM symbol_tiers WHERE trade_date = ? GROUP BY tier_rank",
        )
        .bind(date_str(trade_date))
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for tier in [Tier::Active, Tier::Shortlist, Tier::Pick] {
            let n: i64 = rows.iter().filter(|(r, _)| *r >= tier.rank()).map(|(_, c)| c).sum();
            counts.insert(tier, n as usize);
        }
        Ok(counts)
    }

    pub async fn record_market_condition(&self, condition: &MarketCondition) -> Result<()> {
        sqlx::query(
            "INSERT INTO market_conditions (trade_date, volatility_index, index_premarket_change_pct, observed_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(date_str(condition.trade_date))
        .bind(condition.volatility_index)
        .bind(condition.index_premarket_change_pct)
        .bind(condition.observed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent observation for the day, if any was recorded.
    pub async fn latest_market_condition(&self, trade_date: NaiveDate) -> Result<Option<MarketCondition>> {
        let row: Option<(f64, f64, String)> = sqlx::query_as(
            "SELECT volatility_index, index_premarket_change_pct, observed_at
             FROM market_conditions WHERE trade_date = ?
             ORDER BY observed_at DESC, id DESC LIMIT 1",
        )
        .bind(date_str(trade_date))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(vix, premarket, observed)| {
            Ok(MarketCondition {
                trade_date,
                volatility_index: vix,
                index_premarket_change_pct: premarket,
                observed_at: parse_ts(&observed)?,
            })
        })
        .transpose()
    }

    async fn load_universe_inner(&self, as_of: NaiveDate, lookback_days: u32) -> Result<Vec<SymbolData>> {
        let symbols: Vec<SymbolRow> = sqlx::query_as(
            "SELECT symbol, exchange, sector, market_cap, beta, pe_ratio, fundamentals_as_of
             FROM symbols ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;

        let from = as_of - Duration::days(lookback_days as i64);
        let bars: Vec<BarRow> = sqlx::query_as(
            "SELECT symbol, date, open, high, low, close, volume FROM daily_bars
             WHERE date > ? AND date <= ? ORDER BY symbol, date",
        )
        .bind(date_str(from))
        .bind(date_str(as_of))
        .fetch_all(&self.pool)
        .await?;

        let mut by_symbol: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
        for row in bars {
            let (symbol, bar) = row.into_bar()?;
            by_symbol.entry(symbol).or_default().push(bar);
        }

        symbols
            .into_iter()
            .map(|row| {
                let as_of = row.fundamentals_as_of.as_deref().map(parse_date).transpose()?;
                Ok(SymbolData {
                    bars: by_symbol.remove(&row.symbol).unwrap_or_default(),
                    info: SymbolInfo {
                        symbol: row.symbol,
                        exchange: row.exchange,
                        sector: row.sector,
                    },
                    fundamentals: Fundamentals {
                        market_cap: row.market_cap,
                        beta: row.beta,
                        pe_ratio: row.pe_ratio,
                        as_of,
                    },
                })
            })
            .collect()
    }

    async fn load_bars_inner(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Bar>> {
        let rows: Vec<BarRow> = sqlx::query_as(
            "SELECT symbol, date, open, high, low, close, volume FROM daily_bars
             WHERE symbol = ? AND date >= ? AND date <= ? ORDER BY date",
        )
        .bind(symbol)
        .bind(date_str(from))
        .bind(date_str(to))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.into_bar().map(|(_, bar)| bar)).collect()
    }

    async fn upsert_bars_inner(&self, deltas: &[BarDelta]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for delta in deltas {
            let bar = &delta.bar;
            sqlx::query(
                "INSERT INTO daily_bars (symbol, date, open, high, low, close, volume)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(symbol, date) DO UPDATE SET
                   open = excluded.open, high = excluded.high, low = excluded.low,
                   close = excluded.close, volume = excluded.volume",
            )
            .bind(&delta.symbol)
            .bind(date_str(bar.date))
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(deltas.len())
    }
}

#[async_trait]
impl MarketDataStore for PickStore {
    async fn load_universe(&self, as_of: NaiveDate, lookback_days: u32) -> PipelineResult<Vec<SymbolData>> {
        self.load_universe_inner(as_of, lookback_days)
            .await
            .map_err(PipelineError::store)
    }

    async fn load_bars(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> PipelineResult<Vec<Bar>> {
        self.load_bars_inner(symbol, from, to)
            .await
            .map_err(PipelineError::store)
    }

    async fn latest_bar_date(&self) -> PipelineResult<Option<NaiveDate>> {
        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT MAX(date) FROM daily_bars")
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::store)?;
        match row.and_then(|(d,)| d) {
            Some(d) => parse_date(&d).map(Some).map_err(PipelineError::store),
            None => Ok(None),
        }
    }

    async fn upsert_symbol(&self, info: &SymbolInfo, fundamentals: &Fundamentals) -> PipelineResult<()> {
        sqlx::query(
            "INSERT INTO symbols (symbol, exchange, sector, market_cap, beta, pe_ratio, fundamentals_as_of, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol) DO UPDATE SET
               exchange = excluded.exchange, sector = excluded.sector,
               market_cap = excluded.market_cap, beta = excluded.beta, pe_ratio = excluded.pe_ratio,
               fundamentals_as_of = excluded.fundamentals_as_of, updated_at = excluded.updated_at",
        )
        .bind(&info.symbol)
        .bind(&info.exchange)
        .bind(info.sector.clone())
        .bind(fundamentals.market_cap)
        .bind(fundamentals.beta)
        .bind(fundamentals.pe_ratio)
        .bind(fundamentals.as_of.map(date_str))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(PipelineError::store)?;
        Ok(())
    }

    async fn upsert_bars(&self, deltas: &[BarDelta]) -> PipelineResult<usize> {
        self.upsert_bars_inner(deltas).await.map_err(PipelineError::store)
    }
}
