use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use pick_core::{ArbitratorDecision, Direction, Pick, PickOutcome, PriceTargets, ShortlistCandidate, Tier};
use tracing::{debug, info};

use crate::market::promote_on;
use crate::outcomes::{insert_outcome_on, replace_seed_on};
use crate::{date_str, parse_date, parse_ts, PickStore};

#[derive(sqlx::FromRow)]
pub(crate) struct ShortlistRow {
    pub trade_date: String,
    pub symbol: String,
    pub sector: Option<String>,
    pub rank: i64,
    pub prescreen_score: f64,
    pub prescreen_reasoning: String,
    pub bias: String,
    pub features_json: String,
    pub vision_json: String,
    pub social_json: String,
    pub selected_as_pick: i64,
}

impl ShortlistRow {
    pub(crate) fn into_candidate(self) -> Result<ShortlistCandidate> {
        Ok(ShortlistCandidate {
            trade_date: parse_date(&self.trade_date)?,
            bias: Direction::parse(&self.bias).ok_or_else(|| anyhow!("bad bias '{}'", self.bias))?,
            features: serde_json::from_str(&self.features_json)
                .with_context(|| format!("features of {}", self.symbol))?,
            vision: serde_json::from_str(&self.vision_json)
                .with_context(|| format!("vision of {}", self.symbol))?,
            social: serde_json::from_str(&self.social_json)
                .with_context(|| format!("social of {}", self.symbol))?,
            symbol: self.symbol,
            sector: self.sector,
            rank: self.rank.max(0) as u32,
            prescreen_score: self.prescreen_score,
            prescreen_reasoning: self.prescreen_reasoning,
            selected_as_pick: self.selected_as_pick != 0,
        })
    }
}

pub(crate) const SHORTLIST_COLUMNS: &str = "c.trade_date, c.symbol, c.sector, c.rank, c.prescreen_score, \
     c.prescreen_reasoning, c.bias, c.features_json, c.vision_json, c.social_json, c.selected_as_pick";

#[derive(sqlx::FromRow)]
struct PickRow {
    trade_date: String,
    symbol: String,
    direction: String,
    entry_price: f64,
    confidence: f64,
    target_low: f64,
    target_medium: f64,
    target_high: f64,
    stop: f64,
    rationale: String,
    strategy: String,
    model: String,
}

impl PickRow {
    fn into_pick(self) -> Result<Pick> {
        Ok(Pick {
            trade_date: parse_date(&self.trade_date)?,
            direction: Direction::parse(&self.direction)
                .ok_or_else(|| anyhow!("bad direction '{}'", self.direction))?,
            symbol: self.symbol,
            entry_price: self.entry_price,
            confidence: self.confidence,
            targets: PriceTargets {
                low: self.target_low,
                medium: self.target_medium,
                high: self.target_high,
            },
            stop: self.stop,
            rationale: self.rationale,
            strategy: self.strategy,
            model: self.model,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DecisionRow {
    trade_date: String,
    strategy: String,
    model: String,
    weights_version: i64,
    considered_json: String,
    factors_json: String,
    final_confidence: f64,
    outcome: String,
    created_at: String,
}

impl PickStore {
    /// Persist the day's shortlist, promote its symbols to SHORTLIST and seed
    /// their outcome rows in one transaction. Fails if the day already has a
    /// shortlist.
    pub async fn commit_shortlist(
        &self,
        trade_date: NaiveDate,
        candidates: &[ShortlistCandidate],
        seeds: &[PickOutcome],
    ) -> Result<()> {
        let day = date_str(trade_date);
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let (existing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM shortlist_candidates WHERE trade_date = ?")
                .bind(&day)
                .fetch_one(&mut *tx)
                .await?;
        if existing > 0 {
            bail!("shortlist for {} already committed ({} rows)", day, existing);
        }

        for c in candidates {
            sqlx::query(
                "INSERT INTO shortlist_candidates
                 (trade_date, symbol, sector, rank, prescreen_score, prescreen_reasoning, bias,
                  features_json, vision_json, social_json, selected_as_pick, locked, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?)",
            )
            .bind(&day)
            .bind(&c.symbol)
            .bind(c.sector.clone())
            .bind(c.rank as i64)
            .bind(c.prescreen_score)
            .bind(&c.prescreen_reasoning)
            .bind(c.bias.as_str())
            .bind(serde_json::to_string(&c.features)?)
            .bind(serde_json::to_string(&c.vision)?)
            .bind(serde_json::to_string(&c.social)?)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        let symbols: Vec<String> = candidates.iter().map(|c| c.symbol.clone()).collect();
        promote_on(&mut *tx, trade_date, &symbols, Tier::Shortlist).await?;
        for seed in seeds {
            insert_outcome_on(&mut *tx, seed).await?;
        }
        tx.commit().await?;

        info!(
            "Committed {} shortlist candidates for {} ({} outcome seeds)",
            candidates.len(),
            day,
            seeds.len()
        );
        Ok(())
    }

    /// The day's shortlist in prescreen rank order.
    pub async fn load_shortlist(&self, trade_date: NaiveDate) -> Result<Vec<ShortlistCandidate>> {
        let sql = format!(
            "SELECT {} FROM shortlist_candidates c WHERE c.trade_date = ? ORDER BY c.rank, c.symbol",
            SHORTLIST_COLUMNS
        );
        let rows: Vec<ShortlistRow> = sqlx::query_as(&sql)
            .bind(date_str(trade_date))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ShortlistRow::into_candidate).collect()
    }

    /// Write vision/social slots back onto existing rows. Rows locked by
    /// arbitration are skipped. Returns rows updated.
    pub async fn save_enrichments(&self, trade_date: NaiveDate, candidates: &[ShortlistCandidate]) -> Result<usize> {
        let day = date_str(trade_date);
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let mut updated = 0u64;
        for c in candidates {
            let result = sqlx::query(
                "UPDATE shortlist_candidates SET vision_json = ?, social_json = ?, enriched_at = ?
                 WHERE trade_date = ? AND symbol = ? AND locked = 0",
            )
            .bind(serde_json::to_string(&c.vision)?)
            .bind(serde_json::to_string(&c.social)?)
            .bind(&now)
            .bind(&day)
            .bind(&c.symbol)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }
        tx.commit().await?;
        debug!("Saved enrichments for {} of {} candidates", updated, candidates.len());
        Ok(updated as usize)
    }

    /// True once arbitration has been committed for the day.
    pub async fn is_arbitrated(&self, trade_date: NaiveDate) -> Result<bool> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM arbitrator_decisions WHERE trade_date = ?",
        )
        .bind(date_str(trade_date))
        .fetch_one(&self.pool)
        .await?;
        Ok(n > 0)
    }

    /// Persist the arbitration result atomically: picks, the audit row, the
    /// selected flags, PICK tier promotion, row locks and the outcome seeds.
    /// Pick outcomes replace the open shortlist seed of their symbol; other
    /// seeds only fill gaps. Returns the decision id.
    pub async fn commit_arbitration(
        &self,
        trade_date: NaiveDate,
        picks: &[Pick],
        decision: &ArbitratorDecision,
        outcomes: &[PickOutcome],
    ) -> Result<i64> {
        let day = date_str(trade_date);
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let (existing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM arbitrator_decisions WHERE trade_date = ?")
                .bind(&day)
                .fetch_one(&mut *tx)
                .await?;
        if existing > 0 {
            bail!("arbitration for {} already committed", day);
        }

        let (decision_id,): (i64,) = sqlx::query_as(
            "INSERT INTO arbitrator_decisions
             (trade_date, strategy, model, weights_version, considered_json, factors_json,
              final_confidence, outcome, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&day)
        .bind(&decision.strategy)
        .bind(&decision.model)
        .bind(decision.weights_version)
        .bind(serde_json::to_string(&decision.considered)?)
        .bind(serde_json::to_string(&decision.factors)?)
        .bind(decision.final_confidence)
        .bind(&decision.outcome)
        .bind(decision.created_at.to_rfc3339())
        .fetch_one(&mut *tx)
        .await?;

        for pick in picks {
            sqlx::query(
                "INSERT INTO picks
                 (trade_date, symbol, direction, entry_price, confidence, target_low, target_medium,
                  target_high, stop, rationale, strategy, model, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&day)
            .bind(&pick.symbol)
            .bind(pick.direction.as_str())
            .bind(pick.entry_price)
            .bind(pick.confidence)
            .bind(pick.targets.low)
            .bind(pick.targets.medium)
            .bind(pick.targets.high)
            .bind(pick.stop)
            .bind(&pick.rationale)
            .bind(&pick.strategy)
            .bind(&pick.model)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE shortlist_candidates SET selected_as_pick = 1 WHERE trade_date = ? AND symbol = ?")
                .bind(&day)
                .bind(&pick.symbol)
                .execute(&mut *tx)
                .await?;
        }

        let symbols: Vec<String> = picks.iter().map(|p| p.symbol.clone()).collect();
        promote_on(&mut *tx, trade_date, &symbols, Tier::Pick).await?;

        sqlx::query("UPDATE shortlist_candidates SET locked = 1 WHERE trade_date = ?")
            .bind(&day)
            .execute(&mut *tx)
            .await?;

        for outcome in outcomes {
            if outcome.was_pick {
                replace_seed_on(&mut *tx, outcome).await?;
            } else {
                insert_outcome_on(&mut *tx, outcome).await?;
            }
        }

        tx.commit().await?;
        info!(
            "Committed arbitration for {}: {} picks, {} tracked outcomes (decision {})",
            day,
            picks.len(),
            outcomes.len(),
            decision_id
        );
        Ok(decision_id)
    }

    pub async fn load_picks(&self, trade_date: NaiveDate) -> Result<Vec<Pick>> {
        let rows: Vec<PickRow> = sqlx::query_as(
            "SELECT trade_date, symbol, direction, entry_price, confidence, target_low, target_medium,
                    target_high, stop, rationale, strategy, model
             FROM picks WHERE trade_date = ? ORDER BY confidence DESC, symbol",
        )
        .bind(date_str(trade_date))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PickRow::into_pick).collect()
    }

    /// Stamp the day's picks as published. Already-stamped rows keep their time.
    pub async fn mark_published(&self, trade_date: NaiveDate) -> Result<u64> {
        let result = sqlx::query("UPDATE picks SET published_at = ? WHERE trade_date = ? AND published_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(date_str(trade_date))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Audit rows for trade days on or after `since`.
    pub async fn load_decisions(&self, since: NaiveDate) -> Result<Vec<ArbitratorDecision>> {
        let rows: Vec<DecisionRow> = sqlx::query_as(
            "SELECT trade_date, strategy, model, weights_version, considered_json, factors_json,
                    final_confidence, outcome, created_at
             FROM arbitrator_decisions WHERE trade_date >= ? ORDER BY trade_date, id",
        )
        .bind(date_str(since))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(ArbitratorDecision {
                    trade_date: parse_date(&r.trade_date)?,
                    strategy: r.strategy,
                    model: r.model,
                    weights_version: r.weights_version,
                    considered: serde_json::from_str(&r.considered_json)?,
                    factors: serde_json::from_str(&r.factors_json)?,
                    final_confidence: r.final_confidence,
                    outcome: r.outcome,
                    created_at: parse_ts(&r.created_at)?,
                })
            })
            .collect()
    }
}
