use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use pick_core::{RunStatus, Stage};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{date_str, parse_date, parse_ts, PickStore};

const RUNNING: &str = "running";

/// One row of `pipeline_runs`. `status` is None while the run is in flight
/// (or died without finishing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub trade_date: NaiveDate,
    pub status: Option<RunStatus>,
    pub shortlist_count: usize,
    pub pick_count: usize,
    pub strategy: Option<String>,
    pub weights_version: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn started(trade_date: NaiveDate) -> Self {
        Self {
            trade_date,
            status: None,
            shortlist_count: 0,
            pick_count: 0,
            strategy: None,
            weights_version: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningRunStatus {
    Committed,
    Skipped,
    Rejected,
    Failed,
}

impl LearningRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningRunStatus::Committed => "committed",
            LearningRunStatus::Skipped => "skipped",
            LearningRunStatus::Rejected => "rejected",
            LearningRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "committed" => Some(LearningRunStatus::Committed),
            "skipped" => Some(LearningRunStatus::Skipped),
            "rejected" => Some(LearningRunStatus::Rejected),
            "failed" => Some(LearningRunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRunRecord {
    pub run_date: NaiveDate,
    pub status: LearningRunStatus,
    pub weights_version: Option<i64>,
    pub samples: usize,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RunRow {
    trade_date: String,
    status: String,
    stage: Option<String>,
    error_kind: Option<String>,
    message: Option<String>,
    shortlist_count: i64,
    pick_count: i64,
    strategy: Option<String>,
    weights_version: Option<i64>,
    started_at: String,
    finished_at: Option<String>,
}

impl RunRow {
    fn into_record(self) -> Result<RunRecord> {
        let status = match self.status.as_str() {
            RUNNING => None,
            "published" => Some(RunStatus::Published {
                picks: self.pick_count.max(0) as usize,
            }),
            "no_qualifying_picks" => Some(RunStatus::NoQualifyingPicks),
            "halted" => Some(RunStatus::Halted {
                reason: self.message.clone().unwrap_or_default(),
            }),
            "skipped" => Some(RunStatus::Skipped),
            "failed" => {
                let stage = self.stage.as_deref().unwrap_or_default();
                Some(RunStatus::Failed {
                    stage: Stage::parse(stage).ok_or_else(|| anyhow!("bad stage '{}'", stage))?,
                    kind: self.error_kind.clone().unwrap_or_default(),
                    message: self.message.clone().unwrap_or_default(),
                })
            }
            other => return Err(anyhow!("bad run status '{}'", other)),
        };
        Ok(RunRecord {
            trade_date: parse_date(&self.trade_date)?,
            status,
            shortlist_count: self.shortlist_count.max(0) as usize,
            pick_count: self.pick_count.max(0) as usize,
            strategy: self.strategy,
            weights_version: self.weights_version,
            started_at: parse_ts(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

impl PickStore {
    /// Open (or reopen, after a failure) the run row for `trade_date`.
    pub async fn start_run(&self, trade_date: NaiveDate) -> Result<RunRecord> {
        let record = RunRecord::started(trade_date);
        sqlx::query(
            "INSERT INTO pipeline_runs (trade_date, status, shortlist_count, pick_count, started_at)
             VALUES (?, ?, 0, 0, ?)
             ON CONFLICT(trade_date) DO UPDATE SET
               status = excluded.status, stage = NULL, error_kind = NULL, message = NULL,
               shortlist_count = 0, pick_count = 0, strategy = NULL, weights_version = NULL,
               started_at = excluded.started_at, finished_at = NULL",
        )
        .bind(date_str(trade_date))
        .bind(RUNNING)
        .bind(record.started_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn finish_run(&self, record: &RunRecord) -> Result<()> {
        let (status, stage, kind, message) = match &record.status {
            None => (RUNNING, None, None, None),
            Some(RunStatus::Failed { stage, kind, message }) => (
                "failed",
                Some(stage.as_str().to_string()),
                Some(kind.clone()),
                Some(message.clone()),
            ),
            Some(RunStatus::Halted { reason }) => ("halted", None, None, Some(reason.clone())),
            Some(other) => (other.as_str(), None, None, None),
        };
        let finished_at = record.finished_at.unwrap_or_else(Utc::now);

        sqlx::query(
            "UPDATE pipeline_runs SET status = ?, stage = ?, error_kind = ?, message = ?,
               shortlist_count = ?, pick_count = ?, strategy = ?, weights_version = ?, finished_at = ?
             WHERE trade_date = ?",
        )
        .bind(status)
        .bind(stage)
        .bind(kind)
        .bind(message)
        .bind(record.shortlist_count as i64)
        .bind(record.pick_count as i64)
        .bind(record.strategy.clone())
        .bind(record.weights_version)
        .bind(finished_at.to_rfc3339())
        .bind(date_str(record.trade_date))
        .execute(&self.pool)
        .await?;

        info!("Run {} finished: {}", record.trade_date, status);
        Ok(())
    }

    pub async fn load_run(&self, trade_date: NaiveDate) -> Result<Option<RunRecord>> {
        let row: Option<RunRow> = sqlx::query_as(
            "SELECT trade_date, status, stage, error_kind, message, shortlist_count, pick_count,
                    strategy, weights_version, started_at, finished_at
             FROM pipeline_runs WHERE trade_date = ?",
        )
        .bind(date_str(trade_date))
        .fetch_optional(&self.pool)
        .await?;
        row.map(RunRow::into_record).transpose()
    }

    pub async fn record_learning_run(&self, run: &LearningRunRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO learning_runs (run_date, status, weights_version, samples, reason, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(date_str(run.run_date))
        .bind(run.status.as_str())
        .bind(run.weights_version)
        .bind(run.samples as i64)
        .bind(run.reason.clone())
        .bind(run.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent learning attempts first.
    pub async fn recent_learning_runs(&self, limit: i64) -> Result<Vec<LearningRunRecord>> {
        let rows: Vec<(String, String, Option<i64>, i64, Option<String>, String)> = sqlx::query_as(
            "SELECT run_date, status, weights_version, samples, reason, created_at
             FROM learning_runs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(run_date, status, weights_version, samples, reason, created_at)| {
                Ok(LearningRunRecord {
                    run_date: parse_date(&run_date)?,
                    status: LearningRunStatus::parse(&status)
                        .ok_or_else(|| anyhow!("bad learning status '{}'", status))?,
                    weights_version,
                    samples: samples.max(0) as usize,
                    reason,
                    created_at: parse_ts(&created_at)?,
                })
            })
            .collect()
    }
}
