//! Persisted schema for the daily pick pipeline.
//!
//! Everything goes through one `sqlx::AnyPool` (SQLite in practice). Dates are
//! stored as `%Y-%m-%d` text and timestamps as RFC 3339 so rows stay readable
//! under the `Any` driver; booleans are INTEGER columns.

mod market;
mod outcomes;
mod runs;
mod schema;
mod shortlist;
mod weights;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::any::AnyPoolOptions;
use tracing::info;

pub use runs::{LearningRunRecord, LearningRunStatus, RunRecord};

pub const FLAG_PIPELINE_ENABLED: &str = "pipeline_enabled";

/// Pipeline persistence: market data, tiers, shortlist, picks, outcomes,
/// weight versions (read side), audit rows, run records and agent state.
#[derive(Clone)]
pub struct PickStore {
    pub(crate) pool: sqlx::AnyPool,
}

impl PickStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    /// Open a pool for `database_url` and create missing tables.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("connecting to {}", database_url))?;
        let store = Self::new(pool);
        store.init_tables().await?;
        info!("Pick store ready at {}", database_url);
        Ok(store)
    }

    pub async fn init_tables(&self) -> Result<()> {
        schema::create_all(&self.pool).await.context("creating pick store tables")
    }

    /// Shared pool, for the learner's versioned weight writer.
    pub fn pool(&self) -> &sqlx::AnyPool {
        &self.pool
    }

    /// Save a state key-value pair.
    pub async fn save_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load a state value by key.
    pub async fn load_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM agent_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set_flag(&self, name: &str, enabled: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_flags (name, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(if enabled { "true" } else { "false" })
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        info!("Flag {} set to {}", name, enabled);
        Ok(())
    }

    /// Unset flags count as enabled.
    pub async fn flag_enabled(&self, name: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM system_flags WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some((v,)) => !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "off"),
            None => true,
        })
    }

    pub async fn pipeline_enabled(&self) -> Result<bool> {
        self.flag_enabled(FLAG_PIPELINE_ENABLED).await
    }
}

pub(crate) fn date_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("bad date '{}'", s))
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .with_context(|| format!("bad timestamp '{}'", s))
}
