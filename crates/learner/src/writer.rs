use anyhow::{Context, Result};
use chrono::Utc;
use pick_core::WeightSet;
use tracing::info;

/// The only code path that writes weight rows. Each commit inserts a new
/// version and moves the active pointer inside one transaction, so readers
/// see either the old version or the complete new one.
pub(crate) struct WeightWriter {
    pool: sqlx::AnyPool,
}

impl WeightWriter {
    pub(crate) fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    /// Persist `set` as the next version and activate it. Returns the version.
    pub(crate) async fn commit(&self, set: &WeightSet) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let (latest,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM weight_sets")
            .fetch_one(&mut *tx)
            .await?;
        let version = latest + 1;
        let now = Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO weight_sets (version, guidance, created_at) VALUES (?, ?, ?)")
            .bind(version)
            .bind(set.guidance.clone())
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("inserting weight set header")?;

        for (feature, weight) in &set.feature_weights {
            sqlx::query("INSERT INTO feature_weights (version, feature, weight) VALUES (?, ?, ?)")
                .bind(version)
                .bind(feature)
                .bind(*weight)
                .execute(&mut *tx)
                .await?;
        }

        let trust = set.agent_weights.trust.iter().map(|(n, v)| ("trust", n.as_str(), *v));
        let coefficients = set
            .agent_weights
            .coefficients
            .values()
            .into_iter()
            .map(|(n, v)| ("coefficient", n, v));
        for (kind, name, value) in trust.chain(coefficients) {
            sqlx::query("INSERT INTO agent_weights (version, kind, name, value) VALUES (?, ?, ?, ?)")
                .bind(version)
                .bind(kind)
                .bind(name)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO active_weights (id, version, activated_at) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET version = excluded.version, activated_at = excluded.activated_at",
        )
        .bind(version)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.context("committing weight version")?;
        info!("Activated weight version {}", version);
        Ok(version)
    }
}
