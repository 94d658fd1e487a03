//! Read side of the versioned weight sets. Writes belong to the learner.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use pick_core::{AgentWeights, ConfidenceCoefficients, WeightSet};

use crate::{parse_ts, PickStore};

impl PickStore {
    pub async fn active_weights_version(&self) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM active_weights WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    /// The weight set the active pointer names, or the built-in baseline
    /// (version 0) before the first learning run.
    pub async fn load_active_weights(&self) -> Result<WeightSet> {
        match self.active_weights_version().await? {
            Some(version) => self
                .load_weights(version)
                .await
                .with_context(|| format!("loading active weight version {}", version)),
            None => Ok(WeightSet::default()),
        }
    }

    pub async fn load_weights(&self, version: i64) -> Result<WeightSet> {
        let header: Option<(Option<String>, String)> =
            sqlx::query_as("SELECT guidance, created_at FROM weight_sets WHERE version = ?")
                .bind(version)
                .fetch_optional(&self.pool)
                .await?;
        let Some((guidance, created_at)) = header else {
            bail!("weight version {} does not exist", version);
        };

        let features: Vec<(String, f64)> =
            sqlx::query_as("SELECT feature, weight FROM feature_weights WHERE version = ?")
                .bind(version)
                .fetch_all(&self.pool)
                .await?;

        let agent_rows: Vec<(String, String, f64)> =
            sqlx::query_as("SELECT kind, name, value FROM agent_weights WHERE version = ?")
                .bind(version)
                .fetch_all(&self.pool)
                .await?;

        let mut trust = BTreeMap::new();
        let mut coefficients = BTreeMap::new();
        for (kind, name, value) in agent_rows {
            match kind.as_str() {
                "trust" => {
                    trust.insert(name, value);
                }
                "coefficient" => {
                    coefficients.insert(name, value);
                }
                other => bail!("unknown agent weight kind '{}'", other),
            }
        }
        let coefficient = |name: &str| -> Result<f64> {
            coefficients
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("weight version {} has no '{}' coefficient", version, name))
        };

        Ok(WeightSet {
            version,
            feature_weights: features.into_iter().collect(),
            agent_weights: AgentWeights {
                trust,
                coefficients: ConfidenceCoefficients {
                    agreement: coefficient("agreement")?,
                    trust: coefficient("trust")?,
                    volatility: coefficient("volatility")?,
                    alignment: coefficient("alignment")?,
                    history: coefficient("history")?,
                },
            },
            guidance,
            created_at: parse_ts(&created_at)?,
        })
    }
}
