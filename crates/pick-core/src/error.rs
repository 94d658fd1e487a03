use chrono::NaiveDate;
use thiserror::Error;

use crate::types::Stage;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stale market data: latest bar {latest:?} is more than {max_age_days} days before {as_of}")]
    StaleData {
        latest: Option<NaiveDate>,
        as_of: NaiveDate,
        max_age_days: i64,
    },

    #[error("No market condition recorded for {0}")]
    MissingMarketCondition(NaiveDate),

    #[error("{stage} returned {got} entries, expected {expected} (after {attempts} attempts)")]
    Cardinality {
        stage: Stage,
        expected: usize,
        got: usize,
        attempts: u32,
    },

    #[error("{stage} returned malformed output: {reason} (after {attempts} attempts)")]
    Malformed {
        stage: Stage,
        reason: String,
        attempts: u32,
    },

    #[error("Active tier has {active} symbols, shortlist needs {required}")]
    InsufficientUniverse { active: usize, required: usize },

    #[error("Service unavailable: {service}: {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: Stage, seconds: u64 },

    #[error("Weight integrity check failed: {0}")]
    WeightIntegrity(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl PipelineError {
    /// Error class persisted with failed runs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::StaleData { .. } | PipelineError::MissingMarketCondition(_) => {
                "data_freshness"
            }
            PipelineError::Cardinality { .. }
            | PipelineError::Malformed { .. }
            | PipelineError::InsufficientUniverse { .. } => "cardinality",
            PipelineError::ServiceUnavailable { .. } | PipelineError::Timeout { .. } => "service",
            PipelineError::WeightIntegrity(_) => "learning_integrity",
            PipelineError::InvalidData(_) => "invalid_data",
            PipelineError::Store(_) => "store",
        }
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        PipelineError::Store(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
