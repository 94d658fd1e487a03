use async_trait::async_trait;
use chrono::NaiveDate;
use pick_core::{FeatureSnapshot, FeatureWeights};
use serde::{Deserialize, Serialize};

use crate::error::AgentResult;
use crate::http::{JsonTransport, ServiceEndpoint};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescreenCandidate {
    pub symbol: String,
    pub sector: Option<String>,
    pub features: FeatureSnapshot,
    /// Weighted percentile score computed locally from the feature weights
    pub local_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescreenRequest {
    pub trade_date: NaiveDate,
    /// Exact number of entries the service must return
    pub shortlist_size: usize,
    pub candidates: Vec<PrescreenCandidate>,
    pub feature_weights: FeatureWeights,
    pub guidance: Option<String>,
}

/// One ranked entry as the service reports it; validated by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescreenEntry {
    pub symbol: String,
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
    /// "long"/"short" (or bullish/bearish)
    pub bias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescreenResponse {
    pub entries: Vec<PrescreenEntry>,
}

/// Single generative ranking call: active set in, exactly N ranked entries out
#[async_trait]
pub trait PrescreenService: Send + Sync {
    async fn prescreen(&self, request: &PrescreenRequest) -> AgentResult<PrescreenResponse>;

    fn model_name(&self) -> &str;
}

pub struct HttpPrescreen {
    transport: JsonTransport,
    model: String,
}

impl HttpPrescreen {
    pub fn new(endpoint: &ServiceEndpoint, model: impl Into<String>) -> AgentResult<Self> {
        Ok(Self {
            transport: JsonTransport::new(endpoint)?,
            model: model.into(),
        })
    }
}

#[derive(Serialize)]
struct ModelRequest<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a PrescreenRequest,
}

#[async_trait]
impl PrescreenService for HttpPrescreen {
    async fn prescreen(&self, request: &PrescreenRequest) -> AgentResult<PrescreenResponse> {
        let body = ModelRequest {
            model: &self.model,
            request,
        };
        self.transport.post("/prescreen", &body).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
