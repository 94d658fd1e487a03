use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use pick_core::{Enrichment, FeatureSnapshot, PriceTargets, SetupStats, SocialSignal, VisionFlags};
use serde::{Deserialize, Serialize};

use crate::error::AgentResult;
use crate::http::{JsonTransport, ServiceEndpoint};

/// One enriched shortlist row as the arbitrator sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationCandidate {
    pub symbol: String,
    pub sector: Option<String>,
    pub bias: String,
    pub prescreen_score: f64,
    pub features: FeatureSnapshot,
    pub vision: Enrichment<VisionFlags>,
    pub social: Enrichment<SocialSignal>,
    /// Realised stats for structurally similar past setups, both directions
    pub similar_setups: Vec<SetupStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationRequest {
    pub trade_date: NaiveDate,
    pub strategy: String,
    pub min_picks: usize,
    pub max_picks: usize,
    pub candidates: Vec<ArbitrationCandidate>,
    pub agent_trust: BTreeMap<String, f64>,
    pub guidance: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedPick {
    pub symbol: String,
    pub direction: String,
    pub entry_price: f64,
    pub targets: PriceTargets,
    pub stop: f64,
    /// The model's own conviction in [0, 1]
    pub conviction: f64,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationResponse {
    pub proposals: Vec<ProposedPick>,
}

/// Backing service of one named arbitration strategy
#[async_trait]
pub trait ArbitrationService: Send + Sync {
    async fn arbitrate(&self, request: &ArbitrationRequest) -> AgentResult<ArbitrationResponse>;

    fn model_name(&self) -> &str;
}

pub struct HttpArbitration {
    transport: JsonTransport,
    model: String,
}

impl HttpArbitration {
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
    request: &'a ArbitrationRequest,
}

#[async_trait]
impl ArbitrationService for HttpArbitration {
    async fn arbitrate(&self, request: &ArbitrationRequest) -> AgentResult<ArbitrationResponse> {
        let body = ModelRequest {
            model: &self.model,
            request,
        };
        self.transport.post("/arbitrate", &body).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
