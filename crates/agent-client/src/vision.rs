use async_trait::async_trait;
use base64::Engine;
use chrono::NaiveDate;
use pick_core::VisionFlags;
use serde::{Deserialize, Serialize};

use crate::error::AgentResult;
use crate::http::{JsonTransport, ServiceEndpoint};

/// Raw chart pixels shipped to the vision service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartImage {
    pub width: u32,
    pub height: u32,
    /// Always "rgb8"
    pub format: String,
    pub data_base64: String,
    pub sha256: String,
}

impl ChartImage {
    pub fn from_rgb(width: u32, height: u32, rgb: &[u8], sha256: String) -> Self {
        Self {
            width,
            height,
            format: "rgb8".to_string(),
            data_base64: base64::engine::general_purpose::STANDARD.encode(rgb),
            sha256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionRequest {
    pub trade_date: NaiveDate,
    pub symbol: String,
    pub chart: ChartImage,
}

#[derive(Debug, Clone, Deserialize)]
struct VisionResponse {
    flags: VisionFlags,
}

/// Per-symbol chart pattern detection
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn detect_patterns(&self, request: &VisionRequest) -> AgentResult<VisionFlags>;

    fn model_name(&self) -> &str;
}

pub struct HttpVision {
    transport: JsonTransport,
    model: String,
}

impl HttpVision {
    pub fn new(endpoint: &ServiceEndpoint, model: impl Into<String>) -> AgentResult<Self> {
        Ok(Self {
            transport: JsonTransport::new(endpoint)?,
            model: model.into(),
        })
    }
}

#[async_trait]
impl VisionService for HttpVision {
    async fn detect_patterns(&self, request: &VisionRequest) -> AgentResult<VisionFlags> {
        let body = serde_json::json!({
            "model": self.model,
            "trade_date": request.trade_date,
            "symbol": request.symbol,
            "chart": request.chart,
        });
        let response: VisionResponse = self.transport.post("/patterns", &body).await?;
        Ok(response.flags)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
