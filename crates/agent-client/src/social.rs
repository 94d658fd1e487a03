use async_trait::async_trait;
use chrono::NaiveDate;
use pick_core::SocialSignal;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};
use crate::http::{JsonTransport, ServiceEndpoint};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialRequest {
    pub trade_date: NaiveDate,
    pub symbol: String,
    pub sector: Option<String>,
}

/// Per-symbol sentiment plus headline and event context
#[async_trait]
pub trait SocialService: Send + Sync {
    async fn score(&self, request: &SocialRequest) -> AgentResult<SocialSignal>;

    fn model_name(&self) -> &str;
}

/// Reject scores outside [-1, 1] instead of clamping them.
pub fn check_signal(signal: SocialSignal) -> AgentResult<SocialSignal> {
    if !signal.sentiment.is_finite() || signal.sentiment.abs() > 1.0 {
        return Err(AgentError::InvalidResponse(format!(
            "sentiment {} outside [-1, 1]",
            signal.sentiment
        )));
    }
    Ok(signal)
}

pub struct HttpSocial {
    transport: JsonTransport,
    model: String,
}

impl HttpSocial {
    pub fn new(endpoint: &ServiceEndpoint, model: impl Into<String>) -> AgentResult<Self> {
        Ok(Self {
            transport: JsonTransport::new(endpoint)?,
            model: model.into(),
        })
    }
}

#[async_trait]
impl SocialService for HttpSocial {
    async fn score(&self, request: &SocialRequest) -> AgentResult<SocialSignal> {
        let body = serde_json::json!({
            "model": self.model,
            "trade_date": request.trade_date,
            "symbol": request.symbol,
            "sector": request.sector,
        });
        let signal: SocialSignal = self.transport.post("/sentiment", &body).await?;
        check_signal(signal)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_sentiment_is_invalid() {
        let bad = SocialSignal {
            sentiment: 1.7,
            ..Default::default()
        };
        assert!(matches!(check_signal(bad), Err(AgentError::InvalidResponse(_))));

        let ok = SocialSignal {
            sentiment: -0.4,
            ..Default::default()
        };
        assert!(check_signal(ok).is_ok());
    }
}
