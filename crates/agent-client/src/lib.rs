//! Uniform request/response contracts for the external scoring services
//! plus their HTTP clients.

pub mod arbitration;
pub mod error;
pub mod http;
pub mod prescreen;
pub mod social;
pub mod vision;

pub use arbitration::{
    ArbitrationCandidate, ArbitrationRequest, ArbitrationResponse, ArbitrationService, HttpArbitration,
    ProposedPick,
};
pub use error::{AgentError, AgentResult};
pub use http::{JsonTransport, ServiceEndpoint};
pub use prescreen::{HttpPrescreen, PrescreenCandidate, PrescreenEntry, PrescreenRequest, PrescreenResponse, PrescreenService};
pub use social::{HttpSocial, SocialRequest, SocialService};
pub use vision::{ChartImage, HttpVision, VisionRequest, VisionService};

use std::time::Duration;

/// Endpoints of every scoring service
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub prescreen: ServiceEndpoint,
    pub vision: ServiceEndpoint,
    pub social: ServiceEndpoint,
    pub arbitrator: ServiceEndpoint,
}

impl ServicesConfig {
    /// Read `PRESCREEN_URL`, `VISION_URL`, `SOCIAL_URL`, `ARBITRATOR_URL`,
    /// the shared `AGENT_API_KEY`, and per-service `*_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let api_key = std::env::var("AGENT_API_KEY").ok().filter(|k| !k.is_empty());
        let endpoint = |prefix: &str, default_url: &str, default_timeout: u64| ServiceEndpoint {
            base_url: std::env::var(format!("{}_URL", prefix)).unwrap_or_else(|_| default_url.to_string()),
            api_key: api_key.clone(),
            timeout: Duration::from_secs(
                std::env::var(format!("{}_TIMEOUT_SECS", prefix))
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_timeout),
            ),
        };

        Self {
            prescreen: endpoint("PRESCREEN", "http://localhost:8101", 180),
            vision: endpoint("VISION", "http://localhost:8102", 45),
            social: endpoint("SOCIAL", "http://localhost:8103", 30),
            arbitrator: endpoint("ARBITRATOR", "http://localhost:8104", 240),
        }
    }

    /// Probe `/health` on every service. Unreachable services report false.
    pub async fn health(&self) -> Vec<(&'static str, bool)> {
        let endpoints = [
            ("prescreen", &self.prescreen),
            ("vision", &self.vision),
            ("social", &self.social),
            ("arbitrator", &self.arbitrator),
        ];
        let mut report = Vec::with_capacity(endpoints.len());
        for (name, endpoint) in endpoints {
            let healthy = match JsonTransport::new(endpoint) {
                Ok(transport) => transport.health().await,
                Err(_) => false,
            };
            report.push((name, healthy));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_services_report_unhealthy() {
        let down = ServiceEndpoint::new("http://127.0.0.1:1", Duration::from_millis(500));
        let config = ServicesConfig {
            prescreen: down.clone(),
            vision: down.clone(),
            social: down.clone(),
            arbitrator: down,
        };
        let report = config.health().await;
        let names: Vec<&str> = report.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["prescreen", "vision", "social", "arbitrator"]);
        assert!(report.iter().all(|(_, healthy)| !healthy));
    }
}
