//! Vision and social fan-out over the shortlist.
//!
//! Each service gets its own semaphore so at most `concurrency` calls are in
//! flight per provider. Results land in per-symbol slots and are merged back
//! by symbol once every task has finished, whatever order they finished in.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agent_client::social::check_signal;
use agent_client::{ChartImage, SocialRequest, SocialService, VisionRequest, VisionService};
use chart_renderer::{ChartArtifact, RenderError};
use chrono::NaiveDate;
use dashmap::DashMap;
use pick_core::{Enrichment, ShortlistCandidate, SocialSignal, VisionFlags};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::PipelineConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub vision_available: usize,
    pub vision_unavailable: usize,
    pub social_available: usize,
    pub social_unavailable: usize,
    /// Slots already filled by an earlier attempt of the same day
    pub reused: usize,
}

pub struct EnrichmentStage {
    vision: Arc<dyn VisionService>,
    social: Arc<dyn SocialService>,
    concurrency: usize,
    vision_timeout: Duration,
    social_timeout: Duration,
}

impl EnrichmentStage {
    pub fn new(vision: Arc<dyn VisionService>, social: Arc<dyn SocialService>, config: &PipelineConfig) -> Self {
        Self {
            vision,
            social,
            concurrency: config.enrichment_concurrency.max(1),
            vision_timeout: config.vision_timeout,
            social_timeout: config.social_timeout,
        }
    }

    /// Fill every pending vision/social slot. Never fails: a failed, timed-out
    /// or unrenderable item is recorded as `Unavailable` and its siblings carry on.
    pub async fn run(
        &self,
        trade_date: NaiveDate,
        candidates: Vec<ShortlistCandidate>,
        mut charts: BTreeMap<String, Result<ChartArtifact, RenderError>>,
    ) -> (Vec<ShortlistCandidate>, EnrichmentReport) {
        let vision_slots: Arc<DashMap<String, Enrichment<VisionFlags>>> = Arc::new(DashMap::new());
        let social_slots: Arc<DashMap<String, Enrichment<SocialSignal>>> = Arc::new(DashMap::new());
        let vision_permits = Arc::new(Semaphore::new(self.concurrency));
        let social_permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut report = EnrichmentReport::default();

        for candidate in &candidates {
            let symbol = candidate.symbol.clone();

            if candidate.vision.is_pending() {
                match charts.remove(&symbol) {
                    Some(Ok(chart)) => {
                        let request = VisionRequest {
                            trade_date,
                            symbol: symbol.clone(),
                            chart: ChartImage::from_rgb(chart.width, chart.height, &chart.pixels, chart.sha256),
                        };
                        let service = Arc::clone(&self.vision);
                        let slots = Arc::clone(&vision_slots);
                        let permits = Arc::clone(&vision_permits);
                        let timeout = self.vision_timeout;
                        tasks.spawn(async move {
                            let Ok(_permit) = permits.acquire().await else {
                                slots.insert(request.symbol.clone(), Enrichment::Unavailable("worker pool closed".into()));
                                return;
                            };
                            let slot = match tokio::time::timeout(timeout, service.detect_patterns(&request)).await {
                                Ok(Ok(flags)) => Enrichment::Available(flags),
                                Ok(Err(e)) => {
                                    warn!("Vision failed for {}: {}", request.symbol, e);
                                    Enrichment::Unavailable(e.to_string())
                                }
                                Err(_) => {
                                    warn!("Vision timed out for {} after {:?}", request.symbol, timeout);
                                    Enrichment::Unavailable(format!("timed out after {}s", timeout.as_secs()))
                                }
                            };
                            slots.insert(request.symbol.clone(), slot);
                        });
                    }
                    Some(Err(e)) => {
                        debug!("No chart for {}: {}", symbol, e);
                        vision_slots.insert(symbol.clone(), Enrichment::Unavailable(format!("chart render failed: {}", e)));
                    }
                    None => {
                        vision_slots.insert(symbol.clone(), Enrichment::Unavailable("no chart rendered".into()));
                    }
                }
            } else {
                report.reused += 1;
            }

            if candidate.social.is_pending() {
                let request = SocialRequest {
                    trade_date,
                    symbol: symbol.clone(),
                    sector: candidate.sector.clone(),
                };
                let service = Arc::clone(&self.social);
                let slots = Arc::clone(&social_slots);
                let permits = Arc::clone(&social_permits);
                let timeout = self.social_timeout;
                tasks.spawn(async move {
                    let Ok(_permit) = permits.acquire().await else {
                        slots.insert(request.symbol.clone(), Enrichment::Unavailable("worker pool closed".into()));
                        return;
                    };
                    let slot = match tokio::time::timeout(timeout, service.score(&request)).await {
                        Ok(Ok(signal)) => match check_signal(signal) {
                            Ok(signal) => Enrichment::Available(signal),
                            Err(e) => Enrichment::Unavailable(e.to_string()),
                        },
                        Ok(Err(e)) => {
                            warn!("Social failed for {}: {}", request.symbol, e);
                            Enrichment::Unavailable(e.to_string())
                        }
                        Err(_) => {
                            warn!("Social timed out for {} after {:?}", request.symbol, timeout);
                            Enrichment::Unavailable(format!("timed out after {}s", timeout.as_secs()))
                        }
                    };
                    slots.insert(request.symbol.clone(), slot);
                });
            } else {
                report.reused += 1;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Enrichment task aborted: {}", e);
            }
        }

        let enriched: Vec<ShortlistCandidate> = candidates
            .into_iter()
            .map(|mut c| {
                if c.vision.is_pending() {
                    c.vision = vision_slots
                        .remove(&c.symbol)
                        .map(|(_, slot)| slot)
                        .unwrap_or_else(|| Enrichment::Unavailable("enrichment task aborted".into()));
                }
                if c.social.is_pending() {
                    c.social = social_slots
                        .remove(&c.symbol)
                        .map(|(_, slot)| slot)
                        .unwrap_or_else(|| Enrichment::Unavailable("enrichment task aborted".into()));
                }
                c
            })
            .collect();

        for c in &enriched {
            if c.vision.available().is_some() {
                report.vision_available += 1;
            } else {
                report.vision_unavailable += 1;
            }
            if c.social.available().is_some() {
                report.social_available += 1;
            } else {
                report.social_unavailable += 1;
            }
        }

        (enriched, report)
    }
}
