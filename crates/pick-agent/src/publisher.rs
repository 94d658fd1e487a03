use async_trait::async_trait;
use chrono::NaiveDate;
use pick_core::{PickBatch, PipelineError, PipelineResult, Publisher, RunStatus};
use reqwest::Client;
use serde_json::{json, Value};

/// Pushes each day's batch (or the reason there is none) to a webhook as JSON.
pub struct WebhookPublisher {
    client: Client,
    webhook_url: String,
}

impl WebhookPublisher {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
        }
    }

    async fn post(&self, payload: &Value) -> PipelineResult<()> {
        if self.webhook_url.is_empty() {
            tracing::info!("Publisher webhook not configured, skipping push");
            return Ok(());
        }

        let unavailable = |reason: String| PipelineError::ServiceUnavailable {
            service: "publisher".to_string(),
            reason,
        };
        self.client
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| unavailable(e.to_string()))?;

        tracing::debug!("Webhook push delivered");
        Ok(())
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, batch: &PickBatch) -> PipelineResult<()> {
        self.post(&batch_payload(batch)).await
    }

    async fn publish_status(&self, trade_date: NaiveDate, status: &RunStatus) -> PipelineResult<()> {
        self.post(&status_payload(trade_date, status)).await
    }
}

/// Picks keyed by trade day, plus a readable summary in `content`.
pub fn batch_payload(batch: &PickBatch) -> Value {
    let mut content = format!(
        "**Picks for {}** ({} strategy, {} picks)\n",
        batch.trade_date,
        batch.strategy,
        batch.picks.len()
    );
    for pick in &batch.picks {
        content.push_str(&format!(
            "{} **{}** @ ${:.2} | targets ${:.2} / ${:.2} / ${:.2} | stop ${:.2} | confidence {:.0}%\n",
            pick.direction.as_str().to_ascii_uppercase(),
            pick.symbol,
            pick.entry_price,
            pick.targets.low,
            pick.targets.medium,
            pick.targets.high,
            pick.stop,
            pick.confidence * 100.0
        ));
    }

    json!({
        "kind": "picks",
        "trade_date": batch.trade_date,
        "strategy": batch.strategy,
        "published_at": batch.published_at,
        "picks": batch.picks,
        "content": content,
    })
}

/// A day without published picks, saying which of the three reasons applies.
pub fn status_payload(trade_date: NaiveDate, status: &RunStatus) -> Value {
    let content = match status {
        RunStatus::Halted { reason } => format!("**No picks for {}**: market halt ({})", trade_date, reason),
        RunStatus::NoQualifyingPicks => format!(
            "**No picks for {}**: the full pipeline ran and nothing cleared the bar",
            trade_date
        ),
        RunStatus::Failed { stage, message, .. } => {
            format!("**No picks for {}**: run failed at {} ({})", trade_date, stage, message)
        }
        RunStatus::Published { picks } => format!("**{} picks published for {}**", picks, trade_date),
        RunStatus::Skipped => format!("**No picks for {}**: pipeline disabled", trade_date),
    };

    json!({
        "kind": "status",
        "trade_date": trade_date,
        "status": status,
        "content": content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pick_core::{Direction, Pick, PriceTargets, Stage};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 4).unwrap()
    }

    #[test]
    fn batch_is_keyed_by_day() {
        let batch = PickBatch {
            trade_date: date(),
            strategy: "momentum".to_string(),
            picks: vec![Pick {
                trade_date: date(),
                symbol: "NVDA".to_string(),
                direction: Direction::Short,
                entry_price: 100.0,
                confidence: 0.72,
                targets: PriceTargets::from_percentages(Direction::Short, 100.0, [3.0, 6.0, 10.0]),
                stop: 104.0,
                rationale: "bear flag".to_string(),
                strategy: "momentum".to_string(),
                model: "m".to_string(),
            }],
            published_at: Utc::now(),
        };
        let payload = batch_payload(&batch);
        assert_eq!(payload["kind"], "picks");
        assert_eq!(payload["trade_date"], "2024-06-04");
        assert_eq!(payload["picks"].as_array().unwrap().len(), 1);
        assert!(payload["content"].as_str().unwrap().contains("SHORT **NVDA**"));
    }

    #[test]
    fn empty_days_stay_distinguishable() {
        let halted = status_payload(date(), &RunStatus::Halted { reason: "VIX 40.0 > 35.0".into() });
        let empty = status_payload(date(), &RunStatus::NoQualifyingPicks);
        let failed = status_payload(
            date(),
            &RunStatus::Failed {
                stage: Stage::Prescreen,
                kind: "cardinality".into(),
                message: "short".into(),
            },
        );
        assert_eq!(halted["status"]["status"], "halted");
        assert_eq!(empty["status"]["status"], "no_qualifying_picks");
        assert_eq!(failed["status"]["status"], "failed");
        assert_eq!(failed["status"]["stage"], "prescreen");
        assert_ne!(halted["content"], empty["content"]);
    }

    #[tokio::test]
    async fn unset_webhook_skips() {
        let publisher = WebhookPublisher::new(String::new());
        assert!(publisher.publish_status(date(), &RunStatus::NoQualifyingPicks).await.is_ok());
    }
}
