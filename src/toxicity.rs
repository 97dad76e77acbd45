//! Comment toxicity scoring.
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use metrics::counter;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::{config::ToxicityConfig, metrics::TOXICITY_RATE_LIMITED};

/// Scores a piece of text in `[0, 1]`.
#[async_trait]
pub trait ToxicityScorer: Send + Sync {
    async fn score(&self, text: &str) -> Result<f64>;
}

/// Round to 4 decimal digits.
pub fn to_fixed(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    attribute_scores: AttributeScores,
}

#[derive(Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct AttributeScores {
    toxicity: AttributeScore,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeScore {
    summary_score: SummaryScore,
}

#[derive(Deserialize)]
struct SummaryScore {
    value: f64,
}

/// Perspective API `comments:analyze` client.
///
/// Rate-limited requests are retried forever after a fixed delay. Every other
/// failure is logged and scores 0.
pub struct PerspectiveClient {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    language: String,
    retry_delay: Duration,
}

impl PerspectiveClient {
    pub fn new(client: reqwest::Client, config: &ToxicityConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// One request. `Ok(None)` means rate-limited.
    async fn analyze(&self, text: &str) -> Result<Option<f64>> {
        let body = json!({
            "comment": { "text": text },
            "requestedAttributes": { "TOXICITY": {} },
            "languages": [self.language],
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .context("failed to send analyze request")?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Ok(None);
        }

        let response: AnalyzeResponse = response
            .error_for_status()
            .context("analyze request failed")?
            .json()
            .await
            .context("failed to parse analyze response")?;

        Ok(Some(to_fixed(
            response.attribute_scores.toxicity.summary_score.value,
        )))
    }
}

#[async_trait]
impl ToxicityScorer for PerspectiveClient {
    async fn score(&self, text: &str) -> Result<f64> {
        loop {
            match self.analyze(text).await {
                Ok(Some(score)) => return Ok(score),
                Ok(None) => {
                    debug!(delay = ?self.retry_delay, "rate limited, retrying");
                    counter!(TOXICITY_RATE_LIMITED).increment(1);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    warn!("toxicity scoring failed, scoring 0: {e:#}");
                    return Ok(0.0);
                }
            }
        }
    }
}
