//! Remote scoring client for model-based metrics
//!
//! COMET and BERTScore are heavyweight model scorers; the harness treats
//! them as a black-box HTTP service. When no service is configured the
//! metrics report NaN (not computable).

use lexmt_common::types::LanguagePair;
use lexmt_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metric names understood by the scoring service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMetric {
    Comet,
    BertScore,
}

impl RemoteMetric {
    fn wire_name(&self) -> &'static str {
        match self {
            RemoteMetric::Comet => "comet",
            RemoteMetric::BertScore => "bertscore",
        }
    }
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    metric: &'static str,
    source: &'a str,
    prediction: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<&'a str>,
    pair: String,
}

#[derive(Deserialize)]
struct ScoreResponse {
    score: f64,
}

/// HTTP client for the external scoring service
pub struct ScoringClient {
    http: reqwest::Client,
    base_url: String,
}

impl ScoringClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Internal(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn score(
        &self,
        metric: RemoteMetric,
        source: &str,
        prediction: &str,
        reference: Option<&str>,
        pair: LanguagePair,
    ) -> Result<f64> {
        let body = ScoreRequest {
            metric: metric.wire_name(),
            source,
            prediction,
            reference,
            pair: pair.to_string(),
        };

        let response = self
            .http
            .post(format!("{}/score", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("scoring request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamUnavailable(format!(
                "scoring service returned {status}: {text}"
            )));
        }

        let parsed: ScoreResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("scoring response parse: {e}")))?;
        Ok(parsed.score)
    }
}
