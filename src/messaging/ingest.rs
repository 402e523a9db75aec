//! HTTP ingestion sink

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{IngestReceipt, IngestRequest, InsightSink};
use crate::config::IngestConfig;
use crate::error::{PipelineError, Result};
use crate::types::Insight;

/// Posts `{source, concept, context, confidence, metadata}` and expects
/// `{id, concept}` back
#[derive(Debug, Clone)]
pub struct HttpInsightSink {
    url: String,
    http_client: reqwest::Client,
}

impl HttpInsightSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            http_client,
        })
    }

    /// `None` when no ingestion endpoint is configured
    pub fn from_config(config: &IngestConfig) -> Result<Option<Self>> {
        config
            .url
            .as_ref()
            .map(|url| Self::new(url.clone(), Duration::from_secs(config.timeout_secs)))
            .transpose()
    }
}

#[async_trait]
impl InsightSink for HttpInsightSink {
    async fn forward(&self, insight: &Insight) -> Result<IngestReceipt> {
        debug!(concept = %insight.concept, "forwarding insight");

        let receipt = self.http_client
            .post(&self.url)
            .json(&IngestRequest::from(insight))
            .send()
            .await?
            .error_for_status()?
            .json::<IngestReceipt>()
            .await?;

        Ok(receipt)
    }
}
