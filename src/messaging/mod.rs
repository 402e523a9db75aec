//! Outbound sinks
//!
//! Two HTTP collaborators: the notification channel that receives alerts and
//! digests, and the downstream ingestion API that receives new insights.
//! Callers treat every failure here as soft.

pub mod ingest;
pub mod notify;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Insight;

pub use ingest::HttpInsightSink;
pub use notify::HttpNotifier;

/// Notification channel accepting plain text messages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text`; `Ok(false)` means the sink answered but refused it
    async fn send(&self, text: &str) -> Result<bool>;
}

/// Body posted to the ingestion sink
#[derive(Debug, Clone, Serialize)]
pub struct IngestRequest<'a> {
    pub source: &'a str,
    pub concept: &'a str,
    pub context: &'a str,
    pub confidence: f64,
    pub metadata: &'a serde_json::Value,
}

impl<'a> From<&'a Insight> for IngestRequest<'a> {
    fn from(insight: &'a Insight) -> Self {
        Self {
            source: insight.source.as_str(),
            concept: &insight.concept,
            context: &insight.context,
            confidence: insight.confidence,
            metadata: &insight.metadata,
        }
    }
}

/// Ingestion sink acknowledgement
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestReceipt {
    pub id: serde_json::Value,
    pub concept: String,
}

/// Downstream consumer of newly stored insights
#[async_trait]
pub trait InsightSink: Send + Sync {
    async fn forward(&self, insight: &Insight) -> Result<IngestReceipt>;
}
