//! Alert Dispatcher
//!
//! Confidence-gated, best-effort forwarding of single insights to the
//! notification channel. Nothing here ever returns an error to the caller.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::messaging::Notifier;
use crate::types::Insight;

/// Default gate: only insights strictly above this are sent
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.7;

pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    threshold: f64,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, threshold: f64) -> Self {
        Self { notifier, threshold }
    }

    /// Whether this insight clears the confidence gate
    pub fn should_alert(&self, insight: &Insight) -> bool {
        insight.confidence > self.threshold
    }

    /// Send an alert for `insight`. Returns true only when the sink accepted it.
    pub async fn dispatch(&self, insight: &Insight) -> bool {
        if !self.should_alert(insight) {
            debug!(concept = %insight.concept, confidence = insight.confidence, "below alert threshold");
            return false;
        }

        match self.notifier.send(&format_alert(insight)).await {
            Ok(true) => {
                info!(concept = %insight.concept, "alert sent");
                true
            }
            Ok(false) => {
                warn!(concept = %insight.concept, "alert rejected by notification sink");
                false
            }
            Err(e) => {
                warn!(concept = %insight.concept, error = %e, "alert delivery failed");
                false
            }
        }
    }
}

/// Alert text with a suggested follow-up
pub fn format_alert(insight: &Insight) -> String {
    format!(
        "🔍 Pattern Detected\n\n\
         Learning Opportunity: {}\n\n\
         Context: {}\n\n\
         Confidence: {}%\n\n\
         /learn \"{}\" - Add to your learnings",
        insight.concept,
        insight.context,
        insight.confidence_percent(),
        insight.concept
    )
}
