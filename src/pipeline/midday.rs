//! Midday summary
//!
//! Lighter report of the activity since midnight. Sent only when a chat is
//! explicitly configured.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use super::{format_duration, start_of_day, InsightPipeline};

/// Sources listed in the message
const TOP_SOURCES: usize = 5;

/// Summary printed by `insight-miner midday`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddayReport {
    pub success: bool,
    pub total_events: u64,
    pub total_learnings: u64,
    pub sent: bool,
    pub duration: String,
}

impl InsightPipeline {
    pub async fn run_midday_summary(&self) -> Result<MiddayReport> {
        self.run_midday_summary_at(Utc::now()).await
    }

    /// Fails only when the counts cannot be read; sending is best-effort
    pub async fn run_midday_summary_at(&self, now: DateTime<Utc>) -> Result<MiddayReport> {
        let started = Instant::now();
        let since = start_of_day(now);

        let (events, learnings) = tokio::join!(
            self.events.source_type_counts(since),
            self.events.learning_source_counts(since),
        );
        let events = events.context("Failed to count today's events")?;
        let learnings = learnings.context("Failed to count today's learnings")?;

        let total_events = events.iter().map(|(_, _, n)| n).sum();
        let total_learnings = learnings.iter().map(|(_, n)| n).sum();

        let mut sent = false;
        if self.settings.send_midday {
            let message = format_midday(total_events, total_learnings, &events, &learnings);
            match self.notifier.send(&message).await {
                Ok(true) => sent = true,
                Ok(false) => warn!("midday summary rejected by notification sink"),
                Err(e) => warn!(error = %e, "failed to send midday summary"),
            }
        }

        let report = MiddayReport {
            success: true,
            total_events,
            total_learnings,
            sent,
            duration: format_duration(started.elapsed()),
        };
        info!(
            events = report.total_events,
            learnings = report.total_learnings,
            sent = report.sent,
            duration = %report.duration,
            "midday summary complete"
        );
        Ok(report)
    }
}

pub fn format_midday(
    total_events: u64,
    total_learnings: u64,
    events: &[(String, String, u64)],
    learnings: &[(String, u64)],
) -> String {
    let sources = events
        .iter()
        .take(TOP_SOURCES)
        .map(|(source, event_type, n)| format!("- {}: {} {} events", source, n, event_type))
        .collect::<Vec<_>>()
        .join("\n");
    let learning_sources = learnings
        .iter()
        .map(|(source, n)| format!("- {}: {} learnings", source, n))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "☀️ **Midday Summary**\n\n\
         **Morning Activity:**\n\
         - Total Events: {}\n\
         - Total Learnings: {}\n\n\
         **Top Sources:**\n{}\n\n\
         **Learning Sources:**\n{}\n\n\
         *More details in the evening digest*",
        total_events, total_learnings, sources, learning_sources
    )
}
