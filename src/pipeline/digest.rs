//! Daily digest
//!
//! Re-runs detection over the last 24 hours, stores new insights, upserts
//! the day's metrics row and sends one summary message. A window that could
//! not be read aborts the run before anything is written, so a failed re-run
//! never overwrites the day's metrics. Later steps log and continue. Errors
//! are written back to the event log as a `pipeline_error` row and the run
//! is reported as failed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{error, info, warn};

use super::{format_duration, start_of_day, InsightPipeline};
use crate::dedup::StoreOutcome;
use crate::detection::Snapshot;
use crate::store::{AuditRecord, Window};
use crate::synthesis::synthesize_all;
use crate::types::{ConceptSummary, DailyMetrics, Event, Insight, Learning, PIPELINE_ERROR_EVENT};

/// Source recorded on `pipeline_error` rows written by this job
const ERROR_SOURCE: &str = "daily_digest";

/// Summary printed by `insight-miner digest`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestReport {
    pub success: bool,
    pub event_count: usize,
    pub learning_count: usize,
    pub pattern_count: usize,
    pub insight_count: usize,
    pub stored: usize,
    pub digest_sent: bool,
    pub duration: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl InsightPipeline {
    pub async fn run_daily_digest(&self) -> DigestReport {
        self.run_daily_digest_at(Utc::now()).await
    }

    pub async fn run_daily_digest_at(&self, now: DateTime<Utc>) -> DigestReport {
        let started = Instant::now();
        info!("starting daily digest");

        let window = Window::ending_at(now, self.settings.digest_window, self.settings.row_limit);
        let fetched = self.fetch_window(window).await;
        if !fetched.errors.is_empty() {
            error!(errors = fetched.errors.len(), "window fetch failed, digest aborted");
            let report = DigestReport {
                success: false,
                duration: format_duration(started.elapsed()),
                errors: fetched.errors,
                ..DigestReport::default()
            };
            return self.finish(report, now).await;
        }
        let mut errors = Vec::new();

        let patterns = self.bank.detect(&Snapshot {
            events: &fetched.events,
            notes: &fetched.notes,
            learnings: &fetched.learnings,
        });
        let insights = synthesize_all(&patterns, now);

        let mut stored = 0;
        for insight in &insights {
            match self.store_insight(insight, now).await {
                StoreOutcome::Stored(_) => stored += 1,
                StoreOutcome::Duplicate => {}
                StoreOutcome::Failed => errors.push(format!("store insight: {}", insight.concept)),
            }
        }

        let metrics = DailyMetrics {
            date: now.date_naive(),
            total_events: fetched.events.len() as u64,
            total_learnings: fetched.learnings.len() as u64,
            total_insights: insights.len() as u64,
            unique_sources: unique_sources(&fetched.events),
            top_concepts: top_concepts(&fetched.learnings, self.settings.top_concepts),
        };
        match self.store.upsert_daily_metrics(&metrics, now).await {
            Ok(()) => info!(
                date = %metrics.date,
                events = metrics.total_events,
                learnings = metrics.total_learnings,
                insights = metrics.total_insights,
                "daily metrics stored"
            ),
            Err(e) => {
                error!(date = %metrics.date, error = %e, "failed to store daily metrics");
                errors.push(format!("store daily metrics: {}", e));
            }
        }

        let digest_sent = self.send_digest(now).await;

        let report = DigestReport {
            success: errors.is_empty(),
            event_count: fetched.events.len(),
            learning_count: fetched.learnings.len(),
            pattern_count: patterns.len(),
            insight_count: insights.len(),
            stored,
            digest_sent,
            duration: format_duration(started.elapsed()),
            errors,
        };
        self.finish(report, now).await
    }

    async fn finish(&self, report: DigestReport, now: DateTime<Utc>) -> DigestReport {
        if !report.success {
            self.record_failure(&report.errors, now).await;
        }
        info!(
            success = report.success,
            stored = report.stored,
            digest_sent = report.digest_sent,
            duration = %report.duration,
            "daily digest complete"
        );
        report
    }

    /// Build and send today's digest. Skipped when no insight exists for
    /// the day. Returns whether the sink accepted the message.
    async fn send_digest(&self, now: DateTime<Utc>) -> bool {
        let today = start_of_day(now);

        let top = match self.store.top_insights(today, self.settings.top_insights).await {
            Ok(top) => top,
            Err(e) => {
                warn!(error = %e, "failed to load today's insights, digest not sent");
                return false;
            }
        };
        if top.is_empty() {
            info!("no insights today, digest skipped");
            return false;
        }

        let insight_count = match self.store.insight_count(today).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "failed to count today's insights");
                top.len() as u64
            }
        };
        let activity = match self.events.event_type_counts(today).await {
            Ok(counts) => format_activity(&counts),
            Err(e) => {
                warn!(error = %e, "failed to load activity summary");
                "Unable to fetch activity summary".to_string()
            }
        };
        let learning_count = match self.events.learning_count(today).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "failed to count today's learnings");
                0
            }
        };

        let message = format_digest(insight_count, &top, &activity, learning_count);
        match self.notifier.send(&message).await {
            Ok(true) => {
                info!(insights = insight_count, "digest sent");
                true
            }
            Ok(false) => {
                warn!("digest rejected by notification sink");
                false
            }
            Err(e) => {
                warn!(error = %e, "failed to send digest");
                false
            }
        }
    }

    async fn record_failure(&self, errors: &[String], now: DateTime<Utc>) {
        let record = AuditRecord {
            event_type: PIPELINE_ERROR_EVENT.to_string(),
            source: Some(ERROR_SOURCE.to_string()),
            content: Some(errors.join("; ")),
            payload: json!({ "errors": errors }),
            dedupe_key: None,
        };
        if let Err(e) = self.store.append_audit(&record, now).await {
            error!(error = %e, "failed to record pipeline error");
        }
    }
}

/// Distinct non-empty event sources
fn unique_sources(events: &[Event]) -> u64 {
    events
        .iter()
        .filter_map(|e| e.source.as_deref())
        .collect::<BTreeSet<_>>()
        .len() as u64
}

/// Distinct concepts, highest confidence first, newer first on ties
pub fn top_concepts(learnings: &[Learning], limit: usize) -> Vec<ConceptSummary> {
    let mut ranked: Vec<&Learning> = learnings.iter().collect();
    ranked.sort_by(|a, b| {
        let by_confidence = b
            .confidence
            .unwrap_or(0.0)
            .total_cmp(&a.confidence.unwrap_or(0.0));
        by_confidence.then(b.created_at.cmp(&a.created_at))
    });

    let mut seen: BTreeSet<&str> = BTreeSet::new();
    ranked
        .into_iter()
        .filter(|&l| seen.insert(l.concept.as_str()))
        .take(limit)
        .map(|l| ConceptSummary {
            concept: l.concept.clone(),
            confidence: l.confidence,
        })
        .collect()
}

fn format_activity(counts: &[(String, u64)]) -> String {
    if counts.is_empty() {
        return "- no events".to_string();
    }
    counts
        .iter()
        .map(|(event_type, count)| format!("- {}: {} events", event_type, count))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_digest(insight_count: u64, top: &[Insight], activity: &str, learning_count: u64) -> String {
    let top_list = top
        .iter()
        .enumerate()
        .map(|(i, insight)| {
            format!("{}. {} (conf: {}%)", i + 1, insight.concept, insight.confidence_percent())
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "📊 **Daily Insight Digest**\n\n\
         **Insights Generated:** {}\n\n\
         **Top Insights:**\n{}\n\n\
         **Activity Summary:**\n{}\n\n\
         **Total Learnings Today:** {}\n\n\
         Review these insights or add your own:\n\
         /learn \"concept\" \"context\"",
        insight_count, top_list, activity, learning_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InsightSource;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_top_concepts_ranking() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let learnings = vec![
            Learning::new("rust", "docs").with_confidence(0.6).at(now - Duration::hours(3)),
            Learning::new("tokio", "blog").with_confidence(0.9).at(now - Duration::hours(2)),
            Learning::new("rust", "book").with_confidence(0.6).at(now - Duration::hours(1)),
            Learning::new("serde", "docs").at(now),
        ];

        let top = top_concepts(&learnings, 10);
        let names: Vec<&str> = top.iter().map(|c| c.concept.as_str()).collect();
        assert_eq!(names, vec!["tokio", "rust", "serde"]);

        assert_eq!(top_concepts(&learnings, 1).len(), 1);
    }

    #[test]
    fn test_unique_sources_ignores_missing() {
        let events = vec![
            Event::new(Some("cli"), "cli_usage"),
            Event::new(Some("cli"), "cli_usage"),
            Event::new(Some("browser"), "visit"),
            Event::new(None, "heartbeat"),
        ];
        assert_eq!(unique_sources(&events), 2);
    }

    #[test]
    fn test_format_digest() {
        let insight = Insight {
            concept: "CLI proficiency: git (used 4x)".to_string(),
            context: String::new(),
            confidence: 0.9,
            source: InsightSource::Insight,
            pattern_type: "cli_mastery".to_string(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        };
        let text = format_digest(3, &[insight], "- cli_usage: 4 events", 2);

        assert!(text.contains("**Insights Generated:** 3"));
        assert!(text.contains("1. CLI proficiency: git (used 4x) (conf: 90%)"));
        assert!(text.contains("- cli_usage: 4 events"));
        assert!(text.contains("**Total Learnings Today:** 2"));
    }

    #[test]
    fn test_format_activity_empty() {
        assert_eq!(format_activity(&[]), "- no events");
    }
}
