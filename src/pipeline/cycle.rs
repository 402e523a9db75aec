//! Short detection cycle
//!
//! Scan the last hour, synthesize, store what is new, forward and alert.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

use super::{format_duration, InsightPipeline};
use crate::dedup::StoreOutcome;
use crate::detection::Snapshot;
use crate::store::Window;
use crate::synthesis::{synthesize_aggregate_at, synthesize_at};
use crate::types::{Insight, InsightSource};

/// Summary printed by `insight-miner detect`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub success: bool,
    pub event_count: usize,
    pub note_count: usize,
    pub learning_count: usize,
    pub pattern_count: usize,
    /// Insights synthesized this cycle, aggregate included
    pub insight_count: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Patterns skipped by the in-process dedup set
    pub skipped: usize,
    pub forwarded: usize,
    pub alerted: usize,
    pub duration: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl InsightPipeline {
    pub async fn run_detection_cycle(&self) -> CycleReport {
        self.run_detection_cycle_at(Utc::now()).await
    }

    /// One short cycle as of `now`. Never fails as a whole: fetch errors
    /// mark the report unsuccessful, per-insight failures are counted.
    pub async fn run_detection_cycle_at(&self, now: DateTime<Utc>) -> CycleReport {
        let started = Instant::now();
        let window = Window::ending_at(now, self.settings.short_window, self.settings.row_limit);
        let fetched = self.fetch_window(window).await;

        let snapshot = Snapshot {
            events: &fetched.events,
            notes: &fetched.notes,
            learnings: &fetched.learnings,
        };
        let patterns = self.bank.detect(&snapshot);

        let mut report = CycleReport {
            event_count: fetched.events.len(),
            note_count: fetched.notes.len(),
            learning_count: fetched.learnings.len(),
            pattern_count: patterns.len(),
            errors: fetched.errors,
            ..Default::default()
        };

        // Candidate insights keyed by what goes into the in-process set
        let mut candidates: Vec<(String, Insight)> = Vec::with_capacity(patterns.len() + 1);
        {
            let mut dedup = self.dedup.lock().await;
            dedup.prune(now);
            for pattern in &patterns {
                let key = pattern.dedup_key();
                if dedup.seen_recently(&key, now) {
                    debug!(key = %key, "pattern already emitted");
                    report.skipped += 1;
                    continue;
                }
                candidates.push((key, synthesize_at(pattern, now).with_source(InsightSource::Pattern)));
            }
        }
        if let Some(aggregate) = synthesize_aggregate_at(&patterns, now) {
            candidates.push((aggregate.concept.clone(), aggregate));
        }
        report.insight_count = candidates.len();

        for (key, insight) in &candidates {
            let outcome = self.store_insight(insight, now).await;
            match outcome {
                StoreOutcome::Stored(_) => report.stored += 1,
                StoreOutcome::Duplicate => report.duplicates += 1,
                StoreOutcome::Failed => {
                    report.failed += 1;
                    continue;
                }
            }
            self.dedup.lock().await.mark(key, now);

            if !outcome.stored() {
                continue;
            }
            if self.forward(insight).await {
                report.forwarded += 1;
            }
            if self.alerts.dispatch(insight).await {
                report.alerted += 1;
            }
        }

        report.success = report.errors.is_empty();
        report.duration = format_duration(started.elapsed());
        info!(
            events = report.event_count,
            patterns = report.pattern_count,
            stored = report.stored,
            duplicates = report.duplicates,
            alerted = report.alerted,
            duration = %report.duration,
            "detection cycle complete"
        );
        report
    }
}
