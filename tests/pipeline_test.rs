//! Integration tests for the insight pipeline:
//! - Short detection cycle (scoring, alert gating, aggregate insight)
//! - Deduplication across cycles and restarts
//! - Daily digest (metrics idempotency, error trail)

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use insight_miner::dedup::{store_if_new, StoreOutcome};
use insight_miner::store::{AuditRecord, InsertOutcome, InsightStats};
use insight_miner::types::{DailyMetrics, INSIGHT_CREATED_EVENT, PIPELINE_ERROR_EVENT};
use insight_miner::{
    Event, EventSource, Insight, InsightPipeline, InsightSource, InsightStore, Learning, Note,
    Notifier, PipelineError, PipelineSettings, SqliteStore, Window,
};
use std::sync::{Arc, Mutex};

/// Notifier that keeps every message it is asked to send
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> insight_miner::Result<bool> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(true)
    }
}

/// Notifier whose transport always times out
struct TimingOutNotifier;

#[async_trait]
impl Notifier for TimingOutNotifier {
    async fn send(&self, _text: &str) -> insight_miner::Result<bool> {
        Err(PipelineError::transient("http timeout", "deadline elapsed"))
    }
}

/// Event source that is down
struct UnavailableEvents;

fn unavailable<T>() -> insight_miner::Result<T> {
    Err(PipelineError::transient("query events", "connection refused"))
}

#[async_trait]
impl EventSource for UnavailableEvents {
    async fn fetch_events(&self, _window: Window) -> insight_miner::Result<Vec<Event>> {
        unavailable()
    }
    async fn fetch_learnings(&self, _window: Window) -> insight_miner::Result<Vec<Learning>> {
        unavailable()
    }
    async fn fetch_notes(&self, _window: Window) -> insight_miner::Result<Vec<Note>> {
        unavailable()
    }
    async fn event_type_counts(&self, _since: DateTime<Utc>) -> insight_miner::Result<Vec<(String, u64)>> {
        unavailable()
    }
    async fn source_type_counts(
        &self,
        _since: DateTime<Utc>,
    ) -> insight_miner::Result<Vec<(String, String, u64)>> {
        unavailable()
    }
    async fn learning_source_counts(&self, _since: DateTime<Utc>) -> insight_miner::Result<Vec<(String, u64)>> {
        unavailable()
    }
    async fn learning_count(&self, _since: DateTime<Utc>) -> insight_miner::Result<u64> {
        unavailable()
    }
}

/// Insight store whose insert always fails but records audit writes
#[derive(Default)]
struct BrokenInsertStore {
    audits: Mutex<Vec<AuditRecord>>,
}

#[async_trait]
impl InsightStore for BrokenInsertStore {
    async fn insert_if_absent(&self, _insight: &Insight, _since: DateTime<Utc>) -> insight_miner::Result<InsertOutcome> {
        Err(PipelineError::transient("insert insight", "disk I/O error"))
    }
    async fn append_audit(&self, record: &AuditRecord, _at: DateTime<Utc>) -> insight_miner::Result<()> {
        self.audits.lock().unwrap().push(record.clone());
        Ok(())
    }
    async fn upsert_daily_metrics(&self, _metrics: &DailyMetrics, _at: DateTime<Utc>) -> insight_miner::Result<()> {
        Ok(())
    }
    async fn daily_metrics(&self, _date: chrono::NaiveDate) -> insight_miner::Result<Option<DailyMetrics>> {
        Ok(None)
    }
    async fn top_insights(&self, _since: DateTime<Utc>, _limit: usize) -> insight_miner::Result<Vec<Insight>> {
        Ok(Vec::new())
    }
    async fn insight_count(&self, _since: DateTime<Utc>) -> insight_miner::Result<u64> {
        Ok(0)
    }
    async fn insight_stats(&self, _since: DateTime<Utc>) -> insight_miner::Result<InsightStats> {
        Ok(InsightStats::default())
    }
}

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 30, 0).unwrap()
}

fn pipeline_over(store: &Arc<SqliteStore>, notifier: Arc<dyn Notifier>) -> InsightPipeline {
    InsightPipeline::new(store.clone(), store.clone(), notifier, PipelineSettings::default())
}

/// Three `curl` invocations, spread so no clock hour holds three events
async fn seed_curl(store: &SqliteStore, now: DateTime<Utc>) {
    for minutes in [10, 20, 40] {
        store
            .append_event(
                &Event::new(Some("cli"), "cli_usage")
                    .with_content("command: curl -s http://localhost:3000")
                    .at(now - Duration::minutes(minutes)),
            )
            .await
            .unwrap();
    }
}

/// Six browser events inside the last half hour
async fn seed_browser_burst(store: &SqliteStore, now: DateTime<Utc>) {
    for minutes in [3, 6, 9, 12, 15, 18] {
        store
            .append_event(
                &Event::new(Some("browser"), "page_visit")
                    .with_content("docs.rs")
                    .at(now - Duration::minutes(minutes)),
            )
            .await
            .unwrap();
    }
}

/// One concept learned from two sources
async fn seed_cross_source(store: &SqliteStore, now: DateTime<Utc>) {
    store
        .append_learning(&Learning::new("ownership", "docs").at(now - Duration::minutes(25)))
        .await
        .unwrap();
    store
        .append_learning(&Learning::new("ownership", "podcast").at(now - Duration::minutes(5)))
        .await
        .unwrap();
}

async fn stored_insights(store: &SqliteStore, now: DateTime<Utc>) -> Vec<Insight> {
    store.top_insights(now - Duration::days(1), 100).await.unwrap()
}

fn find<'a>(insights: &'a [Insight], concept: &str) -> &'a Insight {
    insights
        .iter()
        .find(|i| i.concept == concept)
        .unwrap_or_else(|| panic!("no insight named {:?}", concept))
}

// =====================================================================
// SHORT DETECTION CYCLE
// =====================================================================

#[tokio::test]
async fn test_cli_mastery_is_scored_and_alerted() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = fixed_now();
    seed_curl(&store, now).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = pipeline_over(&store, notifier.clone());

    let report = pipeline.run_detection_cycle_at(now).await;
    assert!(report.success);
    assert_eq!(report.stored, 1);

    let insights = stored_insights(&store, now).await;
    let insight = find(&insights, "CLI proficiency: curl (used 3x)");
    assert_eq!(insight.confidence, 0.85);
    assert_eq!(insight.source, InsightSource::Pattern);
    assert_eq!(insight.metadata["pattern_type"], "cli_mastery");
    assert_eq!(insight.metadata["source"], "multi");

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Confidence: 85%"));
}

#[tokio::test]
async fn test_cross_source_at_threshold_is_not_alerted() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = fixed_now();
    seed_cross_source(&store, now).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = pipeline_over(&store, notifier.clone());
    pipeline.run_detection_cycle_at(now).await;

    let insights = stored_insights(&store, now).await;
    let cross = find(&insights, "Multi-domain learning: ownership");
    assert_eq!(cross.confidence, 0.7);
    assert!(notifier
        .messages()
        .iter()
        .all(|m| !m.contains("Multi-domain learning: ownership")));
}

#[tokio::test]
async fn test_high_activity_confidence() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = fixed_now();
    seed_browser_burst(&store, now).await;

    let pipeline = pipeline_over(&store, Arc::new(RecordingNotifier::default()));
    pipeline.run_detection_cycle_at(now).await;

    let insights = stored_insights(&store, now).await;
    let focus = find(&insights, "Focus area detected: browser");
    assert_eq!(focus.confidence, 0.72);
    assert_eq!(focus.metadata["source"], "browser");
}

#[tokio::test]
async fn test_busy_cycle_adds_one_aggregate_insight() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = fixed_now();
    seed_curl(&store, now).await;
    seed_browser_burst(&store, now).await;
    seed_cross_source(&store, now).await;

    let pipeline = pipeline_over(&store, Arc::new(RecordingNotifier::default()));
    let report = pipeline.run_detection_cycle_at(now).await;
    assert!(report.pattern_count > 3);
    assert_eq!(report.insight_count, report.pattern_count + 1);

    let insights = stored_insights(&store, now).await;
    let aggregates: Vec<&Insight> = insights
        .iter()
        .filter(|i| i.pattern_type == "aggregated_insight")
        .collect();
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].confidence, 0.85);
    assert!(aggregates[0].concept.starts_with("Daily intelligence:"));
}

#[tokio::test]
async fn test_notification_timeout_does_not_fail_cycle() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = fixed_now();
    seed_curl(&store, now).await;

    let pipeline = pipeline_over(&store, Arc::new(TimingOutNotifier));
    let report = pipeline.run_detection_cycle_at(now).await;

    assert!(report.success);
    assert_eq!(report.stored, 1);
    assert_eq!(report.alerted, 0);
}

#[tokio::test]
async fn test_unavailable_log_marks_cycle_failed() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let pipeline = InsightPipeline::new(
        Arc::new(UnavailableEvents),
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        PipelineSettings::default(),
    );

    let report = pipeline.run_detection_cycle_at(fixed_now()).await;
    assert!(!report.success);
    assert_eq!(report.errors.len(), 3);
    assert_eq!(report.pattern_count, 0);
}

// =====================================================================
// DEDUPLICATION
// =====================================================================

#[tokio::test]
async fn test_same_concept_is_stored_once() {
    let store = SqliteStore::open_in_memory().unwrap();
    let now = fixed_now();
    let insight = Insight {
        concept: "Focus area detected: cli".to_string(),
        context: "High activity".to_string(),
        confidence: 0.72,
        source: InsightSource::Pattern,
        pattern_type: "high_activity".to_string(),
        metadata: serde_json::json!({"pattern_type": "high_activity"}),
        created_at: now,
    };

    let first = store_if_new(&store, &insight, Duration::hours(24), now).await;
    let second = store_if_new(&store, &insight, Duration::hours(24), now + Duration::minutes(5)).await;

    assert!(first.stored());
    assert_eq!(second, StoreOutcome::Duplicate);
    assert_eq!(store.total_insights().await.unwrap(), 1);
    assert_eq!(store.audit_events(INSIGHT_CREATED_EVENT).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_jobs_store_concept_once() {
    let store = SqliteStore::open_in_memory().unwrap();
    let now = fixed_now();
    let insight = Insight {
        concept: "Cross-source learning: ownership".to_string(),
        context: "Seen in docs and podcast".to_string(),
        confidence: 0.7,
        source: InsightSource::Pattern,
        pattern_type: "cross_source_concept".to_string(),
        metadata: serde_json::json!({"pattern_type": "cross_source_concept"}),
        created_at: now,
    };

    let (cycle, digest) = tokio::join!(
        store_if_new(&store, &insight, Duration::hours(24), now),
        store_if_new(&store, &insight, Duration::hours(24), now),
    );

    let outcomes = [cycle, digest];
    assert_eq!(outcomes.iter().filter(|o| o.stored()).count(), 1);
    assert!(outcomes.contains(&StoreOutcome::Duplicate));
    assert_eq!(store.total_insights().await.unwrap(), 1);
    assert_eq!(store.audit_events(INSIGHT_CREATED_EVENT).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_restart_does_not_duplicate() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = fixed_now();
    seed_curl(&store, now).await;

    // Fresh pipelines have empty in-process state, like a restarted daemon
    pipeline_over(&store, Arc::new(RecordingNotifier::default()))
        .run_detection_cycle_at(now)
        .await;
    let report = pipeline_over(&store, Arc::new(RecordingNotifier::default()))
        .run_detection_cycle_at(now + Duration::minutes(5))
        .await;

    assert_eq!(report.stored, 0);
    assert_eq!(report.duplicates, 1);
    assert_eq!(store.total_insights().await.unwrap(), 1);
}

#[test]
fn test_failed_insert_still_writes_audit() {
    let store = BrokenInsertStore::default();
    let now = fixed_now();
    let insight = Insight {
        concept: "Learning acceleration: lifetimes".to_string(),
        context: "Reinforced twice".to_string(),
        confidence: 0.9,
        source: InsightSource::Pattern,
        pattern_type: "rapid_reinforcement".to_string(),
        metadata: serde_json::json!({}),
        created_at: now,
    };

    let outcome = tokio_test::block_on(store_if_new(&store, &insight, Duration::hours(24), now));
    assert_eq!(outcome, StoreOutcome::Failed);

    let audits = store.audits.lock().unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].event_type, INSIGHT_CREATED_EVENT);
    assert_eq!(audits[0].payload["concept"], "Learning acceleration: lifetimes");
    assert_eq!(audits[0].payload["source"], "insight_generator");
}

// =====================================================================
// DAILY DIGEST
// =====================================================================

#[tokio::test]
async fn test_digest_twice_keeps_one_metrics_row() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = fixed_now();
    seed_curl(&store, now).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = pipeline_over(&store, notifier.clone());

    let first = pipeline.run_daily_digest_at(now).await;
    assert!(first.success);
    assert_eq!(first.event_count, 3);

    seed_browser_burst(&store, now + Duration::minutes(30)).await;
    let second = pipeline.run_daily_digest_at(now + Duration::minutes(30)).await;
    assert!(second.success);
    assert_eq!(second.event_count, 9);

    assert_eq!(store.total_daily_metrics_rows().await.unwrap(), 1);
    let metrics = store.daily_metrics(now.date_naive()).await.unwrap().unwrap();
    assert_eq!(metrics.total_events, 9);
    assert_eq!(metrics.unique_sources, 2);

    // Re-sending the digest on a re-run is accepted
    let digests: Vec<String> = notifier
        .messages()
        .into_iter()
        .filter(|m| m.contains("Daily Insight Digest"))
        .collect();
    assert_eq!(digests.len(), 2);
    assert!(digests[0].contains("1. CLI proficiency: curl (used 3x) (conf: 85%)"));
}

#[tokio::test]
async fn test_digest_without_insights_skips_message() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = pipeline_over(&store, notifier.clone());

    let report = pipeline.run_daily_digest_at(fixed_now()).await;
    assert!(report.success);
    assert!(!report.digest_sent);
    assert!(notifier.messages().is_empty());
    assert_eq!(store.total_daily_metrics_rows().await.unwrap(), 1);
}

#[tokio::test]
async fn test_digest_failure_is_recorded_in_log() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let pipeline = InsightPipeline::new(
        Arc::new(UnavailableEvents),
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        PipelineSettings::default(),
    );

    let report = pipeline.run_daily_digest_at(fixed_now()).await;
    assert!(!report.success);

    let trail = store.audit_events(PIPELINE_ERROR_EVENT).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].source.as_deref(), Some("daily_digest"));
    assert!(trail[0].content.as_deref().unwrap_or_default().contains("fetch events"));
}

#[tokio::test]
async fn test_failed_rerun_keeps_days_metrics() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = fixed_now();
    seed_curl(&store, now).await;

    let good = pipeline_over(&store, Arc::new(RecordingNotifier::default()));
    assert!(good.run_daily_digest_at(now).await.success);
    let before = store.daily_metrics(now.date_naive()).await.unwrap().unwrap();
    assert_eq!(before.total_events, 3);

    let notifier = Arc::new(RecordingNotifier::default());
    let failing = InsightPipeline::new(
        Arc::new(UnavailableEvents),
        store.clone(),
        notifier.clone(),
        PipelineSettings::default(),
    );
    let report = failing.run_daily_digest_at(now + Duration::minutes(5)).await;
    assert!(!report.success);
    assert_eq!(report.stored, 0);
    assert!(!report.digest_sent);
    assert!(notifier.messages().is_empty());

    let after = store.daily_metrics(now.date_naive()).await.unwrap().unwrap();
    assert_eq!(after.total_events, before.total_events);
    assert_eq!(after.unique_sources, before.unique_sources);
    assert_eq!(store.total_daily_metrics_rows().await.unwrap(), 1);
    assert_eq!(store.audit_events(PIPELINE_ERROR_EVENT).await.unwrap().len(), 1);
}
