//! Event log and insight store
//!
//! The pipeline only talks to the two traits here. [`SqliteStore`]
//! implements both over one local database.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::types::{DailyMetrics, Event, Insight, Learning, Note};

pub use sqlite::SqliteStore;

/// Half-open time range `[since, until)` with a row cap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub limit: usize,
}

impl Window {
    /// The `span` leading up to `now`
    pub fn ending_at(now: DateTime<Utc>, span: Duration, limit: usize) -> Self {
        Self {
            since: now - span,
            until: now,
            limit,
        }
    }
}

/// Read side of the append-only log
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events in the window, newest first, excluding the pipeline's own audit rows
    async fn fetch_events(&self, window: Window) -> Result<Vec<Event>>;

    async fn fetch_learnings(&self, window: Window) -> Result<Vec<Learning>>;

    async fn fetch_notes(&self, window: Window) -> Result<Vec<Note>>;

    /// Event counts grouped by type since `since`, largest first
    async fn event_type_counts(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>>;

    /// Event counts grouped by (source, type) since `since`, largest first
    async fn source_type_counts(&self, since: DateTime<Utc>) -> Result<Vec<(String, String, u64)>>;

    /// Learning counts grouped by source since `since`, largest first
    async fn learning_source_counts(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>>;

    async fn learning_count(&self, since: DateTime<Utc>) -> Result<u64>;
}

/// Audit row appended to the event log
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub event_type: String,
    pub source: Option<String>,
    pub content: Option<String>,
    pub payload: serde_json::Value,
    pub dedupe_key: Option<String>,
}

/// Result of [`InsightStore::insert_if_absent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// Row id of the insight already holding the concept
    Existing(i64),
}

/// Aggregate view of one day's insights
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightStats {
    pub total_insights: u64,
    pub avg_confidence: Option<f64>,
    pub unique_patterns: u64,
    pub unique_sources: u64,
}

/// Persisted insights, the audit trail and the daily metrics rows
#[async_trait]
pub trait InsightStore: Send + Sync {
    /// Insert `insight` unless an insight with the same concept was created
    /// at or after `since`. The lookup and the insert are one atomic step.
    async fn insert_if_absent(&self, insight: &Insight, since: DateTime<Utc>) -> Result<InsertOutcome>;

    async fn append_audit(&self, record: &AuditRecord, at: DateTime<Utc>) -> Result<()>;

    /// Insert or overwrite the row for `metrics.date`
    async fn upsert_daily_metrics(&self, metrics: &DailyMetrics, at: DateTime<Utc>) -> Result<()>;

    async fn daily_metrics(&self, date: NaiveDate) -> Result<Option<DailyMetrics>>;

    /// Highest-confidence insights created at or after `since`
    async fn top_insights(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Insight>>;

    async fn insight_count(&self, since: DateTime<Utc>) -> Result<u64>;

    async fn insight_stats(&self, since: DateTime<Utc>) -> Result<InsightStats>;
}
