//! Shared types used across modules
//!
//! Records read from the event log, the insights synthesized from them and
//! the per-day metrics row.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Event types written by the pipeline itself. Reads exclude them so the
/// audit trail never feeds back into detection.
pub const AUDIT_EVENT_TYPES: &[&str] = &[INSIGHT_CREATED_EVENT, PIPELINE_ERROR_EVENT];

/// Audit event written for every stored insight
pub const INSIGHT_CREATED_EVENT: &str = "insight_created";

/// Audit event written when a digest run fails
pub const PIPELINE_ERROR_EVENT: &str = "pipeline_error";

/// An immutable activity record from the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Canonical attribution of where the activity came from (cli, telegram, github...)
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Event {
    /// Create an event stamped now with a fresh id
    pub fn new(source: Option<&str>, event_type: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source: source.map(str::to_string),
            event_type: event_type.to_string(),
            content: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// String field from the metadata object, if present
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// A concept the user learned, attributed to the source it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub concept: String,
    pub source: String,
    pub context: Option<String>,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Learning {
    pub fn new(concept: &str, source: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            concept: concept.to_string(),
            source: source.to_string(),
            context: None,
            confidence: None,
            created_at: Utc::now(),
        }
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A free-form note/document from the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Note {
    pub fn new(title: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Which pipeline produced an insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSource {
    /// Short-cycle detection
    Pattern,
    /// Daily digest synthesis
    Insight,
}

impl InsightSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightSource::Pattern => "pattern",
            InsightSource::Insight => "insight",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pattern" => Some(InsightSource::Pattern),
            "insight" => Some(InsightSource::Insight),
            _ => None,
        }
    }
}

impl std::fmt::Display for InsightSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A human-readable synthesis of one or more patterns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub concept: String,
    pub context: String,
    /// Always within [0, 1]
    pub confidence: f64,
    pub source: InsightSource,
    pub pattern_type: String,
    /// Snapshot of the pattern(s) this insight was built from
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    pub fn with_source(mut self, source: InsightSource) -> Self {
        self.source = source;
        self
    }

    /// Confidence as a whole percentage, e.g. 0.85 -> 85
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }
}

/// A concept entry in the daily metrics row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptSummary {
    pub concept: String,
    pub confidence: Option<f64>,
}

/// One row per calendar date (UTC)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub total_events: u64,
    pub total_learnings: u64,
    pub total_insights: u64,
    pub unique_sources: u64,
    pub top_concepts: Vec<ConceptSummary>,
}

/// Clamp a heuristic score into [0, `cap`] and round to 4 decimals so
/// scores compare cleanly.
pub fn bounded_confidence(value: f64, cap: f64) -> f64 {
    let v = value.min(cap).clamp(0.0, 1.0);
    (v * 10_000.0).round() / 10_000.0
}

/// Truncate a string to max chars with ellipsis
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}
