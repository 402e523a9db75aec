//! SQLite-backed event log and insight store

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{AuditRecord, EventSource, InsertOutcome, InsightStats, InsightStore, Window};
use crate::error::{PipelineError, Result};
use crate::types::{
    ConceptSummary, DailyMetrics, Event, Insight, InsightSource, Learning, Note, AUDIT_EVENT_TYPES,
};

/// Fixed-width UTC timestamps so string comparison orders correctly
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(kind: &'static str, id: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::data(kind, id, format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_json(kind: &'static str, id: &str, raw: Option<String>) -> Result<serde_json::Value> {
    match raw {
        None => Ok(serde_json::Value::Null),
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| PipelineError::data(kind, id, format!("bad metadata: {}", e))),
    }
}

fn insert_insight_row(conn: &Connection, insight: &Insight) -> rusqlite::Result<i64> {
    conn.execute(
        r#"INSERT INTO insights
           (created_at, source, concept, context, confidence, metadata, pattern_type)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            ts(&insight.created_at),
            insight.source.as_str(),
            insight.concept,
            insight.context,
            insight.confidence,
            insight.metadata.to_string(),
            insight.pattern_type,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// `'insight_created','pipeline_error'`
fn audit_type_list() -> String {
    AUDIT_EVENT_TYPES
        .iter()
        .map(|t| format!("'{}'", t))
        .collect::<Vec<_>>()
        .join(",")
}

/// Drop records that failed to decode, logging each one
fn keep_valid<T>(rows: Vec<Result<T>>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match row {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, "skipping malformed record");
                None
            }
        })
        .collect()
}

struct RawEvent {
    id: String,
    created_at: String,
    source: Option<String>,
    event_type: String,
    content: Option<String>,
    metadata: Option<String>,
}

impl RawEvent {
    fn decode(self) -> Result<Event> {
        Ok(Event {
            timestamp: parse_ts("event", &self.id, &self.created_at)?,
            metadata: parse_json("event", &self.id, self.metadata)?,
            id: self.id,
            source: self.source.filter(|s| !s.is_empty()),
            event_type: self.event_type,
            content: self.content,
        })
    }
}

struct RawLearning {
    id: String,
    created_at: String,
    concept: String,
    source: String,
    context: Option<String>,
    confidence: Option<f64>,
}

impl RawLearning {
    fn decode(self) -> Result<Learning> {
        if self.concept.trim().is_empty() {
            return Err(PipelineError::data("learning", self.id, "empty concept"));
        }
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(PipelineError::data("learning", self.id, format!("confidence {} out of range", c)));
            }
        }
        Ok(Learning {
            created_at: parse_ts("learning", &self.id, &self.created_at)?,
            id: self.id,
            concept: self.concept,
            source: self.source,
            context: self.context,
            confidence: self.confidence,
        })
    }
}

struct RawInsight {
    id: i64,
    created_at: String,
    source: String,
    concept: String,
    context: String,
    confidence: f64,
    metadata: Option<String>,
    pattern_type: String,
}

impl RawInsight {
    fn decode(self) -> Result<Insight> {
        let id = self.id.to_string();
        let source = InsightSource::parse(&self.source)
            .ok_or_else(|| PipelineError::data("insight", id.clone(), format!("unknown source '{}'", self.source)))?;
        Ok(Insight {
            created_at: parse_ts("insight", &id, &self.created_at)?,
            metadata: parse_json("insight", &id, self.metadata)?,
            concept: self.concept,
            context: self.context,
            confidence: self.confidence.clamp(0.0, 1.0),
            source,
            pattern_type: self.pattern_type,
        })
    }
}

/// SQLite store holding the event log, learnings, notes, insights and
/// daily metrics
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::transient("create database directory", e))?;
        }

        let conn = Connection::open(&path)?;

        // Enable WAL mode for better performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init_schema(&conn)?;
        debug!(path = %path.display(), "opened insight store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(r#"
            -- Append-only activity log, audit rows included
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                source TEXT,
                type TEXT NOT NULL,
                content TEXT,
                metadata TEXT,
                dedupe_key TEXT
            );

            CREATE TABLE IF NOT EXISTS learnings (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                concept TEXT NOT NULL,
                source TEXT NOT NULL,
                context TEXT,
                confidence REAL
            );

            CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL
            );

            -- Duplicate concepts are filtered by the application, not a constraint
            CREATE TABLE IF NOT EXISTS insights (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                source TEXT NOT NULL,
                concept TEXT NOT NULL,
                context TEXT NOT NULL,
                confidence REAL NOT NULL,
                metadata TEXT,
                pattern_type TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_metrics (
                date TEXT PRIMARY KEY,
                total_events INTEGER NOT NULL,
                total_learnings INTEGER NOT NULL,
                total_insights INTEGER NOT NULL,
                unique_sources INTEGER NOT NULL,
                top_concepts TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_learnings_created ON learnings(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_insights_concept ON insights(concept, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_insights_created ON insights(created_at DESC);
        "#)?;

        Ok(())
    }

    /// Append an event to the log
    pub async fn append_event(&self, event: &Event) -> Result<()> {
        let conn = self.conn.lock().await;
        let metadata = if event.metadata.is_null() {
            None
        } else {
            Some(event.metadata.to_string())
        };

        conn.execute(
            r#"INSERT INTO events (id, created_at, source, type, content, metadata)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                event.id,
                ts(&event.timestamp),
                event.source,
                event.event_type,
                event.content,
                metadata,
            ],
        )?;
        Ok(())
    }

    pub async fn append_learning(&self, learning: &Learning) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO learnings (id, created_at, concept, source, context, confidence)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                learning.id,
                ts(&learning.created_at),
                learning.concept,
                learning.source,
                learning.context,
                learning.confidence,
            ],
        )?;
        Ok(())
    }

    pub async fn append_note(&self, note: &Note) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO notes (id, created_at, title, content) VALUES (?1, ?2, ?3, ?4)",
            params![note.id, ts(&note.created_at), note.title, note.content],
        )?;
        Ok(())
    }

    /// Audit rows of a given type, newest first
    /// Insert an insight without the concept lookback
    pub async fn insert_insight(&self, insight: &Insight) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(insert_insight_row(&conn, insight)?)
    }

    pub async fn audit_events(&self, event_type: &str) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, created_at, source, type, content, metadata FROM events
               WHERE type = ?1 ORDER BY created_at DESC"#,
        )?;
        let rows = stmt
            .query_map(params![event_type], raw_event)?
            .map(|row| row.map_err(PipelineError::from).and_then(RawEvent::decode))
            .collect::<Vec<_>>();
        Ok(keep_valid(rows))
    }

    /// Total rows in the insights table
    pub async fn total_insights(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM insights", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Total rows in the daily metrics table
    pub async fn total_daily_metrics_rows(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM daily_metrics", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn raw_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        id: row.get(0)?,
        created_at: row.get(1)?,
        source: row.get(2)?,
        event_type: row.get(3)?,
        content: row.get(4)?,
        metadata: row.get(5)?,
    })
}

fn raw_insight(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawInsight> {
    Ok(RawInsight {
        id: row.get(0)?,
        created_at: row.get(1)?,
        source: row.get(2)?,
        concept: row.get(3)?,
        context: row.get(4)?,
        confidence: row.get(5)?,
        metadata: row.get(6)?,
        pattern_type: row.get(7)?,
    })
}

#[async_trait]
impl EventSource for SqliteStore {
    async fn fetch_events(&self, window: Window) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            r#"SELECT id, created_at, source, type, content, metadata FROM events
               WHERE created_at >= ?1 AND created_at < ?2 AND type NOT IN ({})
               ORDER BY created_at DESC LIMIT ?3"#,
            audit_type_list()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![ts(&window.since), ts(&window.until), window.limit as i64],
                raw_event,
            )?
            .map(|row| row.map_err(PipelineError::from).and_then(RawEvent::decode))
            .collect::<Vec<_>>();
        Ok(keep_valid(rows))
    }

    async fn fetch_learnings(&self, window: Window) -> Result<Vec<Learning>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, created_at, concept, source, context, confidence FROM learnings
               WHERE created_at >= ?1 AND created_at < ?2
               ORDER BY created_at DESC LIMIT ?3"#,
        )?;
        let rows = stmt
            .query_map(
                params![ts(&window.since), ts(&window.until), window.limit as i64],
                |row| {
                    Ok(RawLearning {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                        concept: row.get(2)?,
                        source: row.get(3)?,
                        context: row.get(4)?,
                        confidence: row.get(5)?,
                    })
                },
            )?
            .map(|row| row.map_err(PipelineError::from).and_then(RawLearning::decode))
            .collect::<Vec<_>>();
        Ok(keep_valid(rows))
    }

    async fn fetch_notes(&self, window: Window) -> Result<Vec<Note>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, created_at, title, content FROM notes
               WHERE created_at >= ?1 AND created_at < ?2
               ORDER BY created_at DESC LIMIT ?3"#,
        )?;
        let rows = stmt
            .query_map(
                params![ts(&window.since), ts(&window.until), window.limit as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )?
            .map(|row| -> Result<Note> {
                let (id, created_at, title, content) = row?;
                Ok(Note {
                    created_at: parse_ts("note", &id, &created_at)?,
                    id,
                    title,
                    content,
                })
            })
            .collect::<Vec<_>>();
        Ok(keep_valid(rows))
    }

    async fn event_type_counts(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            r#"SELECT type, COUNT(*) AS n FROM events
               WHERE created_at >= ?1 AND type NOT IN ({})
               GROUP BY type ORDER BY n DESC, type ASC"#,
            audit_type_list()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![ts(&since)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn source_type_counts(&self, since: DateTime<Utc>) -> Result<Vec<(String, String, u64)>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            r#"SELECT COALESCE(source, 'unknown') AS src, type, COUNT(*) AS n FROM events
               WHERE created_at >= ?1 AND type NOT IN ({})
               GROUP BY src, type ORDER BY n DESC, src ASC, type ASC"#,
            audit_type_list()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![ts(&since)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? as u64,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn learning_source_counts(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT source, COUNT(*) AS n FROM learnings
               WHERE created_at >= ?1
               GROUP BY source ORDER BY n DESC, source ASC"#,
        )?;
        let rows = stmt
            .query_map(params![ts(&since)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn learning_count(&self, since: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM learnings WHERE created_at >= ?1",
            params![ts(&since)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[async_trait]
impl InsightStore for SqliteStore {
    async fn insert_if_absent(&self, insight: &Insight, since: DateTime<Utc>) -> Result<InsertOutcome> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = tx
            .query_row(
                r#"SELECT id FROM insights
                   WHERE concept = ?1 AND created_at >= ?2
                   ORDER BY created_at DESC LIMIT 1"#,
                params![insight.concept, ts(&since)],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(InsertOutcome::Existing(id));
        }
        let id = insert_insight_row(&tx, insight)?;
        tx.commit()?;
        Ok(InsertOutcome::Inserted(id))
    }

    async fn append_audit(&self, record: &AuditRecord, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO events (id, created_at, source, type, content, metadata, dedupe_key)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                uuid::Uuid::new_v4().to_string(),
                ts(&at),
                record.source,
                record.event_type,
                record.content,
                record.payload.to_string(),
                record.dedupe_key,
            ],
        )?;
        Ok(())
    }

    async fn upsert_daily_metrics(&self, metrics: &DailyMetrics, at: DateTime<Utc>) -> Result<()> {
        let top_concepts = serde_json::to_string(&metrics.top_concepts)
            .map_err(|e| PipelineError::data("daily_metrics", metrics.date.to_string(), e))?;

        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO daily_metrics
               (date, total_events, total_learnings, total_insights, unique_sources, top_concepts, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(date) DO UPDATE SET
                   total_events = excluded.total_events,
                   total_learnings = excluded.total_learnings,
                   total_insights = excluded.total_insights,
                   unique_sources = excluded.unique_sources,
                   top_concepts = excluded.top_concepts,
                   updated_at = excluded.updated_at"#,
            params![
                metrics.date.format("%Y-%m-%d").to_string(),
                metrics.total_events as i64,
                metrics.total_learnings as i64,
                metrics.total_insights as i64,
                metrics.unique_sources as i64,
                top_concepts,
                ts(&at),
            ],
        )?;
        Ok(())
    }

    async fn daily_metrics(&self, date: NaiveDate) -> Result<Option<DailyMetrics>> {
        let key = date.format("%Y-%m-%d").to_string();
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                r#"SELECT total_events, total_learnings, total_insights, unique_sources, top_concepts
                   FROM daily_metrics WHERE date = ?1"#,
                params![key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((events, learnings, insights, sources, top_concepts)) = row else {
            return Ok(None);
        };
        let top_concepts: Vec<ConceptSummary> = serde_json::from_str(&top_concepts)
            .map_err(|e| PipelineError::data("daily_metrics", key.clone(), e))?;

        Ok(Some(DailyMetrics {
            date,
            total_events: events as u64,
            total_learnings: learnings as u64,
            total_insights: insights as u64,
            unique_sources: sources as u64,
            top_concepts,
        }))
    }

    async fn top_insights(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, created_at, source, concept, context, confidence, metadata, pattern_type
               FROM insights WHERE created_at >= ?1
               ORDER BY confidence DESC, created_at DESC LIMIT ?2"#,
        )?;
        let rows = stmt
            .query_map(params![ts(&since), limit as i64], raw_insight)?
            .map(|row| row.map_err(PipelineError::from).and_then(RawInsight::decode))
            .collect::<Vec<_>>();
        Ok(keep_valid(rows))
    }

    async fn insight_count(&self, since: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM insights WHERE created_at >= ?1",
            params![ts(&since)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn insight_stats(&self, since: DateTime<Utc>) -> Result<InsightStats> {
        let conn = self.conn.lock().await;
        let stats = conn.query_row(
            r#"SELECT COUNT(*), AVG(confidence), COUNT(DISTINCT pattern_type),
                      COUNT(DISTINCT json_extract(metadata, '$.source'))
               FROM insights WHERE created_at >= ?1"#,
            params![ts(&since)],
            |row| {
                Ok(InsightStats {
                    total_insights: row.get::<_, i64>(0)? as u64,
                    avg_confidence: row.get::<_, Option<f64>>(1)?,
                    unique_patterns: row.get::<_, i64>(2)? as u64,
                    unique_sources: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(stats)
    }
}
