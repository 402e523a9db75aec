//! Detection → synthesis → storage → alert pipeline
//!
//! [`InsightPipeline`] owns the collaborators and the dedup state that is
//! threaded through every short cycle. The jobs themselves live in
//! [`cycle`], [`digest`] and [`midday`].

pub mod cycle;
pub mod digest;
pub mod midday;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::alert::AlertDispatcher;
use crate::config::{Config, MAX_WINDOW_HOURS};
use crate::dedup::{store_if_new, DedupState, StoreOutcome};
use crate::detection::DetectorBank;
use crate::messaging::{HttpInsightSink, HttpNotifier, InsightSink, Notifier};
use crate::store::{EventSource, InsightStats, InsightStore, SqliteStore, Window};
use crate::types::{Event, Insight, Learning, Note};

pub use cycle::CycleReport;
pub use digest::DigestReport;
pub use midday::MiddayReport;

/// Windows and limits used by the jobs
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub short_window: Duration,
    pub digest_window: Duration,
    pub dedup_window: Duration,
    pub row_limit: usize,
    pub top_insights: usize,
    pub top_concepts: usize,
    /// Midday summaries go out only to an explicitly configured chat
    pub send_midday: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineSettings {
    /// Windows are clamped to `[0, MAX_WINDOW_HOURS]`; `Config::validate`
    /// rejects anything outside that range first
    pub fn from_config(config: &Config) -> Self {
        let max_minutes = MAX_WINDOW_HOURS * 60;
        let detection = &config.detection;
        Self {
            short_window: Duration::minutes(detection.short_window_minutes.clamp(0, max_minutes)),
            digest_window: Duration::hours(detection.digest_window_hours.clamp(0, MAX_WINDOW_HOURS)),
            dedup_window: Duration::hours(detection.dedup_window_hours.clamp(0, MAX_WINDOW_HOURS)),
            row_limit: config.detection.row_limit,
            top_insights: config.digest.top_insights,
            top_concepts: config.digest.top_concepts,
            send_midday: config.notify.chat_id.is_some(),
        }
    }
}

/// The records one cycle works on, fetched once
#[derive(Debug, Default)]
struct FetchedWindow {
    events: Vec<Event>,
    notes: Vec<Note>,
    learnings: Vec<Learning>,
    errors: Vec<String>,
}

pub struct InsightPipeline {
    events: Arc<dyn EventSource>,
    store: Arc<dyn InsightStore>,
    notifier: Arc<dyn Notifier>,
    alerts: AlertDispatcher,
    sink: Option<Arc<dyn InsightSink>>,
    bank: DetectorBank,
    settings: PipelineSettings,
    dedup: Mutex<DedupState>,
}

impl InsightPipeline {
    pub fn new(
        events: Arc<dyn EventSource>,
        store: Arc<dyn InsightStore>,
        notifier: Arc<dyn Notifier>,
        settings: PipelineSettings,
    ) -> Self {
        let dedup = DedupState::new(settings.dedup_window);
        Self {
            events,
            store,
            alerts: AlertDispatcher::new(notifier.clone(), crate::alert::DEFAULT_ALERT_THRESHOLD),
            notifier,
            sink: None,
            bank: DetectorBank::default(),
            settings,
            dedup: Mutex::new(dedup),
        }
    }

    /// Wire everything from the config: SQLite store, HTTP sinks
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(
            SqliteStore::open(&config.database.path)
                .await
                .with_context(|| format!("Failed to open store at {}", config.database.path.display()))?,
        );
        let notifier: Arc<dyn Notifier> = Arc::new(HttpNotifier::from_config(&config.notify)?);

        let mut pipeline = Self::new(
            store.clone(),
            store,
            notifier,
            PipelineSettings::from_config(config),
        )
        .with_alert_threshold(config.alerts.threshold)
        .with_detectors(DetectorBank::from_config(&config.detection));

        if let Some(sink) = HttpInsightSink::from_config(&config.ingest)? {
            pipeline = pipeline.with_sink(Arc::new(sink));
        }
        Ok(pipeline)
    }

    pub fn with_sink(mut self, sink: Arc<dyn InsightSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_detectors(mut self, bank: DetectorBank) -> Self {
        self.bank = bank;
        self
    }

    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alerts = AlertDispatcher::new(self.notifier.clone(), threshold);
        self
    }

    /// Today's insight statistics
    pub async fn insight_stats(&self) -> Result<InsightStats> {
        let stats = self
            .store
            .insight_stats(start_of_day(Utc::now()))
            .await
            .context("Failed to query insight statistics")?;
        Ok(stats)
    }

    /// Fetch events, notes and learnings for one window concurrently. A
    /// failed fetch leaves that list empty and is recorded in `errors`.
    async fn fetch_window(&self, window: Window) -> FetchedWindow {
        let (events, notes, learnings) = tokio::join!(
            self.events.fetch_events(window),
            self.events.fetch_notes(window),
            self.events.fetch_learnings(window),
        );

        let mut fetched = FetchedWindow::default();
        match events {
            Ok(rows) => fetched.events = rows,
            Err(e) => {
                warn!(error = %e, "failed to fetch events");
                fetched.errors.push(format!("fetch events: {}", e));
            }
        }
        match notes {
            Ok(rows) => fetched.notes = rows,
            Err(e) => {
                warn!(error = %e, "failed to fetch notes");
                fetched.errors.push(format!("fetch notes: {}", e));
            }
        }
        match learnings {
            Ok(rows) => fetched.learnings = rows,
            Err(e) => {
                warn!(error = %e, "failed to fetch learnings");
                fetched.errors.push(format!("fetch learnings: {}", e));
            }
        }
        fetched
    }

    async fn store_insight(&self, insight: &Insight, now: DateTime<Utc>) -> StoreOutcome {
        store_if_new(self.store.as_ref(), insight, self.settings.dedup_window, now).await
    }

    /// Best-effort hand-off to the ingestion sink
    async fn forward(&self, insight: &Insight) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };
        match sink.forward(insight).await {
            Ok(receipt) => {
                info!(concept = %receipt.concept, id = %receipt.id, "insight forwarded");
                true
            }
            Err(e) => {
                warn!(concept = %insight.concept, error = %e, "failed to forward insight");
                false
            }
        }
    }
}

/// Midnight UTC of the day containing `now`
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

/// Seconds with two decimals, e.g. `1.25s`
pub(crate) fn format_duration(elapsed: std::time::Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}
