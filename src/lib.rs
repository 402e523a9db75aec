//! insight-miner - behavioral pattern mining library
//!
//! Scans a chronological event/notes/learnings log for signals (repeated
//! commands, concepts learned from several sources, bursts of activity),
//! turns them into deduplicated insights, alerts on the confident ones and
//! rolls each day up into a digest.
//!
//! # Example
//!
//! ```ignore
//! use insight_miner::{Config, InsightPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pipeline = InsightPipeline::from_config(&config).await?;
//!     let report = pipeline.run_detection_cycle().await;
//!     println!("stored {} insights", report.stored);
//!     Ok(())
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod error;
pub mod config;
pub mod detection;
pub mod synthesis;
pub mod store;
pub mod dedup;
pub mod messaging;
pub mod alert;
pub mod pipeline;
pub mod scheduler;
pub mod cli;

// Re-export commonly used types for convenience
pub use types::{DailyMetrics, Event, Insight, InsightSource, Learning, Note};

pub use error::{PipelineError, Result};

pub use config::Config;

pub use detection::{detect_all, Detector, DetectorBank, Pattern, PatternKind, Snapshot};

pub use synthesis::{synthesize, synthesize_aggregate};

pub use store::{EventSource, InsightStore, SqliteStore, Window};

pub use dedup::{store_if_new, DedupState, StoreOutcome};

pub use messaging::{HttpInsightSink, HttpNotifier, InsightSink, Notifier};

pub use alert::AlertDispatcher;

pub use pipeline::{CycleReport, DigestReport, InsightPipeline, MiddayReport, PipelineSettings};

pub use scheduler::{TaskSchedule, TaskScheduler};
