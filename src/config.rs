//! Configuration management
//!
//! Manages store location, detection windows, schedule, alert gating and
//! the outbound sinks. Loaded from a TOML file; every field has a default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Longest window or lookback accepted, in hours
pub const MAX_WINDOW_HOURS: i64 = 24 * 366;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub digest: DigestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file holding the event log and insight store
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    data_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("insight-miner.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Window scanned by the short cycle
    #[serde(default = "default_short_window_minutes")]
    pub short_window_minutes: i64,
    /// Window scanned by the daily digest
    #[serde(default = "default_digest_window_hours")]
    pub digest_window_hours: i64,
    /// Maximum rows fetched per table per cycle
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
    /// Lookback for suppressing an already stored concept
    #[serde(default = "default_dedup_window_hours")]
    pub dedup_window_hours: i64,
    /// Opt in to the source transition detector
    #[serde(default)]
    pub source_transitions: bool,
    #[serde(default = "default_transition_lookback")]
    pub transition_lookback: usize,
}

fn default_short_window_minutes() -> i64 {
    60
}

fn default_digest_window_hours() -> i64 {
    24
}

fn default_row_limit() -> usize {
    1000
}

fn default_dedup_window_hours() -> i64 {
    24
}

fn default_transition_lookback() -> usize {
    20
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            short_window_minutes: default_short_window_minutes(),
            digest_window_hours: default_digest_window_hours(),
            row_limit: default_row_limit(),
            dedup_window_hours: default_dedup_window_hours(),
            source_transitions: false,
            transition_lookback: default_transition_lookback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Interval of the short detection cycle, in seconds
    #[serde(default = "default_detect_interval")]
    pub detect_interval_secs: u64,
    /// Cron expression (seconds first, UTC) for the daily digest
    #[serde(default = "default_digest_cron")]
    pub digest_cron: String,
    /// Cron expression for the midday summary; empty disables it
    #[serde(default = "default_midday_cron")]
    pub midday_cron: String,
}

fn default_detect_interval() -> u64 {
    300
}

fn default_digest_cron() -> String {
    "0 0 2 * * *".to_string()
}

fn default_midday_cron() -> String {
    "0 0 14 * * *".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            detect_interval_secs: default_detect_interval(),
            digest_cron: default_digest_cron(),
            midday_cron: default_midday_cron(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Insights strictly above this confidence are alerted
    #[serde(default = "default_alert_threshold")]
    pub threshold: f64,
}

fn default_alert_threshold() -> f64 {
    0.7
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: default_alert_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Endpoint accepting `POST {chat_id, text}`
    #[serde(default = "default_notify_url")]
    pub url: String,
    /// Target chat; alerts go to "default" when unset
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_notify_url() -> String {
    "http://localhost:3003/telegram/send".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: default_notify_url(),
            chat_id: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Downstream ingestion endpoint; forwarding is off when unset
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    /// Insights listed in the digest message
    #[serde(default = "default_top_insights")]
    pub top_insights: usize,
    /// Concepts kept in the daily metrics row
    #[serde(default = "default_top_concepts")]
    pub top_concepts: usize,
}

fn default_top_insights() -> usize {
    5
}

fn default_top_concepts() -> usize {
    10
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            top_insights: default_top_insights(),
            top_concepts: default_top_concepts(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, writing defaults on first use
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Environment variables win over the file
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("INSIGHT_MINER_DB") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(chat_id) = std::env::var("NOTIFY_CHAT_ID")
            .ok()
            .or_else(|| std::env::var("TELEGRAM_CHAT_ID").ok())
        {
            self.notify.chat_id = Some(chat_id);
        }
        if let Ok(url) = std::env::var("NOTIFY_URL") {
            self.notify.url = url;
        }
        if let Ok(url) = std::env::var("INGEST_URL") {
            self.ingest.url = Some(url);
        }
    }

    /// Reject values that would make the pipeline misbehave silently
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alerts.threshold) {
            anyhow::bail!("alerts.threshold must be within [0, 1], got {}", self.alerts.threshold);
        }
        let detection = &self.detection;
        if detection.short_window_minutes > MAX_WINDOW_HOURS * 60
            || detection.digest_window_hours > MAX_WINDOW_HOURS
            || detection.dedup_window_hours > MAX_WINDOW_HOURS
        {
            anyhow::bail!("detection windows must not exceed {} hours", MAX_WINDOW_HOURS);
        }
        if detection.short_window_minutes <= 0
            || detection.digest_window_hours <= 0
            || detection.dedup_window_hours <= 0
        {
            anyhow::bail!("detection windows must be positive");
        }
        if detection.row_limit == 0 {
            anyhow::bail!("detection.row_limit must be positive");
        }
        if self.schedule.detect_interval_secs == 0 {
            anyhow::bail!("schedule.detect_interval_secs must be positive");
        }
        crate::scheduler::TaskSchedule::parse_cron(&self.schedule.digest_cron)?;
        if !self.schedule.midday_cron.is_empty() {
            crate::scheduler::TaskSchedule::parse_cron(&self.schedule.midday_cron)?;
        }
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "insight-miner", "insight-miner")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "insight-miner", "insight-miner")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}
