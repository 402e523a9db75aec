//! CLI interface for insight-miner
//!
//! One-shot jobs print a JSON summary on stdout and map success to the exit
//! status so cron or a supervisor can capture both. `run` keeps the
//! scheduler in the foreground until Ctrl+C.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::pipeline::InsightPipeline;
use crate::scheduler::{create_cron_task, create_recurring_task, TaskScheduler};

#[derive(Parser)]
#[command(name = "insight-miner")]
#[command(about = "Mines the activity log for patterns and turns them into insights", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(short, long, global = true, env = "INSIGHT_MINER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one short detection cycle over the last hour
    Detect,
    /// Run the daily digest over the last 24 hours
    Digest,
    /// Send the midday activity summary
    Midday,
    /// Show today's insight statistics
    Stats,
    /// Run the scheduler until interrupted
    Run,
}

pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::Run = cli.command {
        let config = load_config(cli.config.as_deref())?;
        run_daemon(&config).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let (success, summary) = summary_of(run_once(cli.config.as_deref(), &cli.command).await);
    print_json(&summary)?;
    Ok(exit_code(success))
}

/// Run one job and return its success flag and JSON summary
async fn run_once(config: Option<&Path>, command: &Commands) -> Result<(bool, Value)> {
    let config = load_config(config)?;
    let pipeline = InsightPipeline::from_config(&config).await?;

    match command {
        Commands::Detect => {
            let report = pipeline.run_detection_cycle().await;
            Ok((report.success, serde_json::to_value(&report)?))
        }
        Commands::Digest => {
            let report = pipeline.run_daily_digest().await;
            Ok((report.success, serde_json::to_value(&report)?))
        }
        Commands::Midday => {
            let report = pipeline.run_midday_summary().await?;
            Ok((report.success, serde_json::to_value(&report)?))
        }
        Commands::Stats => Ok((true, serde_json::to_value(pipeline.insight_stats().await?)?)),
        Commands::Run => bail!("run is not a one-shot job"),
    }
}

/// A job that could not run still prints `{"success": false, "error": ...}`
fn summary_of(result: Result<(bool, Value)>) -> (bool, Value) {
    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %format!("{:#}", e), "job failed");
            (false, json!({ "success": false, "error": format!("{:#}", e) }))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env();
            config
        }
        None => Config::load()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize summary")?;
    println!("{}", json);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Register the three jobs and block until Ctrl+C
async fn run_daemon(config: &Config) -> Result<()> {
    let pipeline = Arc::new(InsightPipeline::from_config(config).await?);
    let scheduler = TaskScheduler::new();

    let detect = pipeline.clone();
    scheduler
        .add_task_with_executor(
            create_recurring_task(
                "detect",
                config.schedule.detect_interval_secs,
                Some("Short detection cycle"),
            ),
            move || {
                let pipeline = detect.clone();
                async move {
                    let report = pipeline.run_detection_cycle().await;
                    summarize(report.success, &report)
                }
            },
        )
        .await?;

    let digest = pipeline.clone();
    scheduler
        .add_task_with_executor(
            create_cron_task("digest", &config.schedule.digest_cron, Some("Daily digest"))?,
            move || {
                let pipeline = digest.clone();
                async move {
                    let report = pipeline.run_daily_digest().await;
                    summarize(report.success, &report)
                }
            },
        )
        .await?;

    if config.schedule.midday_cron.is_empty() {
        info!("midday summary disabled");
    } else {
        let midday = pipeline.clone();
        scheduler
            .add_task_with_executor(
                create_cron_task("midday", &config.schedule.midday_cron, Some("Midday summary"))?,
                move || {
                    let pipeline = midday.clone();
                    async move {
                        let report = pipeline.run_midday_summary().await?;
                        summarize(report.success, &report)
                    }
                },
            )
            .await?;
    }

    eprintln!("insight-miner running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = scheduler.start() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
            scheduler.stop().await;
        }
    }

    let stats = scheduler.stats().await;
    info!(runs = stats.total_runs, skipped = stats.total_skipped, "scheduler shut down");
    Ok(())
}

/// Executor result: the report as one JSON line, or an error for failed runs
fn summarize<T: Serialize>(success: bool, report: &T) -> Result<String> {
    let line = serde_json::to_string(report).context("Failed to serialize summary")?;
    if success {
        Ok(line)
    } else {
        anyhow::bail!("run reported failure: {}", line)
    }
}
