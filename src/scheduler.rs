//! Cron and interval scheduler
//!
//! Drives the pipeline jobs. Every task carries an in-flight flag: a task
//! that comes due while its previous run is still going is skipped, not
//! queued. A failed run is logged and the task stays scheduled. Stopping
//! waits for runs already started, so a job is never cut off mid-cycle.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the loop looks for due tasks
const TICK: Duration = Duration::from_secs(1);

/// A scheduled task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub schedule: TaskSchedule,
    pub description: Option<String>,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    /// Due runs dropped because the previous one was still going
    pub skipped_count: u64,
}

/// When a task runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskSchedule {
    /// Six-field cron expression, seconds first, evaluated in UTC
    Cron(String),
    /// Fixed interval in seconds
    Interval(u64),
}

impl TaskSchedule {
    /// Parse and validate a cron expression
    pub fn parse_cron(expr: &str) -> Result<Schedule> {
        Schedule::from_str(expr)
            .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expr, e))
    }

    /// Next run strictly after `from`
    pub fn next_after(&self, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self {
            TaskSchedule::Cron(expr) => {
                let schedule = Self::parse_cron(expr)?;
                Ok(schedule.after(&from).next())
            }
            TaskSchedule::Interval(secs) => Ok(Some(from + chrono::Duration::seconds(*secs as i64))),
        }
    }

    /// Next run time from now
    pub fn next_run(&self) -> Result<Option<DateTime<Utc>>> {
        self.next_after(Utc::now())
    }
}

/// Task execution result
#[derive(Debug)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

/// Job body: produces a one-line summary or an error
pub type TaskExecutor = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Executor plus the flag set while a run is in progress
#[derive(Clone)]
struct TaskRunner {
    executor: TaskExecutor,
    in_flight: Arc<AtomicBool>,
}

/// What one pass over the due tasks did
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickOutcome {
    pub started: Vec<String>,
    pub skipped: Vec<String>,
}

/// Scheduler for the pipeline jobs
pub struct TaskScheduler {
    tasks: Arc<Mutex<HashMap<String, ScheduledTask>>>,
    runners: Arc<Mutex<HashMap<String, TaskRunner>>>,
    running: Arc<Mutex<bool>>,
    /// Background runs started by `tick`, awaited on stop
    in_flight: Mutex<Vec<JoinHandle<TaskResult>>>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            runners: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(Mutex::new(false)),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Add a task with an executor function
    pub async fn add_task_with_executor<F, Fut>(
        &self,
        mut task: ScheduledTask,
        executor: F,
    ) -> Result<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String>> + Send + 'static,
    {
        task.next_run = task.schedule.next_run()?;

        let id = task.id.clone();
        let name = task.name.clone();
        let next_run = task.next_run;

        self.tasks.lock().await.insert(id.clone(), task);
        self.runners.lock().await.insert(
            id.clone(),
            TaskRunner {
                executor: Arc::new(move || Box::pin(executor())),
                in_flight: Arc::new(AtomicBool::new(false)),
            },
        );

        info!(task = %name, next_run = ?next_run, "scheduled task");
        Ok(id)
    }

    pub async fn get_task(&self, id: &str) -> Option<ScheduledTask> {
        self.tasks.lock().await.get(id).cloned()
    }

    /// Execute a task immediately and wait for it. Refused while a
    /// scheduled run of the same task is in flight.
    pub async fn execute_now(&self, id: &str) -> Result<TaskResult> {
        let Some(runner) = self.runners.lock().await.get(id).cloned() else {
            bail!("No executor for task: {}", id)
        };
        if runner.in_flight.swap(true, Ordering::SeqCst) {
            bail!("Task {} is already running", id)
        }
        Ok(run_task(self.tasks.clone(), id.to_string(), runner).await)
    }

    /// Ids of enabled tasks due at `now`
    pub async fn get_due_tasks(&self, now: DateTime<Utc>) -> Vec<String> {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|t| t.enabled && t.next_run.map_or(false, |next| next <= now))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Start every due task in the background, skipping those still running
    /// from a previous trigger. Each due task's next run is advanced either way.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        for id in self.get_due_tasks(now).await {
            let name = {
                let mut tasks = self.tasks.lock().await;
                let Some(task) = tasks.get_mut(&id) else {
                    continue;
                };
                task.next_run = task.schedule.next_after(now).ok().flatten();
                task.name.clone()
            };

            let Some(runner) = self.runners.lock().await.get(&id).cloned() else {
                warn!(task = %name, "due task has no executor");
                continue;
            };

            if runner.in_flight.swap(true, Ordering::SeqCst) {
                warn!(task = %name, "previous run still in progress, skipping");
                if let Some(task) = self.tasks.lock().await.get_mut(&id) {
                    task.skipped_count += 1;
                }
                outcome.skipped.push(id);
                continue;
            }

            debug!(task = %name, "starting task");
            let handle = tokio::spawn(run_task(self.tasks.clone(), id.clone(), runner));
            let mut in_flight = self.in_flight.lock().await;
            in_flight.retain(|h| !h.is_finished());
            in_flight.push(handle);
            outcome.started.push(id);
        }

        outcome
    }

    /// Run the scheduler loop until [`stop`](Self::stop) is called
    pub async fn start(&self) {
        {
            let mut running = self.running.lock().await;
            if *running {
                warn!("Scheduler already running");
                return;
            }
            *running = true;
        }

        info!("Scheduler started");

        while *self.running.lock().await {
            self.tick(Utc::now()).await;
            sleep(TICK).await;
        }

        info!("Scheduler stopped");
    }

    /// Stop the loop and wait for every run already started. Returns how
    /// many runs were awaited.
    pub async fn stop(&self) -> usize {
        *self.running.lock().await = false;
        info!("Stopping scheduler...");

        let handles = std::mem::take(&mut *self.in_flight.lock().await);
        let mut awaited = 0;
        for handle in handles {
            if handle.is_finished() {
                continue;
            }
            awaited += 1;
            if let Err(e) = handle.await {
                error!(error = %e, "task panicked or was aborted");
            }
        }
        if awaited > 0 {
            info!(runs = awaited, "waited for in-flight runs");
        }
        awaited
    }

    pub async fn stats(&self) -> SchedulerStats {
        let tasks = self.tasks.lock().await;
        SchedulerStats {
            total_tasks: tasks.len(),
            enabled_tasks: tasks.values().filter(|t| t.enabled).count(),
            total_runs: tasks.values().map(|t| t.run_count).sum(),
            total_skipped: tasks.values().map(|t| t.skipped_count).sum(),
            is_running: *self.running.lock().await,
        }
    }
}

/// Run one execution to completion, record it and release the in-flight flag
async fn run_task(
    tasks: Arc<Mutex<HashMap<String, ScheduledTask>>>,
    id: String,
    runner: TaskRunner,
) -> TaskResult {
    let start = std::time::Instant::now();
    let result = (runner.executor)().await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let name = {
        let mut tasks = tasks.lock().await;
        match tasks.get_mut(&id) {
            Some(task) => {
                task.last_run = Some(Utc::now());
                task.run_count += 1;
                task.name.clone()
            }
            None => id.clone(),
        }
    };
    runner.in_flight.store(false, Ordering::SeqCst);

    match result {
        Ok(message) => {
            info!(task = %name, duration_ms, "{}", message);
            TaskResult {
                task_id: id,
                success: true,
                message,
                duration_ms,
            }
        }
        Err(e) => {
            error!(task = %name, duration_ms, error = %e, "task failed");
            TaskResult {
                task_id: id,
                success: false,
                message: e.to_string(),
                duration_ms,
            }
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub total_runs: u64,
    pub total_skipped: u64,
    pub is_running: bool,
}

/// A task that runs every `interval_secs`
pub fn create_recurring_task(name: &str, interval_secs: u64, description: Option<&str>) -> ScheduledTask {
    new_task(name, TaskSchedule::Interval(interval_secs), description)
}

/// A task driven by a cron expression
pub fn create_cron_task(name: &str, cron_expr: &str, description: Option<&str>) -> Result<ScheduledTask> {
    TaskSchedule::parse_cron(cron_expr)?;
    Ok(new_task(name, TaskSchedule::Cron(cron_expr.to_string()), description))
}

fn new_task(name: &str, schedule: TaskSchedule, description: Option<&str>) -> ScheduledTask {
    ScheduledTask {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        schedule,
        description: description.map(|s| s.to_string()),
        enabled: true,
        last_run: None,
        next_run: None,
        run_count: 0,
        skipped_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_interval_schedule() {
        let from = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let next = TaskSchedule::Interval(300).next_after(from).unwrap();
        assert_eq!(next, Some(from + chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_cron_schedule_is_utc() {
        let from = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let next = TaskSchedule::Cron("0 0 2 * * *".to_string()).next_after(from).unwrap();
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2026, 3, 15, 2, 0, 0).unwrap()));
    }

    #[test]
    fn test_invalid_cron_rejected() {
        assert!(TaskSchedule::parse_cron("every day at noon").is_err());
        assert!(create_cron_task("bad", "not a cron", None).is_err());
    }

    #[test]
    fn test_create_recurring_task() {
        let task = create_recurring_task("detect", 300, Some("short cycle"));
        assert_eq!(task.name, "detect");
        assert_eq!(task.schedule, TaskSchedule::Interval(300));
        assert!(task.enabled);
    }

    #[tokio::test]
    async fn test_execute_now() {
        let scheduler = TaskScheduler::new();
        let task = create_recurring_task("test", 60, None);

        let id = scheduler
            .add_task_with_executor(task, || async { Ok("Executed!".to_string()) })
            .await
            .unwrap();

        let result = scheduler.execute_now(&id).await.unwrap();
        assert!(result.success);
        assert_eq!(result.message, "Executed!");
        assert_eq!(scheduler.get_task(&id).await.unwrap().run_count, 1);
    }

    #[tokio::test]
    async fn test_failed_run_keeps_task_scheduled() {
        let scheduler = TaskScheduler::new();
        let task = create_recurring_task("flaky", 60, None);

        let id = scheduler
            .add_task_with_executor(task, || async { Err(anyhow::anyhow!("store unavailable")) })
            .await
            .unwrap();

        let result = scheduler.execute_now(&id).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "store unavailable");

        let task = scheduler.get_task(&id).await.unwrap();
        assert!(task.enabled);
        assert!(task.next_run.is_some());
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_skipped() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let id = scheduler
            .add_task_with_executor(create_recurring_task("slow", 0, None), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(200)).await;
                    Ok("done".to_string())
                }
            })
            .await
            .unwrap();

        let now = Utc::now() + chrono::Duration::seconds(1);
        let first = scheduler.tick(now).await;
        assert_eq!(first.started, vec![id.clone()]);

        let second = scheduler.tick(now).await;
        assert!(second.started.is_empty());
        assert_eq!(second.skipped, vec![id.clone()]);

        sleep(Duration::from_millis(400)).await;
        let third = scheduler.tick(now + chrono::Duration::seconds(1)).await;
        assert_eq!(third.started, vec![id.clone()]);

        sleep(Duration::from_millis(400)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let stats = scheduler.stats().await;
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.total_skipped, 1);
    }

    #[tokio::test]
    async fn test_stop_waits_for_running_task() {
        let scheduler = TaskScheduler::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let id = scheduler
            .add_task_with_executor(create_recurring_task("digest", 60, None), move || {
                let flag = flag.clone();
                async move {
                    sleep(Duration::from_millis(300)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok("digest done".to_string())
                }
            })
            .await
            .unwrap();

        let outcome = scheduler.tick(Utc::now() + chrono::Duration::seconds(61)).await;
        assert_eq!(outcome.started, vec![id.clone()]);
        assert!(!finished.load(Ordering::SeqCst));

        assert_eq!(scheduler.stop().await, 1);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(scheduler.get_task(&id).await.unwrap().run_count, 1);
        assert!(!scheduler.stats().await.is_running);
    }
}
