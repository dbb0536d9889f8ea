//! Periodic job runner.
//!
//! Each job fires on its own cron schedule. A job still running when its
//! next tick comes round is skipped rather than queued, and a failed run is
//! logged without affecting later ticks.

pub mod jobs;

use anyhow::{Context, Result};
use chrono::Utc;
use cron::Schedule as CronSchedule;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use self::jobs::Pipeline;

pub type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type JobTask = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    /// The previous run had not finished.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub running: bool,
}

pub struct Job {
    name: String,
    expr: String,
    schedule: CronSchedule,
    task: JobTask,
    running: AtomicBool,
}

/// Clears the running flag however the run ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Job {
    pub fn new(name: &str, expr: &str, task: JobTask) -> Result<Self> {
        let schedule = CronSchedule::from_str(expr)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("invalid cron expression '{}' for job {}", expr, name))?;
        Ok(Self {
            name: name.to_string(),
            expr: expr.to_string(),
            schedule,
            task,
            running: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the task now unless a previous run is still in flight.
    pub async fn run_once(&self) -> RunOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(job = %self.name, "skipping, already running");
            return RunOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        let start = Instant::now();
        match (self.task)().await {
            Ok(()) => {
                info!(job = %self.name, elapsed_ms = start.elapsed().as_millis() as u64, "completed");
                RunOutcome::Completed
            }
            Err(e) => {
                error!(job = %self.name, error = %format!("{:#}", e), "failed");
                RunOutcome::Failed
            }
        }
    }

    /// Fire on every tick until `shutdown`. In-flight runs are awaited
    /// before returning.
    async fn drive(self: Arc<Self>, shutdown: CancellationToken) {
        let mut in_flight = JoinSet::new();
        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                info!(job = %self.name, "schedule has no further runs");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let job = self.clone();
            in_flight.spawn(async move { job.run_once().await });
            // Reap finished runs so the set does not grow.
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
    }
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Arc<Job>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, expr: &str, task: JobTask) -> Result<()> {
        let job = Job::new(name, expr, task)?;
        info!(job = %name, schedule = %expr, "registered");
        self.jobs.push(Arc::new(job));
        Ok(())
    }

    pub fn job(&self, name: &str) -> Option<Arc<Job>> {
        self.jobs.iter().find(|j| j.name == name).cloned()
    }

    pub fn status(&self) -> Vec<JobStatus> {
        self.jobs
            .iter()
            .map(|j| JobStatus {
                name: j.name.clone(),
                schedule: j.expr.clone(),
                running: j.is_running(),
            })
            .collect()
    }

    /// Drive every job until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut loops = JoinSet::new();
        for job in &self.jobs {
            loops.spawn(job.clone().drive(shutdown.clone()));
        }
        info!(jobs = self.jobs.len(), "scheduler started");

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "job loop panicked");
            }
        }
        info!("scheduler stopped");
    }
}

/// Wrap an async closure as a [`JobTask`].
pub fn task<F, Fut>(f: F) -> JobTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as JobFuture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[test]
    fn test_invalid_cron_is_rejected() {
        let err = Job::new("bad", "every minute", task(|| async { Ok(()) })).err().unwrap();
        assert!(format!("{:#}", err).contains("invalid cron expression"));
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let release = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let (r, n) = (release.clone(), runs.clone());
        let job = Arc::new(
            Job::new(
                "slow",
                "0 * * * * *",
                task(move || {
                    let (r, n) = (r.clone(), n.clone());
                    async move {
                        n.fetch_add(1, Ordering::SeqCst);
                        r.notified().await;
                        Ok(())
                    }
                }),
            )
            .unwrap(),
        );

        let first = tokio::spawn({
            let job = job.clone();
            async move { job.run_once().await }
        });
        while !job.is_running() {
            tokio::task::yield_now().await;
        }

        assert_eq!(job.run_once().await, RunOutcome::Skipped);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        release.notify_one();
        assert_eq!(first.await.unwrap(), RunOutcome::Completed);
        assert!(!job.is_running());
    }

    #[tokio::test]
    async fn test_failure_clears_running_flag() {
        let job = Job::new("flaky", "0 * * * * *", task(|| async { anyhow::bail!("db unreachable") })).unwrap();
        assert_eq!(job.run_once().await, RunOutcome::Failed);
        assert!(!job.is_running());
        assert_eq!(job.run_once().await, RunOutcome::Failed);
    }

    #[tokio::test]
    async fn test_status_and_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        let n = runs.clone();
        scheduler
            .register(
                "tick",
                "* * * * * *",
                task(move || {
                    let n = n.clone();
                    async move {
                        n.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();

        assert_eq!(
            scheduler.status(),
            vec![JobStatus { name: "tick".into(), schedule: "* * * * * *".into(), running: false }]
        );

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            stopper.cancel();
        });
        scheduler.run(shutdown).await;

        assert!(runs.load(Ordering::SeqCst) >= 1);
    }
}
