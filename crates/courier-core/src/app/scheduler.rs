//! Scheduler - ループの定期起動
//!
//! # 設計
//! - ジョブごとに 1 つの driver タスク（sleep → fire → sleep ...）
//! - `OverlapPolicy::Skip` なら前回がまだ走っている間の起動は捨てる
//! - 失敗はログに出して次回の起動で再試行（プロセスは落とさない）
//! - shutdown は watch チャネル。新しい起動を止め、実行中のサイクルは最後まで待つ

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::domain::{CourierError, CycleReport};

/// One runnable unit of work: a loop invocation.
#[async_trait]
pub trait Cycle: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> Result<CycleReport, CourierError>;
}

/// What happens when a firing comes due while the previous one is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    #[default]
    Skip,
    Allow,
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(OverlapPolicy::Skip),
            "allow" => Ok(OverlapPolicy::Allow),
            other => Err(format!("unknown overlap policy `{other}` (expected skip|allow)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    /// Upper bound of a random delay added to every interval.
    pub jitter: Duration,
    pub overlap: OverlapPolicy,
}

impl Schedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            jitter: Duration::ZERO,
            overlap: OverlapPolicy::Skip,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        self.interval + Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Result of asking a job to fire.
#[derive(Debug)]
pub enum Firing {
    Started(JoinHandle<()>),
    /// The previous cycle is still running and overlap is not allowed.
    Skipped,
}

/// Decrements the in-flight counter when the cycle ends (panics included).
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A cycle bound to its schedule.
#[derive(Clone)]
pub struct ScheduledJob {
    schedule: Schedule,
    cycle: Arc<dyn Cycle>,
    in_flight: Arc<AtomicUsize>,
}

impl ScheduledJob {
    pub fn new(schedule: Schedule, cycle: Arc<dyn Cycle>) -> Self {
        Self {
            schedule,
            cycle,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.cycle.name()
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start one invocation in the background unless the overlap policy forbids it.
    pub fn fire(&self) -> Firing {
        let job = self.name();
        match self.schedule.overlap {
            OverlapPolicy::Skip => {
                if self
                    .in_flight
                    .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    debug!(job, "[{job}] previous cycle still running, skipping");
                    return Firing::Skipped;
                }
            }
            OverlapPolicy::Allow => {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
            }
        }

        let guard = InFlight(Arc::clone(&self.in_flight));
        let cycle = Arc::clone(&self.cycle);
        Firing::Started(tokio::spawn(async move {
            let _guard = guard;
            run_logged(cycle.as_ref()).await;
        }))
    }
}

async fn run_logged(cycle: &dyn Cycle) {
    let job = cycle.name();
    match cycle.run_once().await {
        Ok(report) if report.is_idle() => {}
        Ok(report) => info!(
            job,
            run_id = %report.run_id,
            selected = report.selected,
            published = report.published,
            committed = report.committed,
            failed = report.failed.len(),
            "[{job}] cycle finished"
        ),
        Err(err) => error!(
            job,
            kind = ?err.kind(),
            error = %err,
            "[{job}] cycle failed; retrying on next firing"
        ),
    }
}

/// Collects jobs and starts one driver task per job.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, schedule: Schedule, cycle: Arc<dyn Cycle>) -> Self {
        self.jobs.push(ScheduledJob::new(schedule, cycle));
        self
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::with_capacity(self.jobs.len());
        for job in self.jobs {
            info!(
                job = job.name(),
                interval_ms = job.schedule.interval.as_millis() as u64,
                overlap = ?job.schedule.overlap,
                "scheduled"
            );
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(drive(job, rx)));
        }
        SchedulerHandle { shutdown_tx, joins }
    }
}

/// Scheduler handle.
/// - `request_shutdown()` で新しい起動を止める
/// - `shutdown_and_join()` で実行中のサイクルの終了まで待つ
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn drive(job: ScheduledJob, mut shutdown_rx: watch::Receiver<bool>) {
    let mut running: Vec<JoinHandle<()>> = Vec::new();
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(job.schedule.next_delay()) => {}
        }

        if let Firing::Started(handle) = job.fire() {
            running.push(handle);
        }
        running.retain(|handle| !handle.is_finished());
    }

    for handle in running {
        let _ = handle.await;
    }
    debug!(job = job.name(), "driver stopped");
}
