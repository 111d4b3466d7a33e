//! Background acquisition scheduling.
//!
//! The [`ScrapeCoordinator`] owns the status of every region this process
//! has been asked about and the registry of fetch jobs running for them.
//!
//! # Region lifecycle
//!
//! ```text
//! NotScraped ──trigger──▶ InProgress ──ok──▶ Done ──trigger(force)──▶ InProgress
//!                             │
//!                             └──fatal/timeout──▶ Failed ──trigger──▶ InProgress
//! ```
//!
//! All transitions for one region happen under that region's own lock, so
//! concurrent triggers for the same key start exactly one job and the rest
//! join it. The map from key to lock is guarded separately and only held
//! long enough to find or create the entry.
//!
//! # Job lifetime
//!
//! Jobs run on their own tokio tasks and are not tied to the request that
//! triggered them. Each is bounded by `max_job_duration`; a job that runs
//! past it is aborted and its region marked `Failed`. The coordinator
//! counts in-flight jobs so a host can [`shutdown`](ScrapeCoordinator::shutdown)
//! and wait for every job to reach a terminal state before exiting.
//!
//! # Retention
//!
//! At most `region_limit` regions are tracked. When a new region would
//! exceed it, the finished regions with the oldest attempts are forgotten
//! and behave as `NotScraped` again. Running regions are never evicted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::CoordinatorError;
use crate::ingest::{IngestProgress, IngestReport, TrailIngester};
use crate::region::{RegionDescriptor, RegionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStatus {
    NotScraped,
    InProgress,
    Done,
    Failed,
}

/// Terminal result of a fetch job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub written: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn from_report(report: IngestReport) -> Self {
        Self {
            written: report.written,
            skipped: report.skipped,
            error: report.fatal.map(|e| e.to_string()),
            finished_at: Utc::now(),
        }
    }

    fn failed(progress: &IngestProgress, reason: String) -> Self {
        Self {
            written: progress.written(),
            skipped: progress.skipped(),
            error: Some(reason),
            finished_at: Utc::now(),
        }
    }
}

struct JobShared {
    id: Uuid,
    region: RegionDescriptor,
    started_at: DateTime<Utc>,
    progress: IngestProgress,
    outcome: watch::Receiver<Option<JobOutcome>>,
}

/// Shared reference to one fetch job. Cheap to clone.
#[derive(Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.shared.id)
            .field("region", &self.shared.region.key)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl JobHandle {
    fn start(region: RegionDescriptor) -> (Self, watch::Sender<Option<JobOutcome>>) {
        let (tx, rx) = watch::channel(None);
        let handle = Self {
            shared: Arc::new(JobShared {
                id: Uuid::new_v4(),
                region,
                started_at: Utc::now(),
                progress: IngestProgress::default(),
                outcome: rx,
            }),
        };
        (handle, tx)
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn region(&self) -> &RegionDescriptor {
        &self.shared.region
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    pub fn progress(&self) -> &IngestProgress {
        &self.shared.progress
    }

    /// The outcome, once the job has finished.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.shared.outcome.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.outcome.borrow().is_some()
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self) -> JobOutcome {
        let mut rx = self.shared.outcome.clone();
        let result = rx.wait_for(|o| o.is_some()).await.map(|o| (*o).clone());
        match result {
            Ok(Some(outcome)) => outcome,
            // The completer is dropped only if the supervising task died.
            _ => JobOutcome::failed(&self.shared.progress, "job abandoned".to_string()),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let outcome = self.outcome();
        let (state, written, skipped, error, finished_at) = match &outcome {
            None => (
                "running",
                self.shared.progress.written(),
                self.shared.progress.skipped(),
                None,
                None,
            ),
            Some(o) => (
                if o.is_success() { "succeeded" } else { "failed" },
                o.written,
                o.skipped,
                o.error.clone(),
                Some(o.finished_at),
            ),
        };
        JobSnapshot {
            id: self.id(),
            region_key: self.shared.region.key.clone(),
            label: self.shared.region.label.clone(),
            state,
            written,
            skipped,
            error,
            started_at: self.shared.started_at,
            finished_at,
        }
    }
}

/// Serializable view of a job for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: Uuid,
    pub region_key: RegionKey,
    pub label: String,
    /// `running`, `succeeded`, or `failed`.
    pub state: &'static str,
    pub written: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Serializable view of a region.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSnapshot {
    pub key: RegionKey,
    pub status: RegionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSnapshot>,
}

/// How a [`ScrapeCoordinator::trigger`] call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// A new job was started.
    Started,
    /// A job for the region was already running; its handle is returned.
    Joined,
    /// The region is already loaded and `force` was not set.
    AlreadyDone,
}

#[derive(Debug, Clone)]
pub struct Trigger {
    pub handle: JobHandle,
    pub disposition: Disposition,
}

enum Phase {
    NotScraped,
    InProgress(JobHandle),
    Done(JobHandle),
    Failed(JobHandle),
}

struct RegionEntry {
    phase: Phase,
    last_attempt: Option<DateTime<Utc>>,
}

impl RegionEntry {
    fn new() -> Self {
        Self {
            phase: Phase::NotScraped,
            last_attempt: None,
        }
    }

    fn snapshot(&self, key: &RegionKey) -> RegionSnapshot {
        let (status, job) = match &self.phase {
            Phase::NotScraped => (RegionStatus::NotScraped, None),
            Phase::InProgress(h) => (RegionStatus::InProgress, Some(h.snapshot())),
            Phase::Done(h) => (RegionStatus::Done, Some(h.snapshot())),
            Phase::Failed(h) => (RegionStatus::Failed, Some(h.snapshot())),
        };
        RegionSnapshot {
            key: key.clone(),
            status,
            last_attempt: self.last_attempt,
            job,
        }
    }
}

struct Inner {
    ingester: Arc<TrailIngester>,
    regions: Mutex<HashMap<RegionKey, Arc<Mutex<RegionEntry>>>>,
    in_flight: watch::Sender<usize>,
    closed: AtomicBool,
    max_job_duration: Duration,
    region_limit: usize,
}

/// Deduplicating scheduler for region fetch jobs. Cheap to clone.
#[derive(Clone)]
pub struct ScrapeCoordinator {
    inner: Arc<Inner>,
}

/// Regions tracked before finished ones start being evicted.
pub const DEFAULT_REGION_LIMIT: usize = 10_000;

impl ScrapeCoordinator {
    pub fn new(ingester: Arc<TrailIngester>, max_job_duration: Duration) -> Self {
        Self::with_region_limit(ingester, max_job_duration, DEFAULT_REGION_LIMIT)
    }

    pub fn with_region_limit(
        ingester: Arc<TrailIngester>,
        max_job_duration: Duration,
        region_limit: usize,
    ) -> Self {
        let (in_flight, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(Inner {
                ingester,
                regions: Mutex::new(HashMap::new()),
                in_flight,
                closed: AtomicBool::new(false),
                max_job_duration,
                region_limit: region_limit.max(1),
            }),
        }
    }

    /// Ensure a fetch for `region` is running or done.
    ///
    /// Returns immediately; the job (if any) runs in the background.
    #[instrument(skip(self, region), fields(region = %region.key))]
    pub async fn trigger(
        &self,
        region: RegionDescriptor,
        force: bool,
    ) -> Result<Trigger, CoordinatorError> {
        let slot = self.inner.slot(&region.key).await;
        let mut entry = slot.lock().await;

        match &entry.phase {
            Phase::InProgress(handle) => {
                debug!(job = %handle.id(), "joining running job");
                return Ok(Trigger {
                    handle: handle.clone(),
                    disposition: Disposition::Joined,
                });
            }
            Phase::Done(handle) if !force => {
                debug!(job = %handle.id(), "region already loaded");
                return Ok(Trigger {
                    handle: handle.clone(),
                    disposition: Disposition::AlreadyDone,
                });
            }
            _ => {}
        }

        // Count before checking `closed` so shutdown either sees this job or
        // this call sees the shutdown.
        self.inner.in_flight.send_modify(|n| *n += 1);
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
            return Err(CoordinatorError::ShuttingDown);
        }

        let (handle, completer) = JobHandle::start(region);
        entry.phase = Phase::InProgress(handle.clone());
        entry.last_attempt = Some(handle.started_at());
        drop(entry);

        info!(job = %handle.id(), force, "fetch job started");
        let inner = Arc::clone(&self.inner);
        let job = handle.clone();
        tokio::spawn(async move { inner.supervise(job, slot, completer).await });

        Ok(Trigger {
            handle,
            disposition: Disposition::Started,
        })
    }

    /// Current state of `key`. Unknown keys report `NotScraped`.
    pub async fn status(&self, key: &RegionKey) -> RegionSnapshot {
        let slot = self.inner.regions.lock().await.get(key).cloned();
        match slot {
            Some(slot) => slot.lock().await.snapshot(key),
            None => RegionEntry::new().snapshot(key),
        }
    }

    /// Every region this coordinator has seen, ordered by key.
    pub async fn regions(&self) -> Vec<RegionSnapshot> {
        let slots: Vec<(RegionKey, Arc<Mutex<RegionEntry>>)> = self
            .inner
            .regions
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut out = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            out.push(slot.lock().await.snapshot(&key));
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Number of jobs not yet in a terminal state.
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Wait until no job is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting new jobs and wait for running ones to finish.
    ///
    /// Joins and already-done lookups keep working; only triggers that
    /// would start a job fail with [`CoordinatorError::ShuttingDown`].
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let running = self.in_flight();
        if running > 0 {
            info!(running, "waiting for fetch jobs to finish");
        }
        self.wait_idle().await;
        info!("coordinator drained");
    }
}

impl Inner {
    async fn slot(&self, key: &RegionKey) -> Arc<Mutex<RegionEntry>> {
        let mut regions = self.regions.lock().await;
        if !regions.contains_key(key) && regions.len() >= self.region_limit {
            self.evict_finished(&mut regions);
        }
        Arc::clone(
            regions
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(RegionEntry::new()))),
        )
    }

    /// Drop the oldest finished regions so one more fits under the limit.
    /// Entries that are running, or that another caller still holds, are kept.
    fn evict_finished(&self, regions: &mut HashMap<RegionKey, Arc<Mutex<RegionEntry>>>) {
        let mut finished: Vec<(Option<DateTime<Utc>>, RegionKey)> = regions
            .iter()
            .filter(|(_, slot)| Arc::strong_count(slot) == 1)
            .filter_map(|(key, slot)| {
                let entry = slot.try_lock().ok()?;
                match entry.phase {
                    Phase::InProgress(_) => None,
                    _ => Some((entry.last_attempt, key.clone())),
                }
            })
            .collect();
        finished.sort();

        let excess = regions.len() + 1 - self.region_limit;
        for (_, key) in finished.into_iter().take(excess) {
            debug!(region = %key, "forgetting finished region");
            regions.remove(&key);
        }
    }

    /// Run `job` on a worker task, enforce the time limit, record the
    /// terminal state, then release waiters.
    async fn supervise(
        self: Arc<Self>,
        job: JobHandle,
        slot: Arc<Mutex<RegionEntry>>,
        completer: watch::Sender<Option<JobOutcome>>,
    ) {
        let ingester = Arc::clone(&self.ingester);
        let worker_job = job.clone();
        let mut worker =
            tokio::spawn(async move { ingester.run(worker_job.region(), worker_job.progress()).await });

        let outcome = match tokio::time::timeout(self.max_job_duration, &mut worker).await {
            Ok(Ok(report)) => JobOutcome::from_report(report),
            Ok(Err(join_err)) => {
                JobOutcome::failed(job.progress(), format!("ingestion worker crashed: {}", join_err))
            }
            Err(_) => {
                worker.abort();
                JobOutcome::failed(
                    job.progress(),
                    format!(
                        "fetch exceeded the {}s time limit",
                        self.max_job_duration.as_secs_f64()
                    ),
                )
            }
        };

        {
            let mut entry = slot.lock().await;
            entry.phase = if outcome.is_success() {
                Phase::Done(job.clone())
            } else {
                Phase::Failed(job.clone())
            };
            entry.last_attempt = Some(outcome.finished_at);
        }
        drop(slot);

        match &outcome.error {
            None => info!(
                region = %job.region().key,
                job = %job.id(),
                written = outcome.written,
                skipped = outcome.skipped,
                "fetch job succeeded"
            ),
            Some(error) => warn!(
                region = %job.region().key,
                job = %job.id(),
                written = outcome.written,
                skipped = outcome.skipped,
                error = %error,
                "fetch job failed"
            ),
        }

        completer.send_replace(Some(outcome));
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}
