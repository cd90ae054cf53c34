//! Feed scheduler.
//!
//! One loop pops due jobs from a heap ordered by next-run time and hands them to a bounded
//! worker pool. Runs of the same feed never overlap; different feeds run concurrently.
//! Failed download-class runs back off exponentially; other failures wait for the next
//! interval. Jobs are never dropped from the schedule.

use crate::config::{FeedConfig, FeedJobSpec, SchedulerConfig};
use crate::delta::DeltaFeedProcessor;
use crate::download::Downloader;
use crate::error::FeedError;
use crate::full::FullFeedProcessor;
use crate::job::{backoff, FeedJob, FeedKind, JobStatus, RunReport};
use parking_lot::Mutex;
use shop_core::{SearchEngine, StoreError};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Loop wake-up period when nothing is queued.
const IDLE_WAIT: Duration = Duration::from_secs(60);
/// How long shutdown waits for in-flight runs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// Set while a feed is running; cleared on drop, including on panic.
struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, atomic::Ordering::SeqCst, atomic::Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard { flag: flag.clone() })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, atomic::Ordering::SeqCst);
    }
}

/// Heap entry. Entries whose `seq` no longer matches the job's are stale and skipped.
#[derive(Debug, PartialEq, Eq)]
struct Due {
    at: Instant,
    kind: FeedKind,
    job: String,
    seq: u64,
}

fn urgency(kind: FeedKind) -> u8 {
    match kind {
        FeedKind::Delta => 1,
        FeedKind::Full => 0,
    }
}

impl Ord for Due {
    // max-heap: earliest first, then deltas before fulls
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| urgency(self.kind).cmp(&urgency(other.kind)))
            .then_with(|| other.job.cmp(&self.job))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct JobSlot {
    job: FeedJob,
    running: Arc<AtomicBool>,
    seq: u64,
}

struct Inner {
    engine: Arc<SearchEngine>,
    full: FullFeedProcessor,
    delta: DeltaFeedProcessor,
    config: SchedulerConfig,
    jobs: Mutex<HashMap<String, JobSlot>>,
    queue: Mutex<BinaryHeap<Due>>,
    wake: Notify,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(engine: Arc<SearchEngine>, feed: &FeedConfig, config: SchedulerConfig) -> Result<Self, FeedError> {
        let downloader = Arc::new(Downloader::new(feed)?);
        let workers = config.workers.max(1);
        Ok(Self {
            inner: Arc::new(Inner {
                full: FullFeedProcessor::new(engine.clone(), downloader.clone(), feed),
                delta: DeltaFeedProcessor::new(engine.clone(), downloader, feed),
                engine,
                config,
                jobs: Mutex::new(HashMap::new()),
                queue: Mutex::new(BinaryHeap::new()),
                wake: Notify::new(),
                workers: Arc::new(Semaphore::new(workers)),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn shutdown(&self) {
        info!("scheduler shutdown requested");
        self.inner.shutdown.cancel();
    }

    /// Add or replace a job. It is due at its persisted `next_run`, or immediately.
    pub fn schedule(&self, job: FeedJob) {
        let delay = job
            .next_run
            .map(|at| Duration::from_secs((at - unix_now()).max(0) as u64))
            .unwrap_or_default();
        let (id, kind, active) = (job.id.clone(), job.kind, job.active);
        let seq = {
            let mut jobs = self.inner.jobs.lock();
            let slot = jobs
                .entry(id.clone())
                .or_insert_with(|| JobSlot { job: job.clone(), running: Arc::default(), seq: 0 });
            slot.job = job;
            slot.seq += 1;
            slot.seq
        };
        if active {
            self.inner.enqueue(&id, kind, delay, seq);
        }
        self.inner.persist(&id);
        info!(job = %id, %kind, delay_secs = delay.as_secs(), "feed job scheduled");
    }

    /// Validate a config entry and schedule it. A job already known under the same id (for
    /// instance restored from the store) only takes the entry's source, format and interval;
    /// its status, failure count and paused flag are kept, and so is its place in the queue.
    pub fn register(&self, spec: &FeedJobSpec) -> Result<FeedJob, FeedError> {
        let fresh = FeedJob::from_spec(spec, &self.inner.config)?;
        let merged = {
            let mut jobs = self.inner.jobs.lock();
            jobs.get_mut(&fresh.id).map(|slot| {
                let changed = slot.job.adopt_spec(&fresh);
                (slot.job.clone(), changed)
            })
        };
        match merged {
            Some((job, changed)) => {
                if changed {
                    self.inner.persist(&job.id);
                }
                debug!(job = %job.id, changed, "feed job already known, config merged");
                Ok(job)
            }
            None => {
                self.schedule(fresh.clone());
                Ok(fresh)
            }
        }
    }

    /// Re-schedule every job persisted by an earlier process.
    pub fn restore(&self) -> Result<usize, StoreError> {
        let Some(store) = self.inner.engine.store() else { return Ok(0) };
        let jobs: Vec<FeedJob> = store.load_jobs()?;
        let count = jobs.len();
        for mut job in jobs {
            // a run interrupted by the previous shutdown
            if job.last_status == JobStatus::Running {
                job.last_status = JobStatus::Pending;
            }
            self.schedule(job);
        }
        Ok(count)
    }

    pub fn jobs(&self) -> Vec<FeedJob> {
        let mut jobs: Vec<FeedJob> = self.inner.jobs.lock().values().map(|slot| slot.job.clone()).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    pub fn job(&self, id: &str) -> Option<FeedJob> {
        self.inner.jobs.lock().get(id).map(|slot| slot.job.clone())
    }

    /// Make a job due now. Returns false for unknown jobs.
    pub fn trigger(&self, id: &str) -> bool {
        let queued = {
            let mut jobs = self.inner.jobs.lock();
            let Some(slot) = jobs.get_mut(id) else { return false };
            slot.seq += 1;
            slot.job.active.then_some((slot.job.kind, slot.seq))
        };
        if let Some((kind, seq)) = queued {
            self.inner.enqueue(id, kind, Duration::ZERO, seq);
        }
        true
    }

    /// Pause or resume a job. Paused jobs keep their status and stay listed.
    pub fn set_active(&self, id: &str, active: bool) -> bool {
        let resumed = {
            let mut jobs = self.inner.jobs.lock();
            let Some(slot) = jobs.get_mut(id) else { return false };
            let resumed = active && !slot.job.active;
            slot.job.active = active;
            slot.seq += 1;
            resumed.then_some((slot.job.kind, slot.seq))
        };
        if let Some((kind, seq)) = resumed {
            self.inner.enqueue(id, kind, Duration::ZERO, seq);
        }
        self.inner.persist(id);
        info!(job = %id, active, "feed job activity changed");
        true
    }

    /// Run a job now on the calling task. `None` when the job is unknown or already running.
    pub async fn run_job(&self, id: &str) -> Option<Result<RunReport, FeedError>> {
        self.inner.execute(id).await
    }

    pub fn spawn(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    /// Dispatch due jobs until shutdown, then wait briefly for in-flight runs.
    pub async fn run(&self) {
        let inner = &self.inner;
        info!(workers = inner.config.workers, jobs = inner.jobs.lock().len(), "scheduler started");
        let period = inner.config.decay_interval();
        let mut decay = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            let wake_at = inner.queue.lock().peek().map(|due| due.at).unwrap_or_else(|| Instant::now() + IDLE_WAIT);
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = decay.tick() => {
                    inner.engine.decay_suggestions();
                    debug!("suggestion popularity decayed");
                }
                _ = inner.wake.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
            inner.dispatch_due().await;
        }

        let all = inner.config.workers.max(1) as u32;
        if tokio::time::timeout(SHUTDOWN_GRACE, inner.workers.acquire_many(all)).await.is_err() {
            warn!("feed runs still in progress at shutdown");
        }
        info!("scheduler stopped");
    }
}

impl Inner {
    fn enqueue(&self, id: &str, kind: FeedKind, delay: Duration, seq: u64) {
        self.queue.lock().push(Due { at: Instant::now() + delay, kind, job: id.to_string(), seq });
        self.wake.notify_one();
    }

    fn is_current(&self, due: &Due) -> bool {
        self.jobs.lock().get(&due.job).is_some_and(|slot| slot.seq == due.seq && slot.job.active)
    }

    fn persist(&self, id: &str) {
        let Some(store) = self.engine.store() else { return };
        let Some(job) = self.jobs.lock().get(id).map(|slot| slot.job.clone()) else { return };
        if let Err(err) = store.save_job(id, &job) {
            warn!(job = %id, error = %err, "failed to persist feed job");
        }
    }

    async fn dispatch_due(self: &Arc<Self>) {
        loop {
            let due = {
                let mut queue = self.queue.lock();
                match queue.peek() {
                    Some(due) if due.at <= Instant::now() => queue.pop(),
                    _ => None,
                }
            };
            let Some(due) = due else { return };
            if !self.is_current(&due) {
                continue;
            }
            let permit = tokio::select! {
                permit = self.workers.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = self.shutdown.cancelled() => return,
            };
            let inner = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                inner.execute(&due.job).await;
            });
        }
    }

    async fn execute(&self, id: &str) -> Option<Result<RunReport, FeedError>> {
        let (job, running) = {
            let jobs = self.jobs.lock();
            let slot = jobs.get(id)?;
            (slot.job.clone(), slot.running.clone())
        };
        let Some(_guard) = RunGuard::try_acquire(&running) else {
            debug!(job = %id, "feed run already in progress, skipped");
            return None;
        };
        if let Some(slot) = self.jobs.lock().get_mut(id) {
            slot.job.last_status = JobStatus::Running;
        }

        info!(job = %id, project = %job.project, kind = %job.kind, source = %job.source, "feed run started");
        let started = Instant::now();
        let result = match job.kind {
            FeedKind::Full => self.full.process(&job.project, &job.source, job.format).await.map(RunReport::Full),
            FeedKind::Delta => self.delta.process(&job.project, &job.source, job.format).await.map(RunReport::Delta),
        };
        self.finish(id, &result, started.elapsed());
        Some(result)
    }

    fn finish(&self, id: &str, result: &Result<RunReport, FeedError>, elapsed: Duration) {
        let queued = {
            let mut jobs = self.jobs.lock();
            let Some(slot) = jobs.get_mut(id) else { return };
            let job = &mut slot.job;
            job.last_run = Some(now_rfc3339());
            job.last_duration_ms = Some(elapsed.as_millis() as u64);
            job.run_count += 1;

            let delay = match result {
                Ok(report) => {
                    if job.alerting {
                        info!(job = %id, project = %job.project, "feed recovered");
                    }
                    job.last_status = JobStatus::Success;
                    job.last_error = None;
                    job.consecutive_failures = 0;
                    job.alerting = false;
                    job.record_report(report);
                    info!(job = %id, took_ms = elapsed.as_millis() as u64, "feed run succeeded");
                    job.interval()
                }
                Err(err) => {
                    job.last_status = JobStatus::Failed;
                    job.last_error = Some(err.to_string());
                    job.consecutive_failures = job.consecutive_failures.saturating_add(1);
                    let delay = if err.is_retryable() {
                        backoff(
                            job.consecutive_failures,
                            Duration::from_secs(self.config.backoff_base_secs),
                            Duration::from_secs(self.config.backoff_cap_secs),
                        )
                    } else {
                        job.interval()
                    };
                    if job.consecutive_failures >= self.config.alert_after && !job.alerting {
                        job.alerting = true;
                        error!(
                            alert = true,
                            job = %id,
                            project = %job.project,
                            failures = job.consecutive_failures,
                            error = %err,
                            "feed keeps failing"
                        );
                    } else {
                        warn!(
                            job = %id,
                            project = %job.project,
                            failures = job.consecutive_failures,
                            retry_in_secs = delay.as_secs(),
                            error = %err,
                            "feed run failed"
                        );
                    }
                    delay
                }
            };
            job.next_run = Some(unix_now() + delay.as_secs() as i64);
            slot.seq += 1;
            slot.job.active.then_some((slot.job.kind, delay, slot.seq))
        };
        if let Some((kind, delay, seq)) = queued {
            self.enqueue(id, kind, delay, seq);
        }
        self.persist(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::FeedSource;
    use crate::format::FeedFormat;
    use shop_core::{EngineConfig, SnapshotStore};
    use std::path::Path;

    const FEED: &str = r#"[{"id":"A","name":"Nike Air Max 90","url":"/a","price":12990}]"#;

    fn scheduler(engine: Arc<SearchEngine>) -> Scheduler {
        let config = SchedulerConfig { alert_after: 3, ..SchedulerConfig::default() };
        Scheduler::new(engine, &FeedConfig::default(), config).unwrap()
    }

    fn file_job(path: &Path, kind: FeedKind) -> FeedJob {
        FeedJob::new("shop", kind, FeedSource::File(path.to_path_buf()), FeedFormat::Json, Duration::from_secs(3600))
    }

    #[test]
    fn due_order_prefers_earlier_then_delta() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(Due { at: now + Duration::from_secs(5), kind: FeedKind::Delta, job: "late".into(), seq: 1 });
        heap.push(Due { at: now, kind: FeedKind::Full, job: "full".into(), seq: 1 });
        heap.push(Due { at: now, kind: FeedKind::Delta, job: "delta".into(), seq: 1 });
        let order: Vec<String> = std::iter::from_fn(|| heap.pop().map(|d| d.job)).collect();
        assert_eq!(order, vec!["delta", "full", "late"]);
    }

    #[test]
    fn run_guard_serializes_and_releases() {
        let flag = Arc::new(AtomicBool::new(false));
        let first = RunGuard::try_acquire(&flag);
        assert!(first.is_some());
        assert!(RunGuard::try_acquire(&flag).is_none());
        drop(first);
        assert!(RunGuard::try_acquire(&flag).is_some());
    }

    #[tokio::test]
    async fn success_records_counts_and_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(&path, FEED).unwrap();
        let engine = Arc::new(SearchEngine::new(EngineConfig::default()));
        let scheduler = scheduler(engine.clone());
        let job = file_job(&path, FeedKind::Full);
        let id = job.id.clone();
        scheduler.schedule(job);

        let report = scheduler.run_job(&id).await.unwrap().unwrap();
        assert!(matches!(report, RunReport::Full(ref r) if r.items_indexed == 1));
        let job = scheduler.job(&id).unwrap();
        assert_eq!(job.last_status, JobStatus::Success);
        assert_eq!(job.items_indexed, 1);
        assert_eq!(job.run_count, 1);
        let next = job.next_run.unwrap() - unix_now();
        assert!((3590..=3600).contains(&next));
        assert_eq!(engine.stats("shop").unwrap().documents, 1);
    }

    #[tokio::test]
    async fn download_failures_back_off_and_alert_without_removal() {
        let engine = Arc::new(SearchEngine::new(EngineConfig::default()));
        let scheduler = scheduler(engine);
        let job = file_job(Path::new("/nonexistent/feed.json"), FeedKind::Full);
        let id = job.id.clone();
        scheduler.schedule(job);

        let mut delays = Vec::new();
        for _ in 0..4 {
            let err = scheduler.run_job(&id).await.unwrap().unwrap_err();
            assert!(err.is_retryable());
            delays.push(scheduler.job(&id).unwrap().next_run.unwrap() - unix_now());
        }
        assert!((29..=30).contains(&delays[0]));
        assert!((59..=60).contains(&delays[1]));
        assert!((119..=120).contains(&delays[2]));
        let job = scheduler.job(&id).unwrap();
        assert_eq!(job.consecutive_failures, 4);
        assert!(job.alerting);
        assert!(job.active);
        assert_eq!(job.last_status, JobStatus::Failed);
        assert_eq!(scheduler.jobs().len(), 1);
    }

    #[tokio::test]
    async fn parse_failures_wait_for_the_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(&path, "{not json").unwrap();
        let scheduler = scheduler(Arc::new(SearchEngine::new(EngineConfig::default())));
        let job = file_job(&path, FeedKind::Full);
        let id = job.id.clone();
        scheduler.schedule(job);

        let err = scheduler.run_job(&id).await.unwrap().unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
        let next = scheduler.job(&id).unwrap().next_run.unwrap() - unix_now();
        assert!(next > 3000);
    }

    #[tokio::test]
    async fn loop_runs_due_jobs_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(&path, FEED).unwrap();
        let engine = Arc::new(SearchEngine::new(EngineConfig::default()));
        let scheduler = scheduler(engine.clone());
        let handle = scheduler.spawn();
        scheduler.schedule(file_job(&path, FeedKind::Full));

        let mut done = false;
        for _ in 0..500 {
            if scheduler.jobs()[0].last_status == JobStatus::Success {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(done);
        scheduler.shutdown();
        handle.await.unwrap();
        assert_eq!(engine.stats("shop").unwrap().documents, 1);
    }

    #[tokio::test]
    async fn jobs_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path().join("db")).unwrap();
        let engine = Arc::new(SearchEngine::new(EngineConfig::default()).with_store(store.clone()));
        let first = scheduler(engine.clone());
        first.schedule(file_job(Path::new("/data/feed.json"), FeedKind::Delta));
        first.set_active("shop-delta", false);

        let second = scheduler(engine);
        assert_eq!(second.restore().unwrap(), 1);
        let job = second.job("shop-delta").unwrap();
        assert!(!job.active);
        assert_eq!(job.kind, FeedKind::Delta);
    }

    #[tokio::test]
    async fn config_jobs_keep_restored_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path().join("db")).unwrap();
        let engine = Arc::new(SearchEngine::new(EngineConfig::default()).with_store(store));
        let spec = FeedJobSpec {
            id: None,
            project: "shop".into(),
            kind: FeedKind::Full,
            source: "/nonexistent/feed.json".into(),
            format: "json".into(),
            interval_secs: Some(3600),
        };

        let first = scheduler(engine.clone());
        first.register(&spec).unwrap();
        for _ in 0..3 {
            first.run_job("shop-full").await.unwrap().unwrap_err();
        }
        first.set_active("shop-full", false);
        let before = first.job("shop-full").unwrap();
        assert!(before.alerting);

        let second = scheduler(engine);
        assert_eq!(second.restore().unwrap(), 1);
        let moved = FeedJobSpec { source: "/elsewhere/feed.json".into(), interval_secs: Some(600), ..spec };
        let job = second.register(&moved).unwrap();
        assert_eq!(job.consecutive_failures, 3);
        assert!(job.alerting);
        assert!(!job.active);
        assert_eq!(job.last_status, JobStatus::Failed);
        assert_eq!(job.last_error, before.last_error);
        assert_eq!(job.next_run, before.next_run);
        assert_eq!(job.interval_secs, 600);
        assert_eq!(job.source, FeedSource::File("/elsewhere/feed.json".into()));
        assert_eq!(second.jobs().len(), 1);
        assert_eq!(second.job("shop-full").unwrap(), job);
    }
}
