//! CacheStager - リモートからローカルキャッシュへのステージング
//!
//! # 責務
//! - remote -> local transfer jobs for reads (`ensure_fresh`)
//! - local -> remote transfer jobs for writes (`publish`)
//! - one poll / deadline / cancel loop shared by every job (`await_job`)
//!
//! # 並行性
//! At most one stage per logical path is in flight. Later callers for the
//! same path join it through a `watch` channel and observe exactly its
//! outcome. The entry table sits behind one `std::sync::Mutex` that is never
//! held across an `.await`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::app::paths::{PathTranslator, ResolvedPath};
use crate::domain::ids::{EndpointId, JobId};
use crate::domain::state::{RemoteJobStatus, TransferRecord, TransferState};
use crate::error::StageError;
use crate::observability::StagerCounts;
use crate::ports::{Clock, LocalStore, RemoteEndpoint, TransferRequest};

pub type StageOutcome = Result<StageReport, StageError>;

/// Result of a successful stage or publish.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub logical: String,
    pub local_path: PathBuf,

    /// `None` for a cache hit.
    pub job_id: Option<JobId>,
    pub state: TransferState,
    /// Submission time of the job that produced the copy (or, for a cache
    /// hit, of the earlier one).
    pub staged_at: DateTime<Utc>,
    pub cache_hit: bool,
}

/// Endpoints and timing the stager works with.
#[derive(Debug, Clone)]
pub struct StagerSettings {
    pub remote_endpoint: EndpointId,
    pub local_endpoint: EndpointId,
    pub poll_interval: Duration,
}

struct CacheEntry {
    local_path: PathBuf,
    last_staged_at: Option<DateTime<Utc>>,

    /// Receiver of the in-flight stage, `None` when idle.
    in_flight: Option<watch::Receiver<Option<StageOutcome>>>,

    /// Id of the flight that owns `in_flight`.
    flight: u64,
}

#[derive(Default)]
struct StagerState {
    entries: HashMap<String, CacheEntry>,
    next_flight: u64,
    counts: StagerCounts,
}

fn lock(state: &Mutex<StagerState>) -> MutexGuard<'_, StagerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Role<'a> {
    Join(watch::Receiver<Option<StageOutcome>>),
    Lead(Leader<'a>),
}

/// Owner of an in-flight stage.
///
/// Dropping it without `finish` (the leading future was cancelled) clears the
/// in-flight handle; joiners then see the sender close and report
/// `Interrupted`.
struct Leader<'a> {
    state: &'a Mutex<StagerState>,
    key: String,
    flight: u64,
    last_staged_at: Option<DateTime<Utc>>,
    tx: watch::Sender<Option<StageOutcome>>,
    finished: bool,
}

impl Leader<'_> {
    fn finish(mut self, outcome: StageOutcome) -> StageOutcome {
        {
            let mut state = lock(self.state);
            if let Some(entry) = state.entries.get_mut(&self.key)
                && entry.flight == self.flight
            {
                entry.in_flight = None;
                if let Ok(report) = &outcome {
                    entry.last_staged_at = Some(report.staged_at);
                }
            }
        }
        self.tx.send_replace(Some(outcome.clone()));
        self.finished = true;
        outcome
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = lock(self.state);
        if let Some(entry) = state.entries.get_mut(&self.key)
            && entry.flight == self.flight
        {
            entry.in_flight = None;
        }
        warn!(path = %self.key, "stage dropped before completion");
    }
}

pub struct CacheStager {
    remote: Arc<dyn RemoteEndpoint>,
    local: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    translator: PathTranslator,
    settings: StagerSettings,
    state: Mutex<StagerState>,
}

impl CacheStager {
    pub fn new(
        remote: Arc<dyn RemoteEndpoint>,
        local: Arc<dyn LocalStore>,
        clock: Arc<dyn Clock>,
        translator: PathTranslator,
        settings: StagerSettings,
    ) -> Self {
        Self {
            remote,
            local,
            clock,
            translator,
            settings,
            state: Mutex::new(StagerState::default()),
        }
    }

    pub fn translator(&self) -> &PathTranslator {
        &self.translator
    }

    pub fn counts(&self) -> StagerCounts {
        lock(&self.state).counts.clone()
    }

    /// Time of the last successful stage or publish of `logical`.
    pub fn last_staged_at(&self, logical: &str) -> Option<DateTime<Utc>> {
        let key = PathTranslator::normalize(logical);
        lock(&self.state)
            .entries
            .get(&key)
            .and_then(|entry| entry.last_staged_at)
    }

    /// Cache path of `logical` once it has been staged at least once.
    pub fn cached_path(&self, logical: &str) -> Option<PathBuf> {
        let key = PathTranslator::normalize(logical);
        lock(&self.state)
            .entries
            .get(&key)
            .filter(|entry| entry.last_staged_at.is_some())
            .map(|entry| entry.local_path.clone())
    }

    /// Stage the current remote content of `logical` into the cache.
    #[instrument(skip_all, fields(path = %logical))]
    pub async fn ensure_fresh(&self, logical: &str, deadline: Instant) -> StageOutcome {
        self.stage(logical, None, deadline).await
    }

    /// Like `ensure_fresh`, but a cached copy staged at or after
    /// `remote_modified` is reused without a transfer.
    #[instrument(skip_all, fields(path = %logical, %remote_modified))]
    pub async fn ensure_fresh_since(
        &self,
        logical: &str,
        remote_modified: DateTime<Utc>,
        deadline: Instant,
    ) -> StageOutcome {
        self.stage(logical, Some(remote_modified), deadline).await
    }

    /// Write `bytes` into the cache and transfer them to the remote endpoint.
    #[instrument(skip_all, fields(path = %logical, len = bytes.len()))]
    pub async fn publish(&self, logical: &str, bytes: &[u8], deadline: Instant) -> StageOutcome {
        let resolved = self.translator.resolve(logical);

        // Wait out whatever is in flight, then take the path over.
        let leader = loop {
            match self.acquire(&resolved) {
                Role::Lead(leader) => break leader,
                Role::Join(rx) => {
                    let _ = self.join(rx, &resolved.logical).await;
                }
            }
        };

        let outcome = self.run_publish(&resolved, bytes, deadline).await;
        leader.finish(outcome)
    }

    /// Drop cache entries at or below `logical`.
    pub fn invalidate(&self, logical: &str) {
        let prefix = PathTranslator::normalize(logical);
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state
            .entries
            .retain(|key, _| !PathTranslator::is_within(key, &prefix));
        let dropped = before - state.entries.len();
        if dropped > 0 {
            debug!(path = %prefix, dropped, "invalidated cache entries");
        }
    }

    /// Poll `job_id` until it is terminal or `deadline` passes.
    ///
    /// - Succeeded: the finished record.
    /// - Failed: `TransferFailed`, no cancel (the job is already over).
    /// - Deadline: one best-effort cancel, then `TransferTimedOut`.
    /// - Poll error: one best-effort cancel, then `Remote`.
    #[instrument(skip_all, fields(job = %job_id, label = %label))]
    pub async fn await_job(
        &self,
        job_id: JobId,
        label: &str,
        deadline: Instant,
    ) -> Result<TransferRecord, StageError> {
        let started = Instant::now();
        let mut record = TransferRecord::new(job_id.clone(), label, self.clock.now());

        loop {
            let status = match self.remote.poll_job(&job_id).await {
                Ok(status) => status,
                Err(err) => {
                    warn!(error = %err, "polling transfer job failed");
                    self.bump(|c| c.failed += 1);
                    self.cancel_best_effort(&mut record).await;
                    return Err(StageError::Remote(err));
                }
            };
            record.record_poll(self.clock.now());
            debug!(polls = record.polls, ?status, "polled transfer job");

            match status {
                RemoteJobStatus::Succeeded => {
                    record.mark_succeeded(self.clock.now());
                    self.bump(|c| c.succeeded += 1);
                    info!(polls = record.polls, "transfer job succeeded");
                    return Ok(record);
                }
                RemoteJobStatus::Failed { code } => {
                    record.mark_failed(code.clone(), self.clock.now());
                    self.bump(|c| c.failed += 1);
                    warn!(%code, "transfer job failed");
                    return Err(StageError::TransferFailed { job_id, code });
                }
                RemoteJobStatus::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                record.mark_timed_out(self.clock.now());
                self.bump(|c| c.timed_out += 1);
                warn!(polls = record.polls, "transfer job missed its deadline");
                self.cancel_best_effort(&mut record).await;
                return Err(StageError::TransferTimedOut {
                    job_id,
                    timeout: deadline.saturating_duration_since(started),
                });
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    async fn stage(
        &self,
        logical: &str,
        remote_modified: Option<DateTime<Utc>>,
        deadline: Instant,
    ) -> StageOutcome {
        let resolved = self.translator.resolve(logical);
        let leader = match self.acquire(&resolved) {
            Role::Join(rx) => return self.join(rx, &resolved.logical).await,
            Role::Lead(leader) => leader,
        };

        if let (Some(modified), Some(staged_at)) = (remote_modified, leader.last_staged_at)
            && staged_at >= modified
        {
            match self.local.exists(&resolved.local).await {
                Ok(true) => {
                    self.bump(|c| c.cache_hits += 1);
                    debug!(%staged_at, %modified, "cache hit");
                    let report = StageReport {
                        logical: resolved.logical.clone(),
                        local_path: resolved.local.clone(),
                        job_id: None,
                        state: TransferState::Succeeded,
                        staged_at,
                        cache_hit: true,
                    };
                    return leader.finish(Ok(report));
                }
                Ok(false) => debug!("cached copy missing, staging again"),
                Err(err) => debug!(error = %err, "cached copy unreadable, staging again"),
            }
        }

        let outcome = self.run_fetch(&resolved, deadline).await;
        leader.finish(outcome)
    }

    fn acquire(&self, resolved: &ResolvedPath) -> Role<'_> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let flight = state.next_flight;
        let entry = state
            .entries
            .entry(resolved.logical.clone())
            .or_insert_with(|| CacheEntry {
                local_path: resolved.local.clone(),
                last_staged_at: None,
                in_flight: None,
                flight: 0,
            });

        if let Some(rx) = &entry.in_flight {
            let rx = rx.clone();
            state.counts.joined += 1;
            return Role::Join(rx);
        }

        let (tx, rx) = watch::channel(None);
        entry.in_flight = Some(rx);
        entry.flight = flight;
        entry.local_path = resolved.local.clone();
        let last_staged_at = entry.last_staged_at;
        state.next_flight += 1;

        Role::Lead(Leader {
            state: &self.state,
            key: resolved.logical.clone(),
            flight,
            last_staged_at,
            tx,
            finished: false,
        })
    }

    async fn join(&self, mut rx: watch::Receiver<Option<StageOutcome>>, logical: &str) -> StageOutcome {
        debug!(path = %logical, "joining in-flight stage");
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                let last = rx.borrow().clone();
                return last.unwrap_or_else(|| Err(StageError::Interrupted(logical.to_string())));
            }
        }
    }

    async fn run_fetch(&self, resolved: &ResolvedPath, deadline: Instant) -> StageOutcome {
        self.activate_endpoints().await?;
        if let Some(parent) = resolved.local.parent() {
            self.local
                .create_dir_all(parent)
                .await
                .map_err(StageError::local)?;
        }

        let label = job_label("stage", &resolved.logical);
        let request = TransferRequest {
            src_endpoint: self.settings.remote_endpoint.clone(),
            src_path: resolved.remote.clone(),
            dst_endpoint: self.settings.local_endpoint.clone(),
            dst_path: resolved.local.to_string_lossy().into_owned(),
            recursive: false,
            label: label.clone(),
        };
        let (submitted_at, record) = self.submit_and_await(request, &label, deadline).await?;
        Ok(report(resolved, record, submitted_at))
    }

    async fn run_publish(
        &self,
        resolved: &ResolvedPath,
        bytes: &[u8],
        deadline: Instant,
    ) -> StageOutcome {
        self.activate_endpoints().await?;
        self.local
            .write(&resolved.local, bytes)
            .await
            .map_err(StageError::local)?;

        let label = job_label("publish", &resolved.logical);
        let request = TransferRequest {
            src_endpoint: self.settings.local_endpoint.clone(),
            src_path: resolved.local.to_string_lossy().into_owned(),
            dst_endpoint: self.settings.remote_endpoint.clone(),
            dst_path: resolved.remote.clone(),
            recursive: false,
            label: label.clone(),
        };
        let (submitted_at, record) = self.submit_and_await(request, &label, deadline).await?;
        Ok(report(resolved, record, submitted_at))
    }

    async fn submit_and_await(
        &self,
        request: TransferRequest,
        label: &str,
        deadline: Instant,
    ) -> Result<(DateTime<Utc>, TransferRecord), StageError> {
        // The service may read the source any time after submission, so a
        // remote write later than this is not covered by the copy.
        let submitted_at = self.clock.now();
        let job_id = self.remote.submit_transfer(request).await?;
        self.bump(|c| c.submitted += 1);
        info!(job = %job_id, %label, "submitted transfer job");
        let record = self.await_job(job_id, label, deadline).await?;
        Ok((submitted_at, record))
    }

    async fn activate_endpoints(&self) -> Result<(), StageError> {
        for endpoint in [&self.settings.remote_endpoint, &self.settings.local_endpoint] {
            self.remote
                .activate_endpoint(endpoint)
                .await
                .map_err(|err| StageError::EndpointUnavailable {
                    endpoint: endpoint.to_string(),
                    reason: err.to_string(),
                })?;
        }
        Ok(())
    }

    async fn cancel_best_effort(&self, record: &mut TransferRecord) {
        self.bump(|c| c.cancel_attempts += 1);
        match self.remote.cancel_job(&record.job_id).await {
            Ok(()) => {
                record.mark_cancelled(self.clock.now());
                info!(job = %record.job_id, "cancelled transfer job");
            }
            Err(err) => warn!(job = %record.job_id, error = %err, "cancel failed"),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut StagerCounts)) {
        f(&mut lock(&self.state).counts);
    }
}

fn report(resolved: &ResolvedPath, record: TransferRecord, staged_at: DateTime<Utc>) -> StageReport {
    StageReport {
        logical: resolved.logical.clone(),
        local_path: resolved.local.clone(),
        job_id: Some(record.job_id),
        state: record.state,
        staged_at,
        cache_hit: false,
    }
}

/// Diagnostics label for a job.
pub(crate) fn job_label(verb: &str, logical: &str) -> String {
    if logical.is_empty() {
        format!("stagecoach {verb} /")
    } else {
        format!("stagecoach {verb} {logical}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryEndpoint, InMemoryLocalStore, JobBehavior};
    use crate::ports::{FixedClock, RemoteError};
    use crate::domain::listing::ListingEntry;
    use crate::ports::DeleteRequest;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    const REMOTE: &str = "remote-ep";
    const LOCAL: &str = "local-ep";

    struct Fixture {
        endpoint: Arc<InMemoryEndpoint>,
        local: Arc<InMemoryLocalStore>,
        clock: Arc<FixedClock>,
        stager: Arc<CacheStager>,
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let local = Arc::new(InMemoryLocalStore::new());
        let clock = Arc::new(FixedClock::new(t(0)));
        let endpoint = Arc::new(
            InMemoryEndpoint::with_clock(clock.clone())
                .with_local_endpoint(EndpointId::new(LOCAL), local.clone()),
        );
        endpoint.add_directory(&EndpointId::new(REMOTE), "/~");
        endpoint.put_file(&EndpointId::new(REMOTE), "/~/a.txt", b"hello", t(-10));

        let stager = Arc::new(CacheStager::new(
            endpoint.clone(),
            local.clone(),
            clock.clone(),
            PathTranslator::new("/~/", "/cache"),
            StagerSettings {
                remote_endpoint: EndpointId::new(REMOTE),
                local_endpoint: EndpointId::new(LOCAL),
                poll_interval: Duration::from_secs(1),
            },
        ));
        Fixture {
            endpoint,
            local,
            clock,
            stager,
        }
    }

    fn deadline(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test(start_paused = true)]
    async fn stages_remote_bytes_into_cache() {
        let f = fixture();
        let report = f.stager.ensure_fresh("a.txt", deadline(10)).await.unwrap();

        assert!(!report.cache_hit);
        assert_eq!(report.state, TransferState::Succeeded);
        assert_eq!(report.local_path, PathBuf::from("/cache/a.txt"));
        assert_eq!(report.staged_at, t(0));
        assert_eq!(f.local.read(Path::new("/cache/a.txt")).await.unwrap(), b"hello");
        assert_eq!(f.stager.last_staged_at("a.txt"), Some(t(0)));
        assert_eq!(f.stager.cached_path("/a.txt"), Some(PathBuf::from("/cache/a.txt")));
        assert_eq!(f.stager.counts().submitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_remote_is_a_cache_hit() {
        let f = fixture();
        f.stager.ensure_fresh_since("a.txt", t(-10), deadline(10)).await.unwrap();
        let second = f.stager.ensure_fresh_since("a.txt", t(-10), deadline(10)).await.unwrap();

        assert!(second.cache_hit);
        assert_eq!(second.job_id, None);
        let counts = f.stager.counts();
        assert_eq!(counts.submitted, 1);
        assert_eq!(counts.cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_remote_forces_a_new_transfer() {
        let f = fixture();
        f.stager.ensure_fresh_since("a.txt", t(-10), deadline(10)).await.unwrap();

        f.clock.advance(chrono::Duration::seconds(30));
        f.endpoint.put_file(&EndpointId::new(REMOTE), "/~/a.txt", b"changed", t(20));
        let report = f.stager.ensure_fresh_since("a.txt", t(20), deadline(10)).await.unwrap();

        assert!(!report.cache_hit);
        assert_eq!(f.local.read(Path::new("/cache/a.txt")).await.unwrap(), b"changed");
        assert_eq!(f.stager.counts().submitted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_transfer() {
        let f = fixture();
        f.endpoint.push_behavior(JobBehavior::CompleteAfter(3));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let stager = f.stager.clone();
                tokio::spawn(async move { stager.ensure_fresh("a.txt", deadline(30)).await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(f.endpoint.stats().transfers_submitted, 1);
        assert!(outcomes.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(f.stager.counts().joined, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_exactly_once() {
        let f = fixture();
        f.endpoint.push_behavior(JobBehavior::Never);

        let start = Instant::now();
        let err = f.stager.ensure_fresh("a.txt", deadline(5)).await.unwrap_err();

        assert!(matches!(err, StageError::TransferTimedOut { .. }), "{err}");
        assert!(err.is_retryable());
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
        assert_eq!(f.endpoint.stats().cancels, 1);
        assert_eq!(f.stager.counts().cancel_attempts, 1);
        assert_eq!(f.stager.last_staged_at("a.txt"), None);
        assert_eq!(f.stager.cached_path("a.txt"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_is_not_cancelled() {
        let f = fixture();
        f.endpoint.push_behavior(JobBehavior::Fail {
            code: "PERMISSION_DENIED".into(),
        });

        let err = f.stager.ensure_fresh("a.txt", deadline(5)).await.unwrap_err();
        assert!(
            matches!(&err, StageError::TransferFailed { code, .. } if code == "PERMISSION_DENIED")
        );
        assert_eq!(f.endpoint.stats().cancels, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_survives_a_failing_cancel() {
        let f = fixture();
        f.endpoint.push_behavior(JobBehavior::Never);
        f.endpoint.fail_cancels(true);

        let err = f.stager.ensure_fresh("a.txt", deadline(3)).await.unwrap_err();
        assert!(matches!(err, StageError::TransferTimedOut { .. }));

        // The next call starts a fresh job.
        f.endpoint.fail_cancels(false);
        f.stager.ensure_fresh("a.txt", deadline(3)).await.unwrap();
        assert_eq!(f.endpoint.stats().transfers_submitted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_cancel_and_surface() {
        let f = fixture();
        f.endpoint.push_behavior(JobBehavior::Never);
        f.endpoint
            .fail_next_poll(RemoteError::new("ServiceUnavailable", "try later"));

        let err = f.stager.ensure_fresh("a.txt", deadline(5)).await.unwrap_err();
        assert!(matches!(err, StageError::Remote(_)));
        assert_eq!(f.endpoint.stats().cancels, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_endpoint_never_submits() {
        let f = fixture();
        f.endpoint.set_unavailable(&EndpointId::new(LOCAL), true);

        let err = f.stager.ensure_fresh("a.txt", deadline(5)).await.unwrap_err();
        assert!(matches!(err, StageError::EndpointUnavailable { endpoint, .. } if endpoint == LOCAL));
        assert_eq!(f.endpoint.stats().transfers_submitted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_leader_interrupts_joiners() {
        let f = fixture();
        f.endpoint.push_behavior(JobBehavior::Never);

        let leader = {
            let stager = f.stager.clone();
            tokio::spawn(async move { stager.ensure_fresh("a.txt", deadline(60)).await })
        };
        tokio::task::yield_now().await;
        let joiner = {
            let stager = f.stager.clone();
            tokio::spawn(async move { stager.ensure_fresh("a.txt", deadline(60)).await })
        };
        tokio::task::yield_now().await;

        leader.abort();
        let err = joiner.await.unwrap().unwrap_err();
        assert!(matches!(err, StageError::Interrupted(ref p) if p == "a.txt"));

        // The path is free again.
        f.stager.ensure_fresh("a.txt", deadline(60)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn publish_then_stage_reads_back_the_same_bytes() {
        let f = fixture();
        let bytes = vec![0u8, 159, 146, 150];
        f.stager.publish("bin/blob.dat", &bytes, deadline(10)).await.unwrap();
        assert_eq!(
            f.endpoint.file_bytes(&EndpointId::new(REMOTE), "/~/bin/blob.dat"),
            Some(bytes.clone())
        );

        f.local.remove(Path::new("/cache/bin/blob.dat")).await.unwrap();
        f.stager.ensure_fresh("bin/blob.dat", deadline(10)).await.unwrap();
        assert_eq!(f.local.read(Path::new("/cache/bin/blob.dat")).await.unwrap(), bytes);
    }

    /// Lands a newer remote version after the copy has read the source but
    /// before its completion is reported.
    struct WritesWhileCompleting {
        inner: Arc<InMemoryEndpoint>,
        clock: Arc<FixedClock>,
        written: AtomicBool,
    }

    #[async_trait]
    impl RemoteEndpoint for WritesWhileCompleting {
        async fn list_directory(
            &self,
            endpoint: &EndpointId,
            path: &str,
            include_hidden: bool,
        ) -> Result<Vec<ListingEntry>, RemoteError> {
            self.inner.list_directory(endpoint, path, include_hidden).await
        }

        async fn submit_transfer(&self, request: TransferRequest) -> Result<JobId, RemoteError> {
            self.inner.submit_transfer(request).await
        }

        async fn submit_delete(&self, request: DeleteRequest) -> Result<JobId, RemoteError> {
            self.inner.submit_delete(request).await
        }

        async fn poll_job(&self, job: &JobId) -> Result<RemoteJobStatus, RemoteError> {
            let status = self.inner.poll_job(job).await?;
            if status == RemoteJobStatus::Succeeded && !self.written.swap(true, Ordering::SeqCst) {
                self.clock.advance(chrono::Duration::seconds(1));
                self.inner
                    .put_file(&EndpointId::new(REMOTE), "/~/a.txt", b"v2", self.clock.now());
            }
            Ok(status)
        }

        async fn cancel_job(&self, job: &JobId) -> Result<(), RemoteError> {
            self.inner.cancel_job(job).await
        }

        async fn activate_endpoint(&self, endpoint: &EndpointId) -> Result<(), RemoteError> {
            self.inner.activate_endpoint(endpoint).await
        }

        async fn rename_object(
            &self,
            endpoint: &EndpointId,
            old_path: &str,
            new_path: &str,
        ) -> Result<(), RemoteError> {
            self.inner.rename_object(endpoint, old_path, new_path).await
        }

        async fn mkdir(&self, endpoint: &EndpointId, path: &str) -> Result<(), RemoteError> {
            self.inner.mkdir(endpoint, path).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn write_during_completion_is_not_mistaken_for_cached() {
        let local = Arc::new(InMemoryLocalStore::new());
        let clock = Arc::new(FixedClock::new(t(0)));
        let inner = Arc::new(
            InMemoryEndpoint::with_clock(clock.clone())
                .with_local_endpoint(EndpointId::new(LOCAL), local.clone()),
        );
        inner.put_file(&EndpointId::new(REMOTE), "/~/a.txt", b"v1", t(-10));
        let endpoint = Arc::new(WritesWhileCompleting {
            inner,
            clock: clock.clone(),
            written: AtomicBool::new(false),
        });
        let stager = CacheStager::new(
            endpoint,
            local.clone(),
            clock.clone(),
            PathTranslator::new("/~/", "/cache"),
            StagerSettings {
                remote_endpoint: EndpointId::new(REMOTE),
                local_endpoint: EndpointId::new(LOCAL),
                poll_interval: Duration::from_secs(1),
            },
        );

        let first = stager.ensure_fresh_since("a.txt", t(-10), deadline(10)).await.unwrap();
        assert_eq!(first.staged_at, t(0));
        assert_eq!(local.read(Path::new("/cache/a.txt")).await.unwrap(), b"v1");

        // The listing now reports the write at t(1).
        let second = stager.ensure_fresh_since("a.txt", t(1), deadline(10)).await.unwrap();
        assert!(!second.cache_hit);
        assert_eq!(second.staged_at, t(1));
        assert_eq!(local.read(Path::new("/cache/a.txt")).await.unwrap(), b"v2");
        assert_eq!(stager.counts().cache_hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_drops_descendants() {
        let f = fixture();
        f.endpoint.put_file(&EndpointId::new(REMOTE), "/~/d/x.txt", b"x", t(-5));
        f.stager.ensure_fresh("a.txt", deadline(5)).await.unwrap();
        f.stager.ensure_fresh("d/x.txt", deadline(5)).await.unwrap();

        f.stager.invalidate("d");
        assert_eq!(f.stager.last_staged_at("d/x.txt"), None);
        assert!(f.stager.last_staged_at("a.txt").is_some());
    }

    #[test]
    fn labels_name_the_path() {
        assert_eq!(job_label("stage", "a/b.txt"), "stagecoach stage a/b.txt");
        assert_eq!(job_label("delete", ""), "stagecoach delete /");
    }
}
