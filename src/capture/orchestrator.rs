//! The per-job capture state machine and the sequential run loops.
//!
//! One job walks `Init -> Launched -> Navigating -> Stabilizing -> UiHidden ->
//! Captured -> Closed`. Navigation may retry; exhausting the attempts moves the
//! job to `Failed`. Whatever happens, the browser session is closed before the
//! next job starts.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::backend::{BrowserLauncher, BrowserSession, Clock, SessionGuard, SystemClock};
use super::policy::{network_idle_script, responsive_override_css, PagePolicy};
use super::types::{
    CaptureError, CaptureResult, CaptureState, CaptureTimings, CapturedPage, NavigationError,
    SessionResult,
};
use crate::compare::Comparator;
use crate::config::Credentials;
use crate::manifest::{
    ComparisonResult, RecordSummary, RunInfo, RunManifest, RunMode, SkipReason, SkippedJob,
};
use crate::matrix::CaptureJob;
use crate::store::{ArtifactStore, StoreError, WriteLocks};

/// Result type for whole runs
pub type RunResult<T> = Result<T, RunError>;

/// Errors that end a run early
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No browser could be started; whatever was accumulated has been saved
    #[error("run aborted at {job}: {source}")]
    Launch {
        job: CaptureJob,
        #[source]
        source: CaptureError,
    },
}

/// How a job ended when it produced nothing
enum JobFailure {
    Skipped(SkippedJob),
    Fatal(CaptureError),
}

impl JobFailure {
    fn skipped(job: &CaptureJob, reason: SkipReason, message: impl ToString) -> Self {
        JobFailure::Skipped(SkippedJob::new(job, reason, message.to_string()))
    }

    fn from_capture(job: &CaptureJob, err: CaptureError) -> Self {
        match err {
            err if err.is_run_fatal() => JobFailure::Fatal(err),
            err @ CaptureError::Navigation { .. } => {
                Self::skipped(job, SkipReason::NavigationFailure, err)
            }
            err => Self::skipped(job, SkipReason::CaptureFailure, err),
        }
    }
}

/// Current state of one job, for logging and error attribution
struct JobRun<'a> {
    job: &'a CaptureJob,
    state: CaptureState,
}

impl<'a> JobRun<'a> {
    fn new(job: &'a CaptureJob) -> Self {
        Self {
            job,
            state: CaptureState::Init,
        }
    }

    fn enter(&mut self, next: CaptureState) {
        debug!(job = %self.job, from = %self.state, to = %next, "capture state");
        self.state = next;
    }

    fn abort(&self, reason: impl ToString) -> CaptureError {
        CaptureError::Capture {
            state: self.state,
            reason: reason.to_string(),
        }
    }
}

/// Drives capture jobs through a [`BrowserLauncher`]
pub struct Orchestrator {
    launcher: Box<dyn BrowserLauncher>,
    clock: Arc<dyn Clock>,
    timings: CaptureTimings,
    policy: PagePolicy,
    credentials: Option<Credentials>,
    comparator: Comparator,
    locks: WriteLocks,
}

impl Orchestrator {
    pub fn new(launcher: impl BrowserLauncher + 'static) -> Self {
        Self {
            launcher: Box::new(launcher),
            clock: Arc::new(SystemClock::new()),
            timings: CaptureTimings::default(),
            policy: PagePolicy::default(),
            credentials: None,
            comparator: Comparator::default(),
            locks: WriteLocks::new(),
        }
    }

    pub fn timings(mut self, timings: CaptureTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn policy(mut self, policy: PagePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Time source for waits and delays (tests use a `ManualClock`)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }

    // ========================================================================
    // Single Job
    // ========================================================================

    /// Capture `job` as a full-page PNG at `output`.
    ///
    /// The session is released on every path before this returns.
    pub fn capture(&self, job: &CaptureJob, output: &Path) -> CaptureResult<CapturedPage> {
        let mut run = JobRun::new(job);
        let session = self.launcher.launch(job).map_err(CaptureError::Launch)?;
        let mut guard = SessionGuard::new(session);
        run.enter(CaptureState::Launched);

        let result = self.drive(&mut run, &mut guard, output);
        if result.is_err() {
            run.enter(CaptureState::Failed);
        }
        guard.close();
        run.enter(CaptureState::Closed);
        result
    }

    fn drive(
        &self,
        run: &mut JobRun<'_>,
        guard: &mut SessionGuard,
        output: &Path,
    ) -> CaptureResult<CapturedPage> {
        let job = run.job;
        let session = guard
            .session()
            .ok_or_else(|| run.abort("session already closed"))?;

        self.prepare(session, job).map_err(|e| run.abort(e))?;

        run.enter(CaptureState::Navigating);
        let attempts = self.navigate_with_retry(session, job)?;

        run.enter(CaptureState::Stabilizing);
        let ready = self.wait_until(
            session,
            &self.policy.document_ready_script(),
            self.timings.document_ready_timeout,
        );
        if !ready {
            debug!(job = %job, "document not ready in time, capturing anyway");
        }
        self.clock.sleep(self.timings.settle_delay);

        run.enter(CaptureState::UiHidden);
        let touched = session
            .evaluate(&self.policy.hide_ui_script())
            .map_err(|e| run.abort(e))?;
        debug!(job = %job, elements = %touched, "ephemeral UI hidden");
        self.clock.sleep(self.timings.hide_delay);

        let png = session.screenshot_full_page().map_err(|e| run.abort(e))?;
        let title = session.title().map_err(|e| run.abort(e))?;
        replace_file(output, &png)
            .map_err(|e| run.abort(format!("cannot write {}: {}", output.display(), e)))?;
        run.enter(CaptureState::Captured);

        Ok(CapturedPage { title, attempts })
    }

    /// Viewport, layout override, request headers and credentials
    fn prepare(&self, session: &mut dyn BrowserSession, job: &CaptureJob) -> SessionResult<()> {
        session.set_viewport(job.resolution)?;
        session.add_style(&responsive_override_css(job.resolution))?;
        session.set_extra_headers(&[(
            "Accept-Language".to_string(),
            self.policy.accept_language.clone(),
        )])?;
        if let Some(credentials) = &self.credentials {
            session.authenticate(credentials)?;
        }
        Ok(())
    }

    /// Navigate until an attempt succeeds or the attempts run out.
    ///
    /// Backoff sleeps happen only between attempts. Returns the attempt count.
    fn navigate_with_retry(
        &self,
        session: &mut dyn BrowserSession,
        job: &CaptureJob,
    ) -> CaptureResult<u32> {
        let max_attempts = self.timings.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.navigate_once(session, &job.url) {
                Ok(status) => {
                    debug!(job = %job, attempt, status, "navigation succeeded");
                    let idle_script =
                        network_idle_script(self.timings.network_idle_window.as_millis());
                    if !self.wait_until(session, &idle_script, self.timings.network_idle_timeout) {
                        debug!(job = %job, "network still busy, continuing");
                    }
                    return Ok(attempt);
                }
                Err(last) if attempt >= max_attempts => {
                    warn!(job = %job, attempt, "navigation failed, giving up: {}", last);
                    return Err(CaptureError::Navigation {
                        attempts: attempt,
                        last,
                    });
                }
                Err(err) => {
                    warn!(
                        job = %job,
                        attempt,
                        "navigation failed: {}, retrying in {:?}",
                        err,
                        self.timings.retry_backoff
                    );
                    self.clock.sleep(self.timings.retry_backoff);
                }
            }
        }
    }

    fn navigate_once(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<u16, NavigationError> {
        let response = session
            .navigate(url, self.timings.navigation_timeout)
            .map_err(|e| NavigationError::NoResponse(e.to_string()))?;
        match response.status {
            None => Err(NavigationError::NoResponse("no response received".to_string())),
            Some(code) if code >= 400 => Err(NavigationError::HttpStatus(code)),
            Some(code) => Ok(code),
        }
    }

    /// Poll `predicate` until it evaluates to `true` or `timeout` passes.
    ///
    /// Best-effort: script errors count as "not yet".
    fn wait_until(
        &self,
        session: &mut dyn BrowserSession,
        predicate: &str,
        timeout: Duration,
    ) -> bool {
        let deadline = self.clock.now() + timeout;
        let interval = self.timings.poll_interval.max(Duration::from_millis(1));
        loop {
            if let Ok(serde_json::Value::Bool(true)) = session.evaluate(predicate) {
                return true;
            }
            if self.clock.now() >= deadline {
                return false;
            }
            self.clock.sleep(interval);
        }
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Capture every job, compare it against its baseline and persist the
    /// manifest.
    ///
    /// Skipped jobs never stop the run. A launch failure does, after the
    /// results gathered so far have been saved.
    pub fn run_compare(&self, jobs: &[CaptureJob], store: &ArtifactStore) -> RunResult<RunManifest> {
        store.ensure_dirs()?;
        let cleared = store.clear_candidates()?;
        store.clear_diffs()?;
        info!(
            jobs = jobs.len(),
            backend = self.launcher.backend_type(),
            cleared,
            "starting comparison run"
        );

        let run_info = RunInfo::begin(RunMode::Compare, jobs.len());
        let mut manifest = RunManifest::new();

        for job in jobs {
            match self.compare_job(job, store) {
                Ok(result) => {
                    info!(job = %job, differences = result.differences, "compared");
                    manifest.push(result);
                }
                Err(JobFailure::Skipped(skipped)) => {
                    warn!("{}", skipped);
                    manifest.skip(skipped);
                }
                Err(JobFailure::Fatal(source)) => {
                    manifest.save(&store.manifest_path())?;
                    self.save_run_info(
                        store,
                        run_info
                            .finish(manifest.results.len(), &manifest.skipped)
                            .aborted(source.to_string()),
                    );
                    return Err(RunError::Launch {
                        job: job.clone(),
                        source,
                    });
                }
            }
        }

        manifest.save(&store.manifest_path())?;
        self.save_run_info(
            store,
            run_info.finish(manifest.results.len(), &manifest.skipped),
        );
        info!(
            compared = manifest.results.len(),
            changed = manifest.changed().count(),
            skipped = manifest.skipped.len(),
            "comparison run finished"
        );
        Ok(manifest)
    }

    /// Capture every job straight into the baseline directory
    pub fn run_record(&self, jobs: &[CaptureJob], store: &ArtifactStore) -> RunResult<RecordSummary> {
        store.ensure_dirs()?;
        info!(
            jobs = jobs.len(),
            backend = self.launcher.backend_type(),
            "starting baseline recording"
        );

        let run_info = RunInfo::begin(RunMode::Record, jobs.len());
        let mut summary = RecordSummary::default();

        for job in jobs {
            match self.record_job(job, store) {
                Ok(name) => {
                    info!(job = %job, file = %name, "baseline recorded");
                    summary.recorded.push(name);
                }
                Err(JobFailure::Skipped(skipped)) => {
                    warn!("{}", skipped);
                    summary.skipped.push(skipped);
                }
                Err(JobFailure::Fatal(source)) => {
                    self.save_run_info(
                        store,
                        run_info
                            .finish(summary.recorded.len(), &summary.skipped)
                            .aborted(source.to_string()),
                    );
                    return Err(RunError::Launch {
                        job: job.clone(),
                        source,
                    });
                }
            }
        }

        self.save_run_info(
            store,
            run_info.finish(summary.recorded.len(), &summary.skipped),
        );
        info!(
            recorded = summary.recorded.len(),
            skipped = summary.skipped.len(),
            "baseline recording finished"
        );
        Ok(summary)
    }

    fn compare_job(
        &self,
        job: &CaptureJob,
        store: &ArtifactStore,
    ) -> Result<ComparisonResult, JobFailure> {
        let name = job
            .artifact_name()
            .map_err(|e| JobFailure::skipped(job, SkipReason::CaptureFailure, e))?;
        if !store.has_baseline(&name) {
            return Err(JobFailure::skipped(
                job,
                SkipReason::MissingBaseline,
                format!("no baseline screenshot {}", name),
            ));
        }

        let _lease = self
            .locks
            .acquire(&name)
            .map_err(|e| JobFailure::skipped(job, SkipReason::CaptureFailure, e))?;
        let candidate = store.candidate_path(&name);
        let page = self
            .capture(job, &candidate)
            .map_err(|e| JobFailure::from_capture(job, e))?;

        let differences = self
            .comparator
            .compare_files(&store.baseline_path(&name), &candidate, &store.diff_path(&name))
            .map_err(|e| JobFailure::skipped(job, SkipReason::ComparisonFailure, e))?;

        Ok(ComparisonResult {
            url: job.url.clone(),
            resolution: job.resolution.to_string(),
            new_screenshot: ArtifactStore::candidate_file_name(&name),
            diff_screenshot: ArtifactStore::diff_file_name(&name),
            base_screenshot: name,
            differences,
            title: page.title,
        })
    }

    fn record_job(&self, job: &CaptureJob, store: &ArtifactStore) -> Result<String, JobFailure> {
        let name = job
            .artifact_name()
            .map_err(|e| JobFailure::skipped(job, SkipReason::CaptureFailure, e))?;
        let _lease = self
            .locks
            .acquire(&name)
            .map_err(|e| JobFailure::skipped(job, SkipReason::CaptureFailure, e))?;
        self.capture(job, &store.baseline_path(&name))
            .map_err(|e| JobFailure::from_capture(job, e))?;
        Ok(name)
    }

    fn save_run_info(&self, store: &ArtifactStore, run_info: RunInfo) {
        if let Err(e) = run_info.save(&store.run_info_path()) {
            warn!("failed to write run summary: {}", e);
        }
    }
}

/// Swap `bytes` in at `path` with a single rename.
///
/// A job that fails before this point leaves any existing file untouched.
fn replace_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}
