//! Types for run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::matrix::CaptureJob;
use crate::store::{StoreError, StoreResult};

/// Outcome of one compared job, as consumed by the result viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub url: String,

    /// Resolution as `WxH`
    pub resolution: String,

    /// File name in the baseline directory
    pub base_screenshot: String,

    /// File name in the candidate directory
    pub new_screenshot: String,

    /// File name in the diff directory
    pub diff_screenshot: String,

    /// Number of pixels that differ beyond the threshold
    pub differences: u64,

    /// Page title at capture time
    pub title: String,
}

/// Why a job produced no result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Every navigation attempt failed
    NavigationFailure,
    /// No baseline to compare against
    MissingBaseline,
    /// Something broke between launch and the screenshot write
    CaptureFailure,
    /// Baseline or candidate could not be decoded, or the diff not written
    ComparisonFailure,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SkipReason::NavigationFailure => "navigation failure",
            SkipReason::MissingBaseline => "missing baseline",
            SkipReason::CaptureFailure => "capture failure",
            SkipReason::ComparisonFailure => "comparison failure",
        };
        f.write_str(name)
    }
}

/// A job left out of the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedJob {
    pub job: CaptureJob,
    pub reason: SkipReason,
    pub message: String,
}

impl SkippedJob {
    pub fn new(job: &CaptureJob, reason: SkipReason, message: impl Into<String>) -> Self {
        Self {
            job: job.clone(),
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for SkippedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} skipped ({}): {}", self.job, self.reason, self.message)
    }
}

/// Ordered results of one comparison run.
///
/// Results are only ever appended, in job order. Skipped jobs are kept for the
/// end-of-run summary and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunManifest {
    pub results: Vec<ComparisonResult>,
    pub skipped: Vec<SkippedJob>,
}

impl RunManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ComparisonResult) {
        self.results.push(result);
    }

    pub fn skip(&mut self, skipped: SkippedJob) {
        self.skipped.push(skipped);
    }

    /// Results with at least one differing pixel
    pub fn changed(&self) -> impl Iterator<Item = &ComparisonResult> {
        self.results.iter().filter(|r| r.differences > 0)
    }

    /// Skipped jobs with the given reason
    pub fn skipped_for(&self, reason: SkipReason) -> impl Iterator<Item = &SkippedJob> {
        self.skipped.iter().filter(move |s| s.reason == reason)
    }

    /// Write the results as a JSON array
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(&self.results)?;
        fs::write(path, json).map_err(StoreError::io(path))
    }

    /// Read a previously saved manifest; a missing file is an empty manifest
    pub fn load(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path).map_err(StoreError::io(path))?;
        let results: Vec<ComparisonResult> = serde_json::from_str(&raw)?;
        Ok(Self {
            results,
            skipped: Vec::new(),
        })
    }
}

/// What a run did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Compare,
    Record,
}

/// Bookkeeping written next to the manifest after every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Jobs scheduled
    pub jobs: usize,
    /// Jobs that produced an artifact
    pub completed: usize,
    /// Skipped jobs as `job: reason`
    pub skipped: Vec<String>,
    /// Set when the run was aborted
    pub aborted: Option<String>,
}

impl RunInfo {
    pub fn begin(mode: RunMode, jobs: usize) -> Self {
        let now = Utc::now();
        Self {
            mode,
            started_at: now,
            finished_at: now,
            jobs,
            completed: 0,
            skipped: Vec::new(),
            aborted: None,
        }
    }

    /// Stamp the end time and record the outcome
    pub fn finish(mut self, completed: usize, skipped: &[SkippedJob]) -> Self {
        self.finished_at = Utc::now();
        self.completed = completed;
        self.skipped = skipped
            .iter()
            .map(|s| format!("{}: {}", s.job, s.reason))
            .collect();
        self
    }

    pub fn aborted(mut self, reason: impl Into<String>) -> Self {
        self.aborted = Some(reason.into());
        self
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(StoreError::io(path))
    }
}

/// Outcome of a baseline recording run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSummary {
    /// Baseline file names written, in job order
    pub recorded: Vec<String>,
    pub skipped: Vec<SkippedJob>,
}
