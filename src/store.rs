//! Artifact directories for baselines, candidates and diffs.
//!
//! Layout under the root:
//! - `records/` baseline screenshots, curated by hand and never cleared
//! - `new_records/` candidates (`new-<name>`), emptied at the start of every run
//! - `compare_records/` diffs (`diff-<name>`), `results.json` and `run.json`
//! - `config/` the run input file

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::config::CONFIG_FILE_NAME;
use crate::matrix::stem_of_artifact;

pub const BASELINE_DIR: &str = "records";
pub const CANDIDATE_DIR: &str = "new_records";
pub const DIFF_DIR: &str = "compare_records";
pub const CONFIG_DIR: &str = "config";

/// Manifest file inside the diff directory
pub const MANIFEST_FILE: &str = "results.json";

/// Run summary file inside the diff directory
pub const RUN_INFO_FILE: &str = "run.json";

const CANDIDATE_PREFIX: &str = "new-";
const DIFF_PREFIX: &str = "diff-";

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while touching artifact directories
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("artifact '{0}' is already being written")]
    Busy(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The three artifact roots plus the config directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    pub root: PathBuf,
    pub baseline_dir: PathBuf,
    pub candidate_dir: PathBuf,
    pub diff_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `root` with the standard directory names
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            baseline_dir: root.join(BASELINE_DIR),
            candidate_dir: root.join(CANDIDATE_DIR),
            diff_dir: root.join(DIFF_DIR),
            config_dir: root.join(CONFIG_DIR),
            root,
        }
    }

    /// Create any missing directory
    pub fn ensure_dirs(&self) -> StoreResult<()> {
        for dir in [&self.baseline_dir, &self.candidate_dir, &self.diff_dir, &self.config_dir] {
            fs::create_dir_all(dir).map_err(StoreError::io(dir))?;
        }
        Ok(())
    }

    /// Empty the candidate directory, keeping the directory itself
    pub fn clear_candidates(&self) -> StoreResult<usize> {
        clear_dir(&self.candidate_dir, |_| true)
    }

    /// Remove stale diff images, keeping the manifest and any viewer files
    pub fn clear_diffs(&self) -> StoreResult<usize> {
        clear_dir(&self.diff_dir, |name| {
            name.starts_with(DIFF_PREFIX) && name.ends_with(".png")
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.diff_dir.join(MANIFEST_FILE)
    }

    pub fn run_info_path(&self) -> PathBuf {
        self.diff_dir.join(RUN_INFO_FILE)
    }

    pub fn baseline_path(&self, name: &str) -> PathBuf {
        self.baseline_dir.join(name)
    }

    pub fn candidate_file_name(name: &str) -> String {
        format!("{}{}", CANDIDATE_PREFIX, name)
    }

    pub fn candidate_path(&self, name: &str) -> PathBuf {
        self.candidate_dir.join(Self::candidate_file_name(name))
    }

    pub fn diff_file_name(name: &str) -> String {
        format!("{}{}", DIFF_PREFIX, name)
    }

    pub fn diff_path(&self, name: &str) -> PathBuf {
        self.diff_dir.join(Self::diff_file_name(name))
    }

    pub fn has_baseline(&self, name: &str) -> bool {
        self.baseline_path(name).is_file()
    }

    /// Page stems that have at least one baseline screenshot
    pub fn baseline_stems(&self) -> StoreResult<BTreeSet<String>> {
        let mut stems = BTreeSet::new();
        if !self.baseline_dir.exists() {
            return Ok(stems);
        }
        for entry in fs::read_dir(&self.baseline_dir).map_err(StoreError::io(&self.baseline_dir))? {
            let entry = entry.map_err(StoreError::io(&self.baseline_dir))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = stem_of_artifact(&name) {
                stems.insert(stem.to_string());
            }
        }
        Ok(stems)
    }
}

fn clear_dir(dir: &Path, removable: impl Fn(&str) -> bool) -> StoreResult<usize> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(StoreError::io(dir))?;
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(StoreError::io(dir))? {
        let entry = entry.map_err(StoreError::io(dir))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if !removable(&name) {
            continue;
        }
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(StoreError::io(&path))?;
        } else {
            fs::remove_file(&path).map_err(StoreError::io(&path))?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// At most one writer per artifact name
#[derive(Debug, Default)]
pub struct WriteLocks {
    held: Mutex<HashSet<String>>,
}

/// Exclusive right to write one artifact name; released on drop
#[derive(Debug)]
pub struct WriteLease<'a> {
    locks: &'a WriteLocks,
    key: String,
}

impl WriteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, failing with [`StoreError::Busy`] if another lease holds it
    pub fn acquire(&self, key: &str) -> StoreResult<WriteLease<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(key.to_string()) {
            return Err(StoreError::Busy(key.to_string()));
        }
        Ok(WriteLease {
            locks: self,
            key: key.to_string(),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }
}

impl Drop for WriteLease<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.key);
    }
}
