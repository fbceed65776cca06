//! visreg - visual regression testing for web pages.
//!
//! This crate provides:
//! - A fixed resolution matrix and deterministic artifact naming
//! - A retrying browser capture state machine over a pluggable backend
//!   (headless Chrome in production, a scripted mock in tests)
//! - Size normalization and pixelmatch-style image comparison
//! - A run manifest and a read-only HTTP viewer for the results
//!
//! # Example
//!
//! ```rust,no_run
//! use visreg::capture::{ChromeLauncher, Orchestrator};
//! use visreg::matrix::{jobs, RESOLUTIONS};
//! use visreg::store::ArtifactStore;
//!
//! let store = ArtifactStore::new(".");
//! let jobs = jobs(&["https://example.com/".to_string()], &RESOLUTIONS);
//! let manifest = Orchestrator::new(ChromeLauncher::new())
//!     .run_compare(&jobs, &store)
//!     .unwrap();
//! for result in &manifest.results {
//!     println!("{} @ {}: {} pixels", result.url, result.resolution, result.differences);
//! }
//! ```

pub mod capture;
pub mod compare;
pub mod config;
pub mod manifest;
pub mod matrix;
pub mod select;
pub mod server;
pub mod store;

// Re-export capture types
pub use capture::{
    BrowserLauncher, BrowserSession, CaptureError, CaptureState, CaptureTimings, ChromeLauncher,
    MockLauncher, MockPage, Orchestrator, PagePolicy, RunError,
};

// Re-export comparison
pub use compare::{Comparator, CompareError, CompareResult, Comparison, normalize};

// Re-export configuration
pub use config::{ConfigError, Credentials, RunConfig};

// Re-export results and storage
pub use manifest::{ComparisonResult, RecordSummary, RunManifest, SkipReason, SkippedJob};
pub use matrix::{CaptureJob, RESOLUTIONS, Resolution};
pub use select::{AllJobs, FixedSelection, JobSelector, PromptSelector, Selection};
pub use store::{ArtifactStore, StoreError};
