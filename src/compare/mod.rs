//! Baseline/candidate image comparison.
//!
//! [`normalize`] pads both images to a common size, then [`Comparator`] counts the
//! pixels whose color distance exceeds the threshold and renders a diff image.

pub mod normalize;
pub mod pixel;

pub use normalize::{Normalized, normalize};
pub use pixel::{Comparator, Comparison, MAX_YIQ_DELTA};

use image::RgbaImage;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Result type for comparison operations
pub type CompareResult<T> = Result<T, CompareError>;

/// Errors that can occur while comparing images
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("buffer length mismatch: expected {expected} bytes, got {first} and {second}")]
    SizeMismatch {
        expected: usize,
        first: usize,
        second: usize,
    },

    #[error("cannot build a {width}x{height} diff image")]
    Buffer { width: u32, height: u32 },

    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot write diff image {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl Comparator {
    /// Normalize two images of possibly different size and compare them
    pub fn compare_images(&self, baseline: &RgbaImage, candidate: &RgbaImage) -> CompareResult<Comparison> {
        let normalized = normalize(baseline, candidate);
        debug!(
            baseline = %format!("{}x{}", baseline.width(), baseline.height()),
            candidate = %format!("{}x{}", candidate.width(), candidate.height()),
            canvas = %format!("{}x{}", normalized.width, normalized.height),
            "normalized images"
        );
        self.compare(&normalized.first, &normalized.second, normalized.width, normalized.height)
    }

    /// Load two PNG files, write the diff PNG and return the differing pixel count
    pub fn compare_files(&self, baseline: &Path, candidate: &Path, diff: &Path) -> CompareResult<u64> {
        let baseline_image = load_rgba(baseline)?;
        let candidate_image = load_rgba(candidate)?;
        let comparison = self.compare_images(&baseline_image, &candidate_image)?;
        comparison.diff.save(diff).map_err(|source| CompareError::Encode {
            path: diff.to_path_buf(),
            source,
        })?;
        Ok(comparison.differing_pixels)
    }
}

/// Decode an image file into RGBA8
pub fn load_rgba(path: &Path) -> CompareResult<RgbaImage> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|source| CompareError::Decode {
            path: path.to_path_buf(),
            source,
        })
}
