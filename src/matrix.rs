//! The (page, viewport) job matrix and deterministic artifact naming.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::config::{ConfigError, ConfigResult};

/// A viewport size in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Parse `WxH`, e.g. `1440x900`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once('x')
            .ok_or_else(|| format!("expected WxH, got '{}'", s))?;
        let width: u32 = w.parse().map_err(|_| format!("bad width in '{}'", s))?;
        let height: u32 = h.parse().map_err(|_| format!("bad height in '{}'", s))?;
        if width == 0 || height == 0 {
            return Err(format!("zero dimension in '{}'", s));
        }
        Ok(Self { width, height })
    }
}

/// Viewports every page is captured at, in processing order
pub const RESOLUTIONS: [Resolution; 6] = [
    Resolution::new(1920, 1080), // Full HD
    Resolution::new(1440, 900),  // WXGA+
    Resolution::new(1024, 768),  // XGA
    Resolution::new(768, 1024),  // tablet portrait
    Resolution::new(395, 852),
    Resolution::new(375, 667),
];

/// One (url, resolution) unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureJob {
    pub url: String,
    pub resolution: Resolution,
}

impl CaptureJob {
    pub fn new(url: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            url: url.into(),
            resolution,
        }
    }

    /// Artifact file name for this job, see [`artifact_name`]
    pub fn artifact_name(&self) -> ConfigResult<String> {
        artifact_name(&self.url, self.resolution)
    }
}

impl fmt::Display for CaptureJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.url, self.resolution)
    }
}

/// Enumerate jobs url-major, resolution-minor, keeping both input orders
pub fn jobs(urls: &[String], resolutions: &[Resolution]) -> Vec<CaptureJob> {
    urls.iter()
        .flat_map(|url| {
            resolutions
                .iter()
                .map(move |resolution| CaptureJob::new(url.clone(), *resolution))
        })
        .collect()
}

/// Page part of an artifact name: host with dots as dashes, followed by the path
/// with every non-alphanumeric character replaced by a dash.
///
/// `https://www.example.com/about/team` becomes `www-example-com-about-team`.
pub fn artifact_stem(url: &str) -> ConfigResult<String> {
    let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let host = parsed.host_str().ok_or_else(|| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: "url has no host".to_string(),
    })?;

    let host = host.replace('.', "-");
    let path: String = parsed
        .path()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    Ok(format!("{}{}", host, path))
}

/// Deterministic artifact file name: `<stem>-<width>x<height>.png`
pub fn artifact_name(url: &str, resolution: Resolution) -> ConfigResult<String> {
    Ok(format!("{}-{}.png", artifact_stem(url)?, resolution))
}

/// Strip the `-WxH.png` suffix from an artifact file name
pub fn stem_of_artifact(file_name: &str) -> Option<&str> {
    let base = file_name.strip_suffix(".png")?;
    let (stem, resolution) = base.rsplit_once('-')?;
    resolution.parse::<Resolution>().ok()?;
    Some(stem)
}
