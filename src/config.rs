//! Configuration management with environment variable support.
//!
//! Two layers feed a run:
//! - Process settings (artifact root, viewer port, Chrome binary, comparator
//!   threshold, settle delays) come from environment variables with defaults,
//!   cached on first access.
//! - The run input file (`config/config.json`) lists the pages to capture, optional
//!   basic-auth credentials, the site adaptation policy and timing overrides.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `VISREG_ROOT` | Directory holding `records/`, `new_records/`, `compare_records/`, `config/` | `.` |
//! | `VISREG_PORT` | Result viewer port | `3000` |
//! | `VISREG_CHROME_PATH` | Chrome/Chromium executable (auto-detected when unset) | unset |
//! | `VISREG_THRESHOLD` | Per-pixel color distance threshold (0-1) | `0.1` |
//! | `VISREG_SETTLE_DELAY_MS` | Fixed delay after document readiness | `10000` |
//! | `VISREG_HIDE_DELAY_MS` | Fixed delay after hiding UI chrome | `1000` |
//! | `AUTH_USERNAME` / `AUTH_PASSWORD` | Basic-auth override, both must be set | unset |
//!
//! # Example
//!
//! ```json
//! {
//!   "urls": ["https://example.com/", "https://example.com/about"],
//!   "credentials": { "username": "staging", "password": "secret" },
//!   "policy": { "hide_selectors": [".CookiePanel"], "remove_selectors": [".Banner"] },
//!   "timings": { "settle_delay_ms": 4000 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::capture::{CaptureTimings, PagePolicy};

// ============================================================================
// Default Values
// ============================================================================

/// Default artifact root
pub const DEFAULT_ROOT: &str = ".";

/// Default result viewer port
pub const DEFAULT_PORT: u16 = 3000;

/// Default comparator threshold
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Hard per-attempt navigation timeout
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 60_000;

/// Best-effort near-network-idle wait
pub const DEFAULT_NETWORK_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Window without newly started resource fetches that counts as idle
pub const DEFAULT_NETWORK_IDLE_WINDOW_MS: u64 = 1_000;

/// Best-effort document-complete wait
pub const DEFAULT_DOCUMENT_READY_TIMEOUT_MS: u64 = 60_000;

/// Fixed settle delay after document readiness
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 10_000;

/// Fixed delay after hiding ephemeral UI
pub const DEFAULT_HIDE_DELAY_MS: u64 = 1_000;

/// Backoff between navigation attempts
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 5_000;

/// Navigation attempts per job
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Interval between readiness polls
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Accept-Language sent with every page request
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7";

/// Run input file, relative to the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the artifact root
pub const ENV_ROOT: &str = "VISREG_ROOT";

/// Environment variable for the viewer port
pub const ENV_PORT: &str = "VISREG_PORT";

/// Environment variable for the Chrome executable
pub const ENV_CHROME_PATH: &str = "VISREG_CHROME_PATH";

/// Environment variable for the comparator threshold
pub const ENV_THRESHOLD: &str = "VISREG_THRESHOLD";

/// Environment variable for the settle delay
pub const ENV_SETTLE_DELAY_MS: &str = "VISREG_SETTLE_DELAY_MS";

/// Environment variable for the UI-hide delay
pub const ENV_HIDE_DELAY_MS: &str = "VISREG_HIDE_DELAY_MS";

// ============================================================================
// Legacy Environment Variable Support
// ============================================================================

/// Basic-auth username override, kept unprefixed for existing deployments
pub const ENV_AUTH_USERNAME: &str = "AUTH_USERNAME";

/// Basic-auth password override, kept unprefixed for existing deployments
pub const ENV_AUTH_PASSWORD: &str = "AUTH_PASSWORD";

// ============================================================================
// Process Settings (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Process-wide settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Artifact root directory
    pub root: PathBuf,
    /// Viewer settings
    pub server: ServerSettings,
    /// Capture and comparison settings
    pub capture: CaptureSettings,
}

/// Result viewer settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
}

/// Capture-related settings
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Explicit Chrome executable, auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Comparator threshold
    pub threshold: f64,
    /// Fixed settle delay after document readiness
    pub settle_delay: Duration,
    /// Fixed delay after hiding UI chrome
    pub hide_delay: Duration,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            root: env::var(ENV_ROOT)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROOT)),
            server: ServerSettings {
                port: parse_env(ENV_PORT).unwrap_or(DEFAULT_PORT),
            },
            capture: CaptureSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            server: ServerSettings { port: DEFAULT_PORT },
            capture: CaptureSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl CaptureSettings {
    /// Create capture settings from environment variables
    pub fn from_env() -> Self {
        Self {
            chrome_path: env::var(ENV_CHROME_PATH)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            threshold: parse_env::<f64>(ENV_THRESHOLD)
                .filter(|t| (0.0..=1.0).contains(t))
                .unwrap_or(DEFAULT_THRESHOLD),
            settle_delay: Duration::from_millis(
                parse_env(ENV_SETTLE_DELAY_MS).unwrap_or(DEFAULT_SETTLE_DELAY_MS),
            ),
            hide_delay: Duration::from_millis(
                parse_env(ENV_HIDE_DELAY_MS).unwrap_or(DEFAULT_HIDE_DELAY_MS),
            ),
        }
    }

    /// Create capture settings with defaults
    pub fn defaults() -> Self {
        Self {
            chrome_path: None,
            threshold: DEFAULT_THRESHOLD,
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            hide_delay: Duration::from_millis(DEFAULT_HIDE_DELAY_MS),
        }
    }

    /// Timings with the environment-provided delays applied
    pub fn timings(&self) -> CaptureTimings {
        CaptureTimings {
            settle_delay: self.settle_delay,
            hide_delay: self.hide_delay,
            ..CaptureTimings::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

// ============================================================================
// Run Input File
// ============================================================================

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that make a run impossible before any job starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config lists no urls")]
    NoUrls,

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// HTTP basic-auth credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Credentials from `AUTH_USERNAME`/`AUTH_PASSWORD`, only when both are set
    pub fn from_env() -> Option<Self> {
        let username = env::var(ENV_AUTH_USERNAME).ok().filter(|s| !s.is_empty())?;
        let password = env::var(ENV_AUTH_PASSWORD).ok().filter(|s| !s.is_empty())?;
        Some(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Millisecond overrides for [`CaptureTimings`], all optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingOverrides {
    pub navigation_timeout_ms: Option<u64>,
    pub network_idle_timeout_ms: Option<u64>,
    pub document_ready_timeout_ms: Option<u64>,
    pub settle_delay_ms: Option<u64>,
    pub hide_delay_ms: Option<u64>,
    pub retry_backoff_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl TimingOverrides {
    /// Apply the overrides that are present on top of `base`
    pub fn apply(&self, base: CaptureTimings) -> CaptureTimings {
        let ms = Duration::from_millis;
        CaptureTimings {
            navigation_timeout: self.navigation_timeout_ms.map(ms).unwrap_or(base.navigation_timeout),
            network_idle_timeout: self.network_idle_timeout_ms.map(ms).unwrap_or(base.network_idle_timeout),
            document_ready_timeout: self.document_ready_timeout_ms.map(ms).unwrap_or(base.document_ready_timeout),
            settle_delay: self.settle_delay_ms.map(ms).unwrap_or(base.settle_delay),
            hide_delay: self.hide_delay_ms.map(ms).unwrap_or(base.hide_delay),
            retry_backoff: self.retry_backoff_ms.map(ms).unwrap_or(base.retry_backoff),
            max_attempts: self.max_attempts.filter(|n| *n > 0).unwrap_or(base.max_attempts),
            ..base
        }
    }
}

/// The run input record, read once per run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Pages to capture, in processing order
    pub urls: Vec<String>,

    /// Optional basic-auth credentials
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Site adaptation policy
    #[serde(default)]
    pub policy: PagePolicy,

    /// Timing overrides
    #[serde(default)]
    pub timings: TimingOverrides,
}

impl RunConfig {
    /// Load and validate the run input file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that cannot produce a single job
    pub fn validate(&self) -> ConfigResult<()> {
        if self.urls.is_empty() {
            return Err(ConfigError::NoUrls);
        }
        for url in &self.urls {
            crate::matrix::artifact_stem(url)?;
        }
        Ok(())
    }

    /// Replace file credentials with `override_credentials` when present
    pub fn with_credentials_override(mut self, override_credentials: Option<Credentials>) -> Self {
        if let Some(credentials) = override_credentials {
            self.credentials = Some(credentials);
        }
        self
    }

    /// Capture timings: environment-derived base with the file's overrides applied
    pub fn timings(&self, settings: &CaptureSettings) -> CaptureTimings {
        self.timings.apply(settings.timings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.root, PathBuf::from("."));
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.capture.threshold, 0.1);
        assert_eq!(config.capture.settle_delay, Duration::from_secs(10));
        assert_eq!(config.capture.hide_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_load_minimal_config() {
        let file = write_config(r#"{"urls": ["https://example.com/"]}"#);
        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.urls, vec!["https://example.com/".to_string()]);
        assert!(config.credentials.is_none());
        assert!(config.policy.hide_selectors.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = RunConfig::load(Path::new("/nonexistent/visreg/config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_malformed_file() {
        let file = write_config(r#"{"urls": "#);
        let err = RunConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_rejects_empty_url_list() {
        let file = write_config(r#"{"urls": []}"#);
        assert!(matches!(RunConfig::load(file.path()), Err(ConfigError::NoUrls)));
    }

    #[test]
    fn test_load_rejects_bad_url() {
        let file = write_config(r#"{"urls": ["not a url"]}"#);
        assert!(matches!(
            RunConfig::load(file.path()),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_credentials_override_takes_precedence() {
        let file = write_config(
            r#"{"urls": ["https://example.com/"], "credentials": {"username": "a", "password": "b"}}"#,
        );
        let config = RunConfig::load(file.path())
            .unwrap()
            .with_credentials_override(Some(Credentials::new("env", "pw")));
        assert_eq!(config.credentials, Some(Credentials::new("env", "pw")));

        let kept = RunConfig::load(file.path()).unwrap().with_credentials_override(None);
        assert_eq!(kept.credentials, Some(Credentials::new("a", "b")));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("user", "hunter2"));
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_timing_overrides_apply() {
        let overrides = TimingOverrides {
            settle_delay_ms: Some(250),
            max_attempts: Some(0),
            ..Default::default()
        };
        let timings = overrides.apply(CaptureTimings::default());
        assert_eq!(timings.settle_delay, Duration::from_millis(250));
        // zero attempts would never navigate, the default is kept
        assert_eq!(timings.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(timings.navigation_timeout, Duration::from_secs(60));
    }
}
