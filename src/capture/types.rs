// Core types for the capture state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config;

/// States a capture job moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    Init,
    Launched,
    Navigating,
    Stabilizing,
    UiHidden,
    Captured,
    Closed,
    Failed,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Init => "init",
            CaptureState::Launched => "launched",
            CaptureState::Navigating => "navigating",
            CaptureState::Stabilizing => "stabilizing",
            CaptureState::UiHidden => "ui-hidden",
            CaptureState::Captured => "captured",
            CaptureState::Closed => "closed",
            CaptureState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bounded waits, fixed delays and the retry policy of a capture.
///
/// The settle and hide delays stand in for "the page is visually stable"; no
/// content-based completion signal exists, so they are plain constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTimings {
    /// Hard timeout of a single navigation attempt
    pub navigation_timeout: Duration,
    /// Best-effort near-network-idle wait
    pub network_idle_timeout: Duration,
    /// No resource fetch started within this window counts as idle
    pub network_idle_window: Duration,
    /// Best-effort document-complete wait
    pub document_ready_timeout: Duration,
    /// Fixed delay after document readiness
    pub settle_delay: Duration,
    /// Fixed delay after hiding UI chrome
    pub hide_delay: Duration,
    /// Delay between navigation attempts
    pub retry_backoff: Duration,
    /// Navigation attempts before the job fails
    pub max_attempts: u32,
    /// Interval between readiness polls
    pub poll_interval: Duration,
}

impl Default for CaptureTimings {
    fn default() -> Self {
        let ms = Duration::from_millis;
        Self {
            navigation_timeout: ms(config::DEFAULT_NAVIGATION_TIMEOUT_MS),
            network_idle_timeout: ms(config::DEFAULT_NETWORK_IDLE_TIMEOUT_MS),
            network_idle_window: ms(config::DEFAULT_NETWORK_IDLE_WINDOW_MS),
            document_ready_timeout: ms(config::DEFAULT_DOCUMENT_READY_TIMEOUT_MS),
            settle_delay: ms(config::DEFAULT_SETTLE_DELAY_MS),
            hide_delay: ms(config::DEFAULT_HIDE_DELAY_MS),
            retry_backoff: ms(config::DEFAULT_RETRY_BACKOFF_MS),
            max_attempts: config::DEFAULT_MAX_ATTEMPTS,
            poll_interval: ms(config::DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// What the transport reported for a navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationResponse {
    /// HTTP status of the main document, `None` when no response arrived
    pub status: Option<u16>,
}

impl NavigationResponse {
    pub fn status(code: u16) -> Self {
        Self { status: Some(code) }
    }

    pub fn no_response() -> Self {
        Self { status: None }
    }
}

/// Why a single navigation attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("no response: {0}")]
    NoResponse(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),
}

/// A page that made it through the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPage {
    /// Rendered document title
    pub title: String,
    /// Navigation attempts it took
    pub attempts: u32,
}

/// Result type for browser session calls
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by a browser automation backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("script returned unexpected value: {0}")]
    Script(String),
}

impl SessionError {
    pub fn protocol(err: impl fmt::Display) -> Self {
        SessionError::Protocol(err.to_string())
    }
}

/// Result type for a single capture
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors that end a capture job
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No browser session could be acquired; fatal for the whole run
    #[error("cannot launch browser session: {0}")]
    Launch(SessionError),

    /// Every navigation attempt failed
    #[error("navigation failed after {attempts} attempt(s): {last}")]
    Navigation { attempts: u32, last: NavigationError },

    /// Anything else between launch and the screenshot write
    #[error("capture failed while {state}: {reason}")]
    Capture { state: CaptureState, reason: String },
}

impl CaptureError {
    /// Only launch failures abort the run; everything else skips the job
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, CaptureError::Launch(_))
    }
}
