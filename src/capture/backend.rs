//! Browser automation abstraction.
//!
//! The orchestrator only talks to these traits:
//! - `ChromeLauncher` drives a real headless Chrome per job
//! - `MockLauncher` replays scripted page behaviour for tests

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use super::types::{NavigationResponse, SessionResult};
use crate::config::Credentials;
use crate::matrix::{CaptureJob, Resolution};

/// Trait for browser backends: hands out one fresh, isolated session per job
pub trait BrowserLauncher {
    /// Start a new browser process/context for `job`
    fn launch(&self, job: &CaptureJob) -> SessionResult<Box<dyn BrowserSession>>;

    /// Backend identifier (e.g. "chrome", "mock")
    fn backend_type(&self) -> &str;
}

/// One open page in an isolated browser session
pub trait BrowserSession {
    /// Emulate a viewport of exactly this size at device scale factor 1
    fn set_viewport(&mut self, resolution: Resolution) -> SessionResult<()>;

    /// Inject a stylesheet into every document this session loads
    fn add_style(&mut self, css: &str) -> SessionResult<()>;

    /// Send these headers with every request
    fn set_extra_headers(&mut self, headers: &[(String, String)]) -> SessionResult<()>;

    /// Answer HTTP basic-auth challenges with these credentials
    fn authenticate(&mut self, credentials: &Credentials) -> SessionResult<()>;

    /// Load `url`, returning once the DOM is ready or `timeout` expires
    fn navigate(&mut self, url: &str, timeout: Duration) -> SessionResult<NavigationResponse>;

    /// Evaluate a JavaScript expression and return its JSON value
    fn evaluate(&mut self, expression: &str) -> SessionResult<serde_json::Value>;

    /// Title of the current document
    fn title(&mut self) -> SessionResult<String>;

    /// PNG screenshot of the whole scrollable page
    fn screenshot_full_page(&mut self) -> SessionResult<Vec<u8>>;

    /// Release the page and the browser process
    fn close(&mut self) -> SessionResult<()>;
}

/// Owns a session for the length of one job and closes it exactly once,
/// whichever way the job ends
pub struct SessionGuard {
    session: Option<Box<dyn BrowserSession>>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn BrowserSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// The guarded session; `None` once closed
    pub fn session(&mut self) -> Option<&mut (dyn BrowserSession + 'static)> {
        self.session.as_deref_mut()
    }

    /// Close now; later calls are no-ops
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close() {
                warn!("failed to close browser session cleanly: {}", e);
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Time source for waits and delays
pub trait Clock {
    /// Monotonic time since the clock was created
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: sleeping advances time instantly and is recorded
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Sum of all sleeps
    pub fn elapsed(&self) -> Duration {
        self.now()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.lock().map(|n| *n).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += duration;
        }
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
    }
}
