//! Headless Chrome backend built on `headless_chrome`.
//!
//! Every job gets its own browser process with a throwaway profile directory, so
//! cookies, caches and injected styles never leak between jobs. Dropping the
//! session kills the process.

use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::backend::{BrowserLauncher, BrowserSession};
use super::types::{NavigationResponse, SessionError, SessionResult};
use crate::config::Credentials;
use crate::matrix::{CaptureJob, Resolution};

/// Flags passed to every Chrome process
const CHROME_ARGS: &[&str] = &[
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--disable-gpu",
    "--force-device-scale-factor=1",
    "--hide-scrollbars",
];

/// Tags the current document so a fresh one can be told apart from it
const MARK_DOCUMENT: &str = "(() => { window.__visregPrevious = true; return true; })()";

/// True once the newly navigated document has been parsed
const DOCUMENT_PARSED: &str =
    "!window.__visregPrevious && document.readyState !== 'loading'";

const DOCUMENT_POLL: Duration = Duration::from_millis(100);

/// Status of the main document from the Navigation Timing entry
const NAVIGATION_STATUS: &str =
    "(() => { const e = performance.getEntriesByType('navigation')[0]; return e && e.responseStatus ? e.responseStatus : null; })()";

/// Full scrollable size of the document as `[width, height]`
const CONTENT_SIZE: &str = "[Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0), Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0)]";

/// Launches one headless Chrome per job
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    /// Chrome executable, auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// How long the browser may stay silent before `headless_chrome` gives up on it
    pub idle_timeout: Duration,
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self {
            chrome_path: crate::config::get().capture.chrome_path.clone(),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl ChromeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chrome_path(mut self, path: Option<PathBuf>) -> Self {
        self.chrome_path = path;
        self
    }
}

impl BrowserLauncher for ChromeLauncher {
    fn launch(&self, job: &CaptureJob) -> SessionResult<Box<dyn BrowserSession>> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .window_size(Some((job.resolution.width, job.resolution.height)))
            .path(self.chrome_path.clone())
            .idle_browser_timeout(self.idle_timeout)
            .args(CHROME_ARGS.iter().map(OsStr::new).collect())
            .build()
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let browser = Browser::new(options).map_err(|e| SessionError::Launch(e.to_string()))?;
        let tab = browser.new_tab().map_err(|e| SessionError::Launch(e.to_string()))?;
        debug!(job = %job, "launched headless chrome");

        Ok(Box::new(ChromeSession {
            _browser: browser,
            tab,
            viewport: job.resolution,
            styles: Vec::new(),
            headers: Vec::new(),
        }))
    }

    fn backend_type(&self) -> &str {
        "chrome"
    }
}

/// A single tab in a dedicated Chrome process
pub struct ChromeSession {
    // Kept alive for the session; dropping it terminates the process.
    _browser: Browser,
    tab: Arc<Tab>,
    viewport: Resolution,
    styles: Vec<String>,
    headers: Vec<(String, String)>,
}

impl ChromeSession {
    fn set_window(&self, width: u32, height: u32) -> SessionResult<()> {
        self.tab
            .set_bounds(Bounds::Normal {
                left: Some(0),
                top: Some(0),
                width: Some(f64::from(width)),
                height: Some(f64::from(height)),
            })
            .map_err(SessionError::protocol)?;
        Ok(())
    }

    fn push_headers(&self) -> SessionResult<()> {
        let headers: HashMap<&str, &str> = self
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.tab
            .set_extra_http_headers(headers)
            .map_err(SessionError::protocol)
    }

    fn inject_styles(&mut self) -> SessionResult<()> {
        for css in self.styles.clone() {
            let script = format!(
                "(() => {{ const s = document.createElement('style'); s.textContent = {}; (document.head || document.documentElement).appendChild(s); return true; }})()",
                serde_json::Value::String(css)
            );
            self.evaluate(&script)?;
        }
        Ok(())
    }

    /// Wait until the document loaded by the last navigation is parsed.
    ///
    /// Subresources may still be loading; idleness is the orchestrator's call.
    fn wait_for_document(&mut self, url: &str, timeout: Duration) -> SessionResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(serde_json::Value::Bool(true)) = self.evaluate(DOCUMENT_PARSED) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Protocol(format!(
                    "{} did not load within {:?}",
                    url, timeout
                )));
            }
            std::thread::sleep(DOCUMENT_POLL);
        }
    }

    fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value));
    }
}

impl BrowserSession for ChromeSession {
    fn set_viewport(&mut self, resolution: Resolution) -> SessionResult<()> {
        self.viewport = resolution;
        self.set_window(resolution.width, resolution.height)
    }

    fn add_style(&mut self, css: &str) -> SessionResult<()> {
        // Applied after each navigation; styles added to about:blank would be lost.
        self.styles.push(css.to_string());
        Ok(())
    }

    fn set_extra_headers(&mut self, headers: &[(String, String)]) -> SessionResult<()> {
        for (name, value) in headers {
            self.set_header(name, value.clone());
        }
        self.push_headers()
    }

    fn authenticate(&mut self, credentials: &Credentials) -> SessionResult<()> {
        // Answer 401 challenges only; nothing is sent up front.
        self.tab
            .enable_fetch(None, Some(true))
            .map_err(SessionError::protocol)?;
        self.tab
            .authenticate(
                Some(credentials.username.clone()),
                Some(credentials.password.clone()),
            )
            .map_err(SessionError::protocol)?;
        Ok(())
    }

    fn navigate(&mut self, url: &str, timeout: Duration) -> SessionResult<NavigationResponse> {
        // A failed mark just means there is no live document yet.
        let _ = self.evaluate(MARK_DOCUMENT);
        self.tab.navigate_to(url).map_err(SessionError::protocol)?;
        self.wait_for_document(url, timeout)?;
        self.inject_styles()?;

        let status = self.evaluate(NAVIGATION_STATUS)?;
        Ok(match status.as_u64().and_then(|s| u16::try_from(s).ok()) {
            Some(code) => NavigationResponse::status(code),
            None => NavigationResponse::no_response(),
        })
    }

    fn evaluate(&mut self, expression: &str) -> SessionResult<serde_json::Value> {
        let wrapped = format!("JSON.stringify(({}) ?? null)", expression);
        let remote = self.tab.evaluate(&wrapped, false).map_err(SessionError::protocol)?;
        match remote.value {
            Some(serde_json::Value::String(json)) => {
                serde_json::from_str(&json).map_err(|e| SessionError::Script(e.to_string()))
            }
            Some(other) => Err(SessionError::Script(format!("expected JSON text, got {}", other))),
            None => Ok(serde_json::Value::Null),
        }
    }

    fn title(&mut self) -> SessionResult<String> {
        self.tab.get_title().map_err(SessionError::protocol)
    }

    fn screenshot_full_page(&mut self) -> SessionResult<Vec<u8>> {
        let size = self.evaluate(CONTENT_SIZE)?;
        let dimension = |i: usize| size.get(i).and_then(|v| v.as_u64()).map(|v| v as u32);
        let width = dimension(0).unwrap_or(self.viewport.width).max(self.viewport.width);
        let height = dimension(1).unwrap_or(self.viewport.height).max(self.viewport.height);

        // Grow the window to the document so the capture covers the whole page.
        self.set_window(width, height)?;
        let png = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(SessionError::protocol);
        self.set_window(self.viewport.width, self.viewport.height)?;
        png
    }

    fn close(&mut self) -> SessionResult<()> {
        self.tab.close(false).map_err(SessionError::protocol)?;
        Ok(())
    }
}
