//! Scripted in-process browser for exercising the orchestrator without Chrome.

use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::backend::{BrowserLauncher, BrowserSession};
use super::types::{NavigationResponse, SessionError, SessionResult};
use crate::config::Credentials;
use crate::matrix::{CaptureJob, Resolution};

/// How a mocked page behaves
#[derive(Debug, Clone)]
pub struct MockPage {
    /// Status per navigation attempt, the last entry repeats; `None` is a
    /// transport error
    pub statuses: Vec<Option<u16>>,
    /// Document title
    pub title: String,
    /// Fill color of the screenshot
    pub color: [u8; 4],
    /// Full-page height, `None` means exactly the viewport height
    pub page_height: Option<u32>,
    /// Whether the network-idle predicate ever turns true
    pub network_idle: bool,
    /// Whether the document-ready predicate ever turns true
    pub document_ready: bool,
    /// Make the UI-hiding script throw
    pub fail_hide: bool,
    /// Make the screenshot call fail
    pub fail_screenshot: bool,
    /// Make reading the title fail
    pub fail_title: bool,
}

impl Default for MockPage {
    fn default() -> Self {
        Self {
            statuses: vec![Some(200)],
            title: "Mock Page".to_string(),
            color: [255, 255, 255, 255],
            page_height: None,
            network_idle: true,
            document_ready: true,
            fail_hide: false,
            fail_screenshot: false,
            fail_title: false,
        }
    }
}

impl MockPage {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = Option<u16>>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn page_height(mut self, height: u32) -> Self {
        self.page_height = Some(height);
        self
    }

    pub fn never_idle(mut self) -> Self {
        self.network_idle = false;
        self.document_ready = false;
        self
    }

    pub fn failing_hide(mut self) -> Self {
        self.fail_hide = true;
        self
    }

    pub fn failing_screenshot(mut self) -> Self {
        self.fail_screenshot = true;
        self
    }

    pub fn failing_title(mut self) -> Self {
        self.fail_title = true;
        self
    }

    fn status_for_attempt(&self, attempt: usize) -> Option<u16> {
        self.statuses
            .get(attempt)
            .or_else(|| self.statuses.last())
            .copied()
            .flatten()
    }
}

/// Something a mock session was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Launched(CaptureJob),
    Viewport(Resolution),
    Style,
    Headers(Vec<(String, String)>),
    Authenticated(String),
    Navigated { url: String, attempt: usize },
    Evaluated,
    Screenshot,
    Closed(String),
}

/// Launcher serving [`MockPage`]s by URL
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    pages: HashMap<String, MockPage>,
    fallback: MockPage,
    fail_launch: bool,
    events: Arc<Mutex<Vec<MockEvent>>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviour for `url`
    pub fn page(mut self, url: impl Into<String>, page: MockPage) -> Self {
        self.pages.insert(url.into(), page);
        self
    }

    /// Make every launch fail
    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// All events recorded across sessions
    pub fn events(&self) -> Vec<MockEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Navigation attempts made for `url`
    pub fn navigations(&self, url: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, MockEvent::Navigated { url: u, .. } if u == url))
            .count()
    }

    /// Number of sessions launched and closed
    pub fn launches_and_closes(&self) -> (usize, usize) {
        let events = self.events();
        let launched = events.iter().filter(|e| matches!(e, MockEvent::Launched(_))).count();
        let closed = events.iter().filter(|e| matches!(e, MockEvent::Closed(_))).count();
        (launched, closed)
    }
}

impl BrowserLauncher for MockLauncher {
    fn launch(&self, job: &CaptureJob) -> SessionResult<Box<dyn BrowserSession>> {
        if self.fail_launch {
            return Err(SessionError::Launch("mock launcher configured to fail".to_string()));
        }
        record(&self.events, MockEvent::Launched(job.clone()));
        let page = self.pages.get(&job.url).cloned().unwrap_or_else(|| self.fallback.clone());
        Ok(Box::new(MockSession {
            page,
            url: job.url.clone(),
            viewport: job.resolution,
            attempts: 0,
            events: Arc::clone(&self.events),
        }))
    }

    fn backend_type(&self) -> &str {
        "mock"
    }
}

struct MockSession {
    page: MockPage,
    url: String,
    viewport: Resolution,
    attempts: usize,
    events: Arc<Mutex<Vec<MockEvent>>>,
}

impl BrowserSession for MockSession {
    fn set_viewport(&mut self, resolution: Resolution) -> SessionResult<()> {
        self.viewport = resolution;
        record(&self.events, MockEvent::Viewport(resolution));
        Ok(())
    }

    fn add_style(&mut self, _css: &str) -> SessionResult<()> {
        record(&self.events, MockEvent::Style);
        Ok(())
    }

    fn set_extra_headers(&mut self, headers: &[(String, String)]) -> SessionResult<()> {
        record(&self.events, MockEvent::Headers(headers.to_vec()));
        Ok(())
    }

    fn authenticate(&mut self, credentials: &Credentials) -> SessionResult<()> {
        record(&self.events, MockEvent::Authenticated(credentials.username.clone()));
        Ok(())
    }

    fn navigate(&mut self, url: &str, _timeout: Duration) -> SessionResult<NavigationResponse> {
        let attempt = self.attempts;
        self.attempts += 1;
        record(
            &self.events,
            MockEvent::Navigated {
                url: url.to_string(),
                attempt,
            },
        );
        match self.page.status_for_attempt(attempt) {
            Some(code) => Ok(NavigationResponse::status(code)),
            None => Err(SessionError::Protocol("net::ERR_CONNECTION_REFUSED".to_string())),
        }
    }

    fn evaluate(&mut self, expression: &str) -> SessionResult<serde_json::Value> {
        record(&self.events, MockEvent::Evaluated);
        if expression.contains("getEntriesByType") {
            Ok(serde_json::Value::Bool(self.page.network_idle))
        } else if expression.contains("readyState") {
            Ok(serde_json::Value::Bool(self.page.document_ready))
        } else if self.page.fail_hide {
            Err(SessionError::Script("TypeError: document.head is null".to_string()))
        } else {
            Ok(serde_json::Value::from(0))
        }
    }

    fn title(&mut self) -> SessionResult<String> {
        if self.page.fail_title {
            return Err(SessionError::Protocol("target closed".to_string()));
        }
        Ok(self.page.title.clone())
    }

    fn screenshot_full_page(&mut self) -> SessionResult<Vec<u8>> {
        record(&self.events, MockEvent::Screenshot);
        if self.page.fail_screenshot {
            return Err(SessionError::Protocol("Page.captureScreenshot timed out".to_string()));
        }
        let height = self.page.page_height.unwrap_or(self.viewport.height);
        let img = RgbaImage::from_pixel(self.viewport.width, height, Rgba(self.page.color));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| SessionError::Protocol(format!("Failed to encode PNG: {}", e)))?;
        Ok(bytes)
    }

    fn close(&mut self) -> SessionResult<()> {
        record(&self.events, MockEvent::Closed(self.url.clone()));
        Ok(())
    }
}

fn record(events: &Mutex<Vec<MockEvent>>, event: MockEvent) {
    if let Ok(mut events) = events.lock() {
        events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_sequence_repeats_last() {
        let page = MockPage::default().statuses([Some(500), None, Some(200)]);
        assert_eq!(page.status_for_attempt(0), Some(500));
        assert_eq!(page.status_for_attempt(1), None);
        assert_eq!(page.status_for_attempt(2), Some(200));
        assert_eq!(page.status_for_attempt(7), Some(200));
    }

    #[test]
    fn test_mock_screenshot_is_png_of_viewport() {
        let launcher = MockLauncher::new().page("https://a.com/", MockPage::default().page_height(40));
        let job = CaptureJob::new("https://a.com/", Resolution::new(30, 20));
        let mut session = launcher.launch(&job).unwrap();
        let png = session.screenshot_full_page().unwrap();
        assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]);
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (30, 40));
    }

    #[test]
    fn test_failing_launch() {
        let launcher = MockLauncher::new().failing_launch();
        let job = CaptureJob::new("https://a.com/", Resolution::new(1, 1));
        assert!(matches!(launcher.launch(&job), Err(SessionError::Launch(_))));
        assert!(launcher.events().is_empty());
    }
}
