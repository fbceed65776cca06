//! Page capture: the browser seam, its Chrome and mock backends, page
//! preparation and the orchestrator that runs jobs through them.

pub mod backend;
pub mod chrome;
pub mod mock;
pub mod orchestrator;
pub mod policy;
pub mod types;

pub use backend::{BrowserLauncher, BrowserSession, Clock, ManualClock, SessionGuard, SystemClock};
pub use chrome::{ChromeLauncher, ChromeSession};
pub use mock::{MockEvent, MockLauncher, MockPage};
pub use orchestrator::{Orchestrator, RunError, RunResult};
pub use policy::PagePolicy;
pub use types::{
    CaptureError, CaptureResult, CaptureState, CaptureTimings, CapturedPage, NavigationError,
    NavigationResponse, SessionError, SessionResult,
};
