//! Shotline capture-and-compare engine
//!
//! Turns a job configuration into full-page screenshots taken before and
//! after a change, compares them pixel by pixel and tracks each run's
//! progress for concurrent observers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  JobService  (run_job / get_status / get_results / abort)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  JobRunner                                                  │
//! │    ├── build_contexts(config, phase) -> [ScreenshotContext] │
//! │    ├── SessionPool ── SessionFactory ── BrowserSession      │
//! │    ├── CaptureOrchestrator::capture -> [CapturedFrame]      │
//! │    ├── ScreenshotStore (png files, report.json)             │
//! │    ├── compare_images(before, after) -> ImageComparison     │
//! │    └── RunTracker (BEFORE_RUNNING .. FINISHED_* | ERROR)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod capture;
pub mod compare;
pub mod config;
pub mod context;
pub mod error;
pub mod http_check;
pub mod pool;
pub mod runner;
pub mod service;
pub mod store;
pub mod tracker;
pub mod webdriver;

pub use browser::{BrowserCapabilities, BrowserSession, SessionFactory};
pub use capture::{CaptureOrchestrator, CaptureSettings, CapturedFrame};
pub use compare::{compare_images, ImageComparison};
pub use config::EngineConfig;
pub use context::build_contexts;
pub use error::{EngineError, EngineResult};
pub use runner::{JobRunner, Step};
pub use service::JobService;
pub use store::ScreenshotStore;
pub use tracker::RunTracker;
pub use webdriver::WebDriverFactory;
