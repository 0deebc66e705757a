//! Engine configuration
//!
//! Settings that belong to the installation rather than to a job: where
//! screenshots go, which WebDriver endpoint to use and how many browser
//! sessions may be open at once.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::EngineResult;

/// Engine configuration, threaded explicitly through runner and tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    /// Base directory for all run output
    pub working_dir: PathBuf,

    /// Screenshot directory, relative to the working directory
    pub screenshot_dir: PathBuf,

    /// Report directory, relative to the working directory
    pub report_dir: PathBuf,

    /// WebDriver endpoint
    pub webdriver_url: String,

    /// Upper bound of concurrently open browser sessions
    pub max_sessions: usize,

    /// Pause after each scroll so layout can settle
    pub scroll_settle_ms: u64,

    /// Consecutive equal captures that count as "no animation"
    pub stable_frames: u32,

    /// Finished runs kept in memory by the job service
    pub max_retained_runs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            screenshot_dir: PathBuf::from("report/screenshots"),
            report_dir: PathBuf::from("report"),
            webdriver_url: "http://127.0.0.1:4444".to_string(),
            max_sessions: 4,
            scroll_settle_ms: 50,
            stable_frames: 10,
            max_retained_runs: 50,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> EngineResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Same settings rooted in another working directory
    pub fn with_working_dir(&self, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            ..self.clone()
        }
    }

    /// Get the screenshot directory
    pub fn screenshot_path(&self) -> PathBuf {
        self.working_dir.join(&self.screenshot_dir)
    }

    /// Get the report directory
    pub fn report_path(&self) -> PathBuf {
        self.working_dir.join(&self.report_dir)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }
}
