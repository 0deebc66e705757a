//! Core types for shotline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{JobConfig, UrlConfig};
use crate::naming;

/// Which side of a change a capture belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Before,
    After,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Before => write!(f, "before"),
            Phase::After => write!(f, "after"),
        }
    }
}

/// One (url, path, window width) combination targeted for capture in one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotContext {
    pub url: String,
    pub path: String,
    pub window_width: u32,
    pub phase: Phase,
    pub url_config: UrlConfig,
}

impl ScreenshotContext {
    pub fn new(url: &str, path: &str, window_width: u32, phase: Phase, url_config: &UrlConfig) -> Self {
        Self {
            url: url.to_string(),
            path: path.to_string(),
            window_width,
            phase,
            url_config: url_config.clone(),
        }
    }

    /// Page address with the environment mapping applied
    pub fn target_url(&self) -> String {
        naming::build_url(&self.url, &self.path, &self.url_config.env_mapping)
    }

    /// Site root, loaded first so cookies can be written
    pub fn root_url(&self) -> String {
        naming::build_url(&self.url, "/", &self.url_config.env_mapping)
    }

    /// Address as configured, used to label results
    pub fn display_url(&self) -> String {
        naming::build_url(&self.url, &self.path, &BTreeMap::new())
    }

    pub fn file_name(&self, vertical_offset: u64) -> String {
        naming::screenshot_file_name(&self.url, &self.path, self.window_width, vertical_offset, self.phase)
    }

    /// Same context, other phase
    pub fn with_phase(&self, phase: Phase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }

    /// Short human-readable label for logs
    pub fn label(&self) -> String {
        format!("{} @ {}px ({})", self.display_url(), self.window_width, self.phase)
    }
}

/// Outcome of comparing the before and after screenshot at one scroll offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Configured URL key the result is judged against
    #[serde(default)]
    pub base_url: String,
    pub url: String,
    pub width: u32,
    pub vertical_scroll_position: u64,
    /// Fraction of differing pixels, 0.0 (identical) to 1.0 (completely different)
    pub difference: f64,
    pub screenshot_before_file_name: Option<String>,
    pub screenshot_after_file_name: Option<String>,
    pub difference_image_file_name: Option<String>,
    /// Largest channel distance observed between two pixels
    pub max_single_color_difference: u32,
}

impl ComparisonResult {
    /// No comparison possible: the before screenshot is missing
    pub fn no_before_image(base_url: &str, url: &str, width: u32, vertical_scroll_position: u64, after: Option<String>) -> Self {
        Self::sentinel(base_url, url, width, vertical_scroll_position, None, after)
    }

    /// No comparison possible: the after screenshot is missing
    pub fn no_after_image(base_url: &str, url: &str, width: u32, vertical_scroll_position: u64, before: Option<String>) -> Self {
        Self::sentinel(base_url, url, width, vertical_scroll_position, before, None)
    }

    /// Maximal difference with whatever screenshot references exist
    pub fn sentinel(
        base_url: &str,
        url: &str,
        width: u32,
        vertical_scroll_position: u64,
        before: Option<String>,
        after: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.to_string(),
            url: url.to_string(),
            width,
            vertical_scroll_position,
            difference: 1.0,
            screenshot_before_file_name: before,
            screenshot_after_file_name: after,
            difference_image_file_name: None,
            max_single_color_difference: 0,
        }
    }

    /// A result passes iff its difference does not exceed the tolerated maximum
    pub fn passes(&self, max_diff: f64) -> bool {
        self.difference <= max_diff
    }
}

/// A context whose capture failed; it is reported, never silently dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFailure {
    pub url: String,
    pub path: String,
    pub width: u32,
    pub phase: Phase,
    pub error: String,
}

impl ContextFailure {
    pub fn new(context: &ScreenshotContext, error: impl std::fmt::Display) -> Self {
        Self {
            url: context.url.clone(),
            path: context.path.clone(),
            width: context.window_width,
            phase: context.phase,
            error: error.to_string(),
        }
    }
}

/// Aggregate of all results for one configured URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlSummary {
    pub compared: usize,
    pub max_difference: f64,
    pub max_single_color_difference: u32,
    pub passed: bool,
}

/// Everything a report renderer needs to show before/after/diff triples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub results: Vec<ComparisonResult>,
    pub summary: BTreeMap<String, UrlSummary>,
    #[serde(default)]
    pub failures: Vec<ContextFailure>,
}

impl Report {
    /// Group results per configured URL and judge them against its max-diff
    pub fn build(config: &JobConfig, results: Vec<ComparisonResult>, failures: Vec<ContextFailure>) -> Self {
        let mut summary = BTreeMap::new();

        for (url, url_config) in &config.urls {
            let matching: Vec<&ComparisonResult> = results
                .iter()
                .filter(|r| r.base_url == *url)
                .collect();

            let max_difference = matching.iter().map(|r| r.difference).fold(0.0, f64::max);
            let max_single_color_difference = matching
                .iter()
                .map(|r| r.max_single_color_difference)
                .max()
                .unwrap_or(0);
            let passed = matching.iter().all(|r| r.passes(url_config.max_diff));

            summary.insert(
                url.clone(),
                UrlSummary {
                    compared: matching.len(),
                    max_difference,
                    max_single_color_difference,
                    passed,
                },
            );
        }

        Self {
            results,
            summary,
            failures,
        }
    }

    pub fn has_differences(&self) -> bool {
        self.summary.values().any(|s| !s.passed)
    }
}

/// Lifecycle of a run
///
/// Declaration order is the transition order; a run never moves to a state
/// that compares lower than its current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    BeforeRunning,
    /// A staged run that captured only the before phase stops here
    BeforeDone,
    AfterRunning,
    Comparing,
    FinishedWithoutDifferences,
    FinishedWithDifferences,
    Error,
}

impl RunState {
    /// Position in the transition order; all terminal states share the last rank
    pub fn rank(&self) -> u8 {
        match self {
            RunState::BeforeRunning => 0,
            RunState::BeforeDone => 1,
            RunState::AfterRunning => 2,
            RunState::Comparing => 3,
            RunState::FinishedWithoutDifferences
            | RunState::FinishedWithDifferences
            | RunState::Error => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 4
    }

    /// Whether `next` may follow `self`
    pub fn can_advance_to(&self, next: RunState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::BeforeRunning => write!(f, "BEFORE_RUNNING"),
            RunState::BeforeDone => write!(f, "BEFORE_DONE"),
            RunState::AfterRunning => write!(f, "AFTER_RUNNING"),
            RunState::Comparing => write!(f, "COMPARING"),
            RunState::FinishedWithoutDifferences => write!(f, "FINISHED_WITHOUT_DIFFERENCES"),
            RunState::FinishedWithDifferences => write!(f, "FINISHED_WITH_DIFFERENCES"),
            RunState::Error => write!(f, "ERROR"),
        }
    }
}

/// Snapshot of one job execution as seen by observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub id: String,
    pub state: RunState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub job_config: JobConfig,
    pub report: Report,
    pub error: Option<String>,
}

impl RunStatus {
    pub fn new(id: impl Into<String>, job_config: JobConfig) -> Self {
        Self {
            id: id.into(),
            state: RunState::BeforeRunning,
            start_time: Utc::now(),
            end_time: None,
            job_config,
            report: Report::default(),
            error: None,
        }
    }
}

/// Fresh run identifier
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
