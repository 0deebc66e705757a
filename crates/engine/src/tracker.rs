//! Run status tracker
//!
//! The only state shared between workers of a job. Every mutation takes the
//! write lock once, so pollers always see a consistent combination of state,
//! timestamps and results.

use chrono::Utc;
use parking_lot::RwLock;
use shotline_common::{
    ComparisonResult, ContextFailure, Error, JobConfig, Report, RunState, RunStatus,
};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RunTracker {
    status: Arc<RwLock<RunStatus>>,
}

impl RunTracker {
    /// New run in `BEFORE_RUNNING`
    pub fn new(id: impl Into<String>, job_config: JobConfig) -> Self {
        Self::resume(RunStatus::new(id, job_config))
    }

    /// Continue tracking an existing run, e.g. an `after` run picking up
    /// where a staged `before` run stopped
    pub fn resume(status: RunStatus) -> Self {
        Self {
            status: Arc::new(RwLock::new(status)),
        }
    }

    pub fn id(&self) -> String {
        self.status.read().id.clone()
    }

    pub fn state(&self) -> RunState {
        self.status.read().state
    }

    pub fn job_config(&self) -> JobConfig {
        self.status.read().job_config.clone()
    }

    /// Read-only copy for observers
    pub fn snapshot(&self) -> RunStatus {
        self.status.read().clone()
    }

    pub fn results(&self) -> Vec<ComparisonResult> {
        self.status.read().report.results.clone()
    }

    /// Move forward to a non-terminal state. Skipping states is allowed,
    /// going back or leaving a terminal state is not.
    pub fn advance(&self, next: RunState) -> Result<(), Error> {
        let mut status = self.status.write();
        if next.is_terminal() || !status.state.can_advance_to(next) {
            return Err(Error::InvalidStateTransition {
                from: status.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Run {}: {} -> {}", status.id, status.state, next);
        status.state = next;
        Ok(())
    }

    /// Record a failed context. Ignored once the run has ended.
    pub fn push_failure(&self, failure: ContextFailure) {
        let mut status = self.status.write();
        if status.state.is_terminal() {
            debug!("Run {} already ended, dropping failure of {}", status.id, failure.url);
            return;
        }
        status.report.failures.push(failure);
    }

    /// Record a comparison result. Ignored once the run has ended.
    pub fn push_result(&self, result: ComparisonResult) {
        let mut status = self.status.write();
        if status.state.is_terminal() {
            debug!("Run {} already ended, dropping result for {}", status.id, result.url);
            return;
        }
        status.report.results.push(result);
    }

    /// Report over everything collected so far, judged against the job's
    /// thresholds
    pub fn build_report(&self) -> Report {
        let status = self.status.read();
        Report::build(
            &status.job_config,
            status.report.results.clone(),
            status.report.failures.clone(),
        )
    }

    /// Judge the collected results and enter the matching `FINISHED_*` state.
    ///
    /// Returns the state the run ends up in, which stays unchanged when the
    /// run was already terminal (e.g. aborted meanwhile).
    pub fn finish(&self) -> RunState {
        let mut status = self.status.write();
        if status.state.is_terminal() {
            return status.state;
        }

        let report = std::mem::take(&mut status.report);
        let report = Report::build(&status.job_config, report.results, report.failures);
        let state = if report.has_differences() {
            RunState::FinishedWithDifferences
        } else {
            RunState::FinishedWithoutDifferences
        };

        status.report = report;
        status.state = state;
        status.end_time = Some(Utc::now());
        debug!("Run {} finished: {}", status.id, state);
        state
    }

    /// Enter `ERROR`, keeping all results collected so far.
    ///
    /// Returns false when the run had already ended.
    pub fn fail(&self, error: impl std::fmt::Display) -> bool {
        let mut status = self.status.write();
        if status.state.is_terminal() {
            return false;
        }

        warn!("Run {} failed in {}: {}", status.id, status.state, error);
        let report = std::mem::take(&mut status.report);
        status.report = Report::build(&status.job_config, report.results, report.failures);
        status.state = RunState::Error;
        status.error = Some(error.to_string());
        status.end_time = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shotline_common::Phase;

    fn tracker() -> RunTracker {
        RunTracker::new("run-1", JobConfig::default_for("https://www.example.com"))
    }

    fn result(difference: f64) -> ComparisonResult {
        ComparisonResult {
            base_url: "https://www.example.com".to_string(),
            url: "https://www.example.com/".to_string(),
            width: 800,
            vertical_scroll_position: 0,
            difference,
            screenshot_before_file_name: Some("b.png".to_string()),
            screenshot_after_file_name: Some("a.png".to_string()),
            difference_image_file_name: None,
            max_single_color_difference: 0,
        }
    }

    #[test]
    fn test_starts_in_before_running() {
        let status = tracker().snapshot();
        assert_eq!(status.state, RunState::BeforeRunning);
        assert!(status.end_time.is_none());
    }

    #[test]
    fn test_full_lifecycle_without_differences() {
        let tracker = tracker();
        tracker.advance(RunState::AfterRunning).unwrap();
        tracker.advance(RunState::Comparing).unwrap();
        tracker.push_result(result(0.0));

        assert_eq!(tracker.finish(), RunState::FinishedWithoutDifferences);
        let status = tracker.snapshot();
        assert!(status.end_time.is_some());
        assert!(status.report.summary["https://www.example.com"].passed);
    }

    #[test]
    fn test_difference_over_max_diff_finishes_with_differences() {
        let tracker = tracker();
        tracker.advance(RunState::Comparing).unwrap();
        tracker.push_result(result(0.3));
        assert_eq!(tracker.finish(), RunState::FinishedWithDifferences);
    }

    #[test]
    fn test_backward_transition_is_rejected() {
        let tracker = tracker();
        tracker.advance(RunState::Comparing).unwrap();
        assert!(tracker.advance(RunState::AfterRunning).is_err());
        assert!(tracker.advance(RunState::Comparing).is_err());
        assert_eq!(tracker.state(), RunState::Comparing);
    }

    #[test]
    fn test_terminal_states_only_through_finish_or_fail() {
        let tracker = tracker();
        assert!(tracker.advance(RunState::Error).is_err());
        assert!(tracker.advance(RunState::FinishedWithoutDifferences).is_err());
    }

    #[test]
    fn test_end_time_is_set_once() {
        let tracker = tracker();
        assert!(tracker.fail("no browser"));
        let first = tracker.snapshot().end_time;

        assert!(!tracker.fail("again"));
        assert_eq!(tracker.finish(), RunState::Error);
        assert!(tracker.advance(RunState::Comparing).is_err());

        let status = tracker.snapshot();
        assert_eq!(status.end_time, first);
        assert_eq!(status.error.as_deref(), Some("no browser"));
    }

    #[test]
    fn test_failure_keeps_partial_results() {
        let tracker = tracker();
        tracker.push_result(result(0.0));
        let config = tracker.job_config();
        let url_config = &config.urls["https://www.example.com"];
        let context = shotline_common::ScreenshotContext::new("https://www.example.com", "/", 800, Phase::After, url_config);
        tracker.push_failure(ContextFailure::new(&context, "timeout"));

        tracker.fail("aborted");

        let status = tracker.snapshot();
        assert_eq!(status.state, RunState::Error);
        assert_eq!(status.report.results.len(), 1);
        assert_eq!(status.report.failures.len(), 1);
    }

    #[test]
    fn test_writes_after_end_are_ignored() {
        let tracker = tracker();
        tracker.push_result(result(0.0));
        tracker.fail("Run was aborted");

        tracker.push_result(result(0.4));
        let config = tracker.job_config();
        let url_config = &config.urls["https://www.example.com"];
        let context = shotline_common::ScreenshotContext::new("https://www.example.com", "/", 800, Phase::After, url_config);
        tracker.push_failure(ContextFailure::new(&context, "late"));

        let status = tracker.snapshot();
        assert_eq!(status.report.results.len(), 1);
        assert_eq!(status.report.results[0].difference, 0.0);
        assert!(status.report.failures.is_empty());
        assert_eq!(tracker.results().len(), 1);
    }

    #[test]
    fn test_concurrent_observers_see_monotonic_states() {
        let tracker = tracker();
        let observer = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..10_000 {
                    let status = tracker.snapshot();
                    assert!(status.state.rank() >= last);
                    assert_eq!(status.state.is_terminal(), status.end_time.is_some());
                    last = status.state.rank();
                }
            })
        };

        tracker.advance(RunState::AfterRunning).unwrap();
        tracker.advance(RunState::Comparing).unwrap();
        tracker.finish();
        observer.join().unwrap();
    }
}
