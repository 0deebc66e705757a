//! Job service: asynchronous runs observable by id
//!
//! `run_job` returns as soon as the configuration is validated; the run
//! itself executes on the tokio runtime and is observed through snapshots.
//! Every run writes its screenshots and report below `<working-dir>/<run-id>/`.

use parking_lot::RwLock;
use shotline_common::{new_run_id, ComparisonResult, Error, JobConfig, RunState, RunStatus};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::browser::SessionFactory;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::runner::{JobRunner, Step};
use crate::tracker::RunTracker;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct RunHandle {
    tracker: RunTracker,
    runner: Arc<JobRunner>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    runs: HashMap<String, RunHandle>,
    /// Run ids in creation order
    order: VecDeque<String>,
}

#[derive(Clone)]
pub struct JobService {
    engine: EngineConfig,
    factory: Arc<dyn SessionFactory>,
    registry: Arc<RwLock<Registry>>,
    max_retained_runs: usize,
}

impl JobService {
    pub fn new(engine: EngineConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let max_retained_runs = engine.max_retained_runs;
        Self {
            engine,
            factory,
            registry: Arc::new(RwLock::new(Registry::default())),
            max_retained_runs,
        }
    }

    /// Engine settings of one run, rooted in its own directory
    pub fn run_config(&self, id: &str) -> EngineConfig {
        self.engine.with_working_dir(self.run_dir(id))
    }

    pub fn run_dir(&self, id: &str) -> PathBuf {
        self.engine.working_dir.join(id)
    }

    /// Validate and start a complete run, returning its id immediately
    pub fn run_job(&self, config: JobConfig) -> EngineResult<String> {
        self.start_job(config, Step::Full)
    }

    /// Start a new run executing `step`
    pub fn start_job(&self, config: JobConfig, step: Step) -> EngineResult<String> {
        config.validate()?;

        let id = new_run_id();
        let tracker = RunTracker::new(id.clone(), config);
        let runner = Arc::new(JobRunner::new(self.run_config(&id), self.factory.clone()));
        let cancel = CancellationToken::new();

        {
            let mut registry = self.registry.write();
            registry.runs.insert(
                id.clone(),
                RunHandle {
                    tracker: tracker.clone(),
                    runner: runner.clone(),
                    cancel: cancel.clone(),
                },
            );
            registry.order.push_back(id.clone());
            evict_finished(&mut registry, self.max_retained_runs);
        }

        info!("Run {} created in {}", id, self.run_dir(&id).display());
        spawn(runner, tracker, step, cancel);
        Ok(id)
    }

    /// Run the after phase and the comparison of a run stopped in `BEFORE_DONE`
    pub fn continue_job(&self, id: &str) -> EngineResult<()> {
        let (tracker, runner, cancel) = {
            let registry = self.registry.read();
            let handle = registry.runs.get(id).ok_or_else(|| Error::NotFound {
                kind: "run".to_string(),
                id: id.to_string(),
            })?;
            (handle.tracker.clone(), handle.runner.clone(), handle.cancel.clone())
        };

        let state = tracker.state();
        if state != RunState::BeforeDone {
            return Err(Error::InvalidStateTransition {
                from: state.to_string(),
                to: RunState::AfterRunning.to_string(),
            }
            .into());
        }
        tracker.advance(RunState::AfterRunning)?;

        spawn(runner, tracker, Step::After, cancel);
        Ok(())
    }

    pub fn get_status(&self, id: &str) -> Option<RunStatus> {
        self.registry.read().runs.get(id).map(|h| h.tracker.snapshot())
    }

    pub fn get_results(&self, id: &str) -> Option<Vec<ComparisonResult>> {
        self.registry.read().runs.get(id).map(|h| h.tracker.results())
    }

    /// All known runs, newest first
    pub fn list(&self) -> Vec<RunStatus> {
        let registry = self.registry.read();
        registry
            .order
            .iter()
            .rev()
            .filter_map(|id| registry.runs.get(id))
            .map(|h| h.tracker.snapshot())
            .collect()
    }

    /// Stop scheduling further contexts of a run and mark it `ERROR`.
    ///
    /// Returns false for unknown ids and runs that already ended.
    pub fn abort(&self, id: &str) -> bool {
        let registry = self.registry.read();
        match registry.runs.get(id) {
            Some(handle) => {
                handle.cancel.cancel();
                handle.tracker.fail("Run was aborted")
            }
            None => false,
        }
    }

    /// Wait until a run ended or stopped in `BEFORE_DONE`
    pub async fn wait(&self, id: &str) -> Option<RunStatus> {
        loop {
            let status = self.get_status(id)?;
            if status.state.is_terminal() || status.state == RunState::BeforeDone {
                return Some(status);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

fn spawn(runner: Arc<JobRunner>, tracker: RunTracker, step: Step, cancel: CancellationToken) {
    tokio::spawn(async move {
        runner.run(&tracker, step, cancel).await;
    });
}

/// Drop the oldest ended runs until at most `max` runs are kept. Runs that
/// are still active are never dropped.
fn evict_finished(registry: &mut Registry, max: usize) {
    while registry.runs.len() > max {
        let oldest_finished = registry.order.iter().position(|id| {
            registry
                .runs
                .get(id)
                .map(|h| h.tracker.state().is_terminal())
                .unwrap_or(true)
        });

        match oldest_finished {
            Some(index) => {
                if let Some(id) = registry.order.remove(index) {
                    registry.runs.remove(&id);
                    debug!("Evicted run {}", id);
                }
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserSession;
    use crate::error::EngineError;
    use async_trait::async_trait;

    struct NoBrowser;

    #[async_trait]
    impl SessionFactory for NoBrowser {
        async fn open(&self) -> EngineResult<Box<dyn BrowserSession>> {
            Err(EngineError::Browser("no browser".to_string()))
        }
    }

    fn registry_with(states: &[RunState]) -> Registry {
        let mut registry = Registry::default();
        for (i, state) in states.iter().enumerate() {
            let id = format!("run-{}", i);
            let tracker = RunTracker::new(id.clone(), JobConfig::default_for("https://www.example.com"));
            match state {
                RunState::Error => {
                    tracker.fail("failed");
                }
                RunState::FinishedWithoutDifferences => {
                    tracker.finish();
                }
                _ => {}
            }
            registry.runs.insert(
                id.clone(),
                RunHandle {
                    tracker,
                    runner: Arc::new(JobRunner::new(EngineConfig::default(), Arc::new(NoBrowser))),
                    cancel: CancellationToken::new(),
                },
            );
            registry.order.push_back(id);
        }
        registry
    }

    #[test]
    fn test_eviction_drops_oldest_finished_runs() {
        let mut registry = registry_with(&[
            RunState::BeforeRunning,
            RunState::Error,
            RunState::FinishedWithoutDifferences,
            RunState::BeforeRunning,
        ]);

        evict_finished(&mut registry, 3);

        assert_eq!(registry.runs.len(), 3);
        assert!(registry.runs.contains_key("run-0"));
        assert!(!registry.runs.contains_key("run-1"));
        assert_eq!(registry.order.len(), 3);
    }

    #[test]
    fn test_eviction_keeps_active_runs() {
        let mut registry = registry_with(&[RunState::BeforeRunning, RunState::BeforeRunning]);
        evict_finished(&mut registry, 1);
        assert_eq!(registry.runs.len(), 2);
    }

    #[test]
    fn test_each_run_gets_its_own_directory() {
        let engine = EngineConfig::default().with_working_dir("/tmp/shots");
        let service = JobService::new(engine, Arc::new(NoBrowser));

        let config = service.run_config("run-1");
        assert_eq!(config.working_dir, PathBuf::from("/tmp/shots/run-1"));
        assert_eq!(config.screenshot_path(), PathBuf::from("/tmp/shots/run-1/report/screenshots"));
        assert_ne!(service.run_config("run-2").report_path(), config.report_path());
    }
}
