//! Job runner
//!
//! Drives one run through capture, comparison and reporting while keeping its
//! [`RunTracker`] current. Contexts are captured by parallel workers, each
//! holding one pooled browser session for the whole context.

use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use shotline_common::naming;
use shotline_common::{ComparisonResult, ContextFailure, JobConfig, Phase, RunState, ScreenshotContext};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::browser::SessionFactory;
use crate::capture::{CaptureOrchestrator, CaptureSettings};
use crate::compare::{compare_images, ImageComparison};
use crate::config::EngineConfig;
use crate::context::build_contexts;
use crate::error::{EngineError, EngineResult};
use crate::pool::SessionPool;
use crate::store::ScreenshotStore;
use crate::tracker::RunTracker;

/// How much of a run to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// Capture the before phase and stop in `BEFORE_DONE`
    Before,
    /// Capture the after phase, then compare with the stored before phase
    After,
    /// Only compare already stored screenshots
    Compare,
    /// Before, after and compare in one go
    Full,
}

pub struct JobRunner {
    engine: EngineConfig,
    factory: Arc<dyn SessionFactory>,
    store: ScreenshotStore,
}

impl JobRunner {
    pub fn new(engine: EngineConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let store = ScreenshotStore::from_config(&engine);
        Self {
            engine,
            factory,
            store,
        }
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn store(&self) -> &ScreenshotStore {
        &self.store
    }

    /// Execute `step` for the run behind `tracker`.
    ///
    /// Never fails: anything unrecoverable moves the run to `ERROR`. Returns
    /// the state the run is left in.
    pub async fn run(&self, tracker: &RunTracker, step: Step, cancel: CancellationToken) -> RunState {
        let job = tracker.job_config();
        info!("Run {}: starting {:?}", tracker.id(), step);

        if let Err(e) = self.execute(tracker, &job, step, &cancel).await {
            error!("Run {} failed: {}", tracker.id(), e);
            tracker.fail(e);
        }

        let state = tracker.state();
        info!("Run {}: {}", tracker.id(), state);
        state
    }

    async fn execute(&self, tracker: &RunTracker, job: &JobConfig, step: Step, cancel: &CancellationToken) -> EngineResult<()> {
        job.validate()?;

        if matches!(step, Step::Before | Step::Full) {
            self.capture_phase(tracker, job, Phase::Before, cancel).await?;
            if step == Step::Before {
                tracker.advance(RunState::BeforeDone)?;
                return Ok(());
            }
        }

        if matches!(step, Step::After | Step::Full) {
            // A continued run was already moved here by the service
            if tracker.state() != RunState::AfterRunning {
                tracker.advance(RunState::AfterRunning)?;
            }
            self.capture_phase(tracker, job, Phase::After, cancel).await?;
        }

        tracker.advance(RunState::Comparing)?;
        self.compare_phase(tracker, job, cancel).await?;

        match self.store.write_report(&tracker.build_report()) {
            Ok(path) => info!("Report written to {}", path.display()),
            Err(e) => warn!("Cannot write report: {}", e),
        }
        tracker.finish();
        Ok(())
    }

    /// Capture every context of one phase.
    ///
    /// Context failures are recorded on the tracker and the phase goes on. A
    /// fatal error or an abort stops scheduling further contexts; contexts
    /// already in flight run to completion.
    async fn capture_phase(&self, tracker: &RunTracker, job: &JobConfig, phase: Phase, cancel: &CancellationToken) -> EngineResult<()> {
        let contexts = build_contexts(job, phase)?;

        let removed = match phase {
            Phase::Before => self.store.clear()?,
            Phase::After => self.store.clear_phase(Phase::After)?,
        };
        debug!("Removed {} stale screenshots", removed);

        let workers = job.worker_count().min(self.engine.max_sessions.max(1));
        let pool = SessionPool::new(self.factory.clone(), workers);
        let orchestrator = CaptureOrchestrator::new(CaptureSettings::new(job, &self.engine));
        let stop = cancel.child_token();

        info!("Capturing {} contexts ({}) with {} workers", contexts.len(), phase, workers);

        let mut fatal = None;
        stream::iter(contexts)
            .map(|context| self.capture_context(&pool, &orchestrator, context, &stop))
            .buffer_unordered(workers)
            .for_each(|outcome| {
                match outcome {
                    Ok(Some(failure)) => tracker.push_failure(failure),
                    Ok(None) => {}
                    Err(e) => {
                        stop.cancel();
                        fatal.get_or_insert(e);
                    }
                }
                future::ready(())
            })
            .await;

        pool.shutdown().await;

        if let Some(e) = fatal {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(aborted());
        }
        Ok(())
    }

    /// Capture one context on a pooled session and persist its frames.
    /// Returns the failure when only this context is affected.
    async fn capture_context(
        &self,
        pool: &SessionPool,
        orchestrator: &CaptureOrchestrator,
        context: ScreenshotContext,
        stop: &CancellationToken,
    ) -> EngineResult<Option<ContextFailure>> {
        let mut lease = tokio::select! {
            _ = stop.cancelled() => return Ok(None),
            lease = pool.acquire() => lease?,
        };

        let outcome = orchestrator.capture(lease.slot(), &context).await;
        match outcome {
            Ok(frames) => {
                pool.release(lease);
                for frame in &frames {
                    self.store
                        .write_frame(&frame.context, frame.vertical_offset, &frame.image)
                        .map_err(|e| EngineError::JobFatal(format!("Cannot store screenshot: {}", e)))?;
                }
                Ok(None)
            }
            Err(e) if e.is_context_scoped() => {
                warn!("{}", e);
                lease.discard().await;
                Ok(Some(ContextFailure::new(&context, e)))
            }
            Err(e) => {
                lease.discard().await;
                Err(e)
            }
        }
    }

    async fn compare_phase(&self, tracker: &RunTracker, job: &JobConfig, cancel: &CancellationToken) -> EngineResult<()> {
        let contexts = build_contexts(job, Phase::Before)?;
        info!("Comparing screenshots of {} contexts", contexts.len());

        for context in contexts {
            if cancel.is_cancelled() {
                return Err(aborted());
            }

            let store = self.store.clone();
            let results = tokio::task::spawn_blocking(move || compare_context(&store, &context))
                .await
                .map_err(|e| EngineError::JobFatal(format!("Comparison task failed: {}", e)))??;

            for result in results {
                tracker.push_result(result);
            }
        }
        Ok(())
    }
}

fn aborted() -> EngineError {
    EngineError::JobFatal("Run was aborted".to_string())
}

/// Pair the stored before and after screenshots of one context by offset.
///
/// Every offset present on either side yields exactly one result; a context
/// without any screenshot still yields one at offset 0.
pub fn compare_context(store: &ScreenshotStore, context: &ScreenshotContext) -> EngineResult<Vec<ComparisonResult>> {
    let before = context.with_phase(Phase::Before);
    let after = context.with_phase(Phase::After);
    let before_offsets = store.offsets(&before)?;
    let after_offsets = store.offsets(&after)?;

    let url = context.display_url();
    let width = context.window_width;

    let mut offsets: BTreeSet<u64> = before_offsets.union(&after_offsets).copied().collect();
    if offsets.is_empty() {
        offsets.insert(0);
    }

    let mut results = Vec::with_capacity(offsets.len());
    for offset in offsets {
        let before_name = before_offsets.contains(&offset).then(|| before.file_name(offset));
        let after_name = after_offsets.contains(&offset).then(|| after.file_name(offset));

        let (before_file, after_file) = match (&before_name, &after_name) {
            (Some(b), Some(a)) => (b.as_str(), a.as_str()),
            _ => {
                results.push(ComparisonResult::sentinel(&context.url, &url, width, offset, before_name, after_name));
                continue;
            }
        };

        let comparison = match score_pair(store, before_file, after_file, context.url_config.max_color_diff_per_pixel) {
            Ok(comparison) => comparison,
            Err(e) => {
                warn!("Cannot compare {} with {}: {}", before_file, after_file, e);
                ImageComparison::sentinel()
            }
        };

        let difference_image_file_name = match &comparison.diff_image {
            Some(diff) => {
                let name = naming::difference_file_name(&context.url, &context.path, width, offset);
                store.write_diff(&name, diff)?;
                Some(name)
            }
            None => None,
        };

        results.push(ComparisonResult {
            base_url: context.url.clone(),
            url: url.clone(),
            width,
            vertical_scroll_position: offset,
            difference: comparison.difference,
            screenshot_before_file_name: before_name,
            screenshot_after_file_name: after_name,
            difference_image_file_name,
            max_single_color_difference: comparison.max_single_color_difference,
        });
    }

    Ok(results)
}

fn score_pair(store: &ScreenshotStore, before: &str, after: &str, max_color_diff_per_pixel: u32) -> EngineResult<ImageComparison> {
    if store.file_hash(before)? == store.file_hash(after)? {
        debug!("{} and {} are byte-identical", before, after);
        return Ok(ImageComparison::identical());
    }

    let before = store
        .load(before)
        .map_err(|e| EngineError::Comparison(format!("{}: {}", before, e)))?;
    let after = store
        .load(after)
        .map_err(|e| EngineError::Comparison(format!("{}: {}", after, e)))?;
    Ok(compare_images(Some(&before), Some(&after), max_color_diff_per_pixel))
}
