//! Capture orchestrator
//!
//! Turns one [`ScreenshotContext`] into a sequence of frames that together
//! cover the scrollable height of the page. All steps of a context run in
//! order on one browser session; page height is re-read after every scroll
//! because pages grow and shrink while lazy content loads.

use image::RgbaImage;
use shotline_common::{JobConfig, ScreenshotContext};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::browser::{
    as_pixels, js_scroll_by, BrowserSession, JS_DOCUMENT_HEIGHT, JS_FONTS_LOADED, JS_HIDE_IMAGES,
    JS_VIEWPORT_HEIGHT,
};
use crate::compare::quick_equal;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::http_check::HttpChecker;
use crate::pool::BrowserSlot;

const FONT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One screenshot at one scroll offset
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub context: ScreenshotContext,
    pub vertical_offset: u64,
    pub image: RgbaImage,
    /// Position within the context's frame sequence
    pub sequence_index: usize,
}

/// Job-wide capture settings
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub window_height: u32,
    /// Extra wait after every page load, shared by all contexts
    pub async_wait: Duration,
    pub scroll_settle: Duration,
    pub stable_frames: u32,
}

impl CaptureSettings {
    pub fn new(job: &JobConfig, engine: &EngineConfig) -> Self {
        Self {
            window_height: job.window_height,
            async_wait: Duration::try_from_secs_f64(job.async_wait).unwrap_or_default(),
            scroll_settle: engine.scroll_settle(),
            stable_frames: engine.stable_frames,
        }
    }
}

pub struct CaptureOrchestrator {
    settings: CaptureSettings,
    http: HttpChecker,
}

impl CaptureOrchestrator {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            http: HttpChecker::default(),
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Capture all frames of one context.
    ///
    /// Every failure is reported as a capture error of this context; nothing
    /// is retried.
    pub async fn capture(&self, slot: &mut BrowserSlot, context: &ScreenshotContext) -> EngineResult<Vec<CapturedFrame>> {
        self.capture_frames(slot, context).await.map_err(|e| match e {
            EngineError::Capture { .. } => e,
            e if e.is_context_scoped() => EngineError::capture(context.label(), e),
            e => e,
        })
    }

    async fn capture_frames(&self, slot: &mut BrowserSlot, context: &ScreenshotContext) -> EngineResult<Vec<CapturedFrame>> {
        let BrowserSlot { session, warmed_up } = slot;
        let session = session.as_mut();
        let config = &context.url_config;
        let target_url = context.target_url();

        self.http.check(&target_url, &config.http_check).await?;

        session
            .set_viewport(context.window_width, self.settings.window_height)
            .await?;

        // Cookie writes are rejected before any page of the site is loaded
        let root_url = context.root_url();
        debug!("Getting root url {}", root_url);
        session.navigate(&root_url).await?;

        for cookie in &config.cookies {
            session.set_cookie(cookie).await?;
        }
        for (key, value) in &config.local_storage {
            session.set_local_storage(key, value).await?;
        }
        for (key, value) in &config.session_storage {
            session.set_session_storage(key, value).await?;
        }

        if config.warmup_browser_cache_time > 0 && !warmed_up.contains(&target_url) {
            debug!("Warming up browser cache for {}", target_url);
            session.navigate(&target_url).await?;
            sleep(Duration::from_secs(config.warmup_browser_cache_time)).await;
            warmed_up.insert(target_url.clone());
        }

        info!("Browsing to {} with window width {}", target_url, context.window_width);
        session.navigate(&target_url).await?;

        if let Some(script) = config.java_script.as_deref().filter(|s| !s.is_empty()) {
            debug!("Executing configured JavaScript");
            session.execute_script(script).await?;
        }
        if config.hide_images {
            session.execute_script(JS_HIDE_IMAGES).await?;
        }

        if config.wait_after_page_load > 0 {
            sleep(Duration::from_secs(config.wait_after_page_load)).await;
        }
        if !self.settings.async_wait.is_zero() {
            sleep(self.settings.async_wait).await;
        }
        if config.wait_for_fonts_time > 0 {
            wait_for_fonts(session, context, Duration::from_secs(config.wait_for_fonts_time)).await?;
        }

        let mut page_height = read_height(session, context, JS_DOCUMENT_HEIGHT, "Page height").await?;
        let viewport_height = read_height(session, context, JS_VIEWPORT_HEIGHT, "Viewport height").await?;
        if viewport_height == 0 {
            return Err(EngineError::capture(context.label(), "Viewport height is 0"));
        }
        debug!("Page height {}, viewport height {}", page_height, viewport_height);

        let paging = session.capabilities().supports_viewport_paging;
        let no_animation_wait =
            Duration::try_from_secs_f64(config.wait_for_no_animation_after_scroll).unwrap_or_default();
        let after_scroll = self.settings.scroll_settle + Duration::from_secs(config.wait_after_scroll);

        let mut frames = Vec::new();
        let mut offset = 0u64;
        while offset < page_height && offset <= config.max_scroll_height {
            let screenshot = take_screenshot(session).await?;
            let screenshot = self.wait_for_no_animation(session, screenshot, no_animation_wait).await?;

            frames.push(CapturedFrame {
                context: context.clone(),
                vertical_offset: offset,
                image: screenshot,
                sequence_index: frames.len(),
            });

            if !paging {
                break;
            }

            debug!("Top of viewport {}, page height {}", offset, page_height);
            session.execute_script(&js_scroll_by(viewport_height)).await?;
            sleep(after_scroll).await;

            page_height = read_height(session, context, JS_DOCUMENT_HEIGHT, "Page height").await?;
            offset += viewport_height;
        }

        debug!("Captured {} frames for {}", frames.len(), context.label());
        Ok(frames)
    }

    /// Re-capture until the same image was seen `stable_frames` times in a
    /// row or `max_wait` has passed; returns the last capture
    async fn wait_for_no_animation(
        &self,
        session: &mut dyn BrowserSession,
        mut current: RgbaImage,
        max_wait: Duration,
    ) -> EngineResult<RgbaImage> {
        if max_wait.is_zero() {
            return Ok(current);
        }

        let deadline = Instant::now() + max_wait;
        let mut same = 0;
        while same < self.settings.stable_frames && Instant::now() < deadline {
            let next = take_screenshot(session).await?;
            if quick_equal(&next, &current) {
                same += 1;
            } else {
                same = 0;
            }
            current = next;
        }
        if same < self.settings.stable_frames {
            debug!("Page still animating after {:?}", max_wait);
        }

        Ok(current)
    }
}

async fn take_screenshot(session: &mut dyn BrowserSession) -> EngineResult<RgbaImage> {
    let bytes = session.capture_screenshot().await?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

async fn read_height(
    session: &mut dyn BrowserSession,
    context: &ScreenshotContext,
    script: &str,
    what: &str,
) -> EngineResult<u64> {
    let value = session.execute_script(script).await?;
    as_pixels(&value).ok_or_else(|| EngineError::capture(context.label(), format!("{} is not a number: {}", what, value)))
}

async fn wait_for_fonts(session: &mut dyn BrowserSession, context: &ScreenshotContext, timeout: Duration) -> EngineResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if session.execute_script(JS_FONTS_LOADED).await?.as_bool() == Some(true) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(EngineError::capture(
                context.label(),
                format!("Fonts not loaded after {:?}", timeout),
            ));
        }
        sleep(FONT_POLL_INTERVAL).await;
    }
}
