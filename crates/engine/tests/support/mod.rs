//! Scripted in-memory browser for engine integration tests
//!
//! A [`ScriptedSite`] maps URLs to full-page images. Sessions opened from it
//! answer height scripts from the image size and return the viewport-sized
//! slice at the current scroll position as screenshot.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{GenericImageView, Rgba, RgbaImage};
use parking_lot::Mutex;
use serde_json::{json, Value};
use shotline_common::{Cookie, JobConfig, UrlConfig};
use shotline_engine::browser::{JS_DOCUMENT_HEIGHT, JS_VIEWPORT_HEIGHT};
use shotline_engine::{
    BrowserCapabilities, BrowserSession, EngineConfig, EngineError, EngineResult, SessionFactory,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub const BASE_URL: &str = "http://shop.test";
pub const WHITE: [u8; 4] = [255, 255, 255, 255];
pub const BLACK: [u8; 4] = [0, 0, 0, 255];

#[derive(Default)]
pub struct ScriptedSite {
    pages: Mutex<HashMap<String, RgbaImage>>,
    broken: Mutex<HashSet<String>>,
    pub viewport_height: AtomicUsize,
    pub refuse_sessions: AtomicBool,
    pub sessions_opened: AtomicUsize,
}

impl ScriptedSite {
    pub fn new(viewport_height: usize) -> Arc<Self> {
        let site = Self::default();
        site.viewport_height.store(viewport_height, Ordering::SeqCst);
        Arc::new(site)
    }

    pub fn set_page(&self, url: &str, image: RgbaImage) {
        self.pages.lock().insert(url.to_string(), image);
    }

    /// Screenshots of `url` fail
    pub fn break_page(&self, url: &str) {
        self.broken.lock().insert(url.to_string());
    }
}

#[async_trait]
impl SessionFactory for ScriptedSite {
    async fn open(&self) -> EngineResult<Box<dyn BrowserSession>> {
        if self.refuse_sessions.load(Ordering::SeqCst) {
            return Err(EngineError::Browser("no browser available".to_string()));
        }
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedBrowser {
            page: None,
            url: String::new(),
            scroll: 0,
            viewport_height: self.viewport_height.load(Ordering::SeqCst) as u64,
            pages: self.pages.lock().clone(),
            broken: self.broken.lock().clone(),
        }))
    }
}

pub struct ScriptedBrowser {
    page: Option<RgbaImage>,
    url: String,
    scroll: u64,
    viewport_height: u64,
    pages: HashMap<String, RgbaImage>,
    broken: HashSet<String>,
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    fn capabilities(&self) -> BrowserCapabilities {
        BrowserCapabilities::default()
    }

    async fn set_viewport(&mut self, _width: u32, _height: u32) -> EngineResult<()> {
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> EngineResult<()> {
        self.url = url.to_string();
        self.page = self.pages.get(url).cloned();
        self.scroll = 0;
        Ok(())
    }

    async fn set_cookie(&mut self, _cookie: &Cookie) -> EngineResult<()> {
        Ok(())
    }

    async fn execute_script(&mut self, script: &str) -> EngineResult<Value> {
        let page_height = self.page.as_ref().map(|p| p.height()).unwrap_or(0);
        match script {
            JS_DOCUMENT_HEIGHT => Ok(json!(page_height)),
            JS_VIEWPORT_HEIGHT => Ok(json!(self.viewport_height)),
            s if s.starts_with("window.scrollBy(0,") => {
                let pixels: u64 = s
                    .trim_start_matches("window.scrollBy(0,")
                    .trim_end_matches(')')
                    .parse()
                    .unwrap_or(0);
                self.scroll += pixels;
                Ok(Value::Null)
            }
            _ => Ok(Value::Null),
        }
    }

    async fn capture_screenshot(&mut self) -> EngineResult<Vec<u8>> {
        if self.broken.contains(&self.url) {
            return Err(EngineError::Browser(format!("tab crashed on {}", self.url)));
        }
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| EngineError::Browser(format!("nothing loaded at {}", self.url)))?;

        let top = (self.scroll as u32).min(page.height().saturating_sub(1));
        let height = (self.viewport_height as u32).min(page.height() - top);
        let slice = page.view(0, top, page.width(), height).to_image();
        Ok(png(&slice))
    }
}

pub fn png(image: &RgbaImage) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

pub fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

pub fn with_block(mut image: RgbaImage, x0: u32, y0: u32, size: u32, color: [u8; 4]) -> RgbaImage {
    for y in y0..y0 + size {
        for x in x0..x0 + size {
            image.put_pixel(x, y, Rgba(color));
        }
    }
    image
}

/// Engine settings rooted in `dir` without settle pauses
pub fn engine_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        working_dir: dir.to_path_buf(),
        scroll_settle_ms: 0,
        max_sessions: 2,
        ..EngineConfig::default()
    }
}

/// One URL with the given paths at width 800
pub fn job(paths: &[&str], max_diff: f64) -> JobConfig {
    let mut config = JobConfig::default_for(BASE_URL);
    config.window_height = 600;
    config.threads = 2;
    config.urls.insert(
        BASE_URL.to_string(),
        UrlConfig {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            window_widths: vec![800],
            max_diff,
            ..UrlConfig::default()
        },
    );
    config
}

pub fn page_url(path: &str) -> String {
    format!("{}/{}", BASE_URL, path.trim_start_matches('/'))
}
