//! Browser seam
//!
//! The engine drives browsers only through [`BrowserSession`]. Backend quirks
//! are described by [`BrowserCapabilities`] instead of being keyed on the
//! backend's identity.

use async_trait::async_trait;
use shotline_common::{BrowserType, Cookie};

use crate::error::EngineResult;

pub const JS_DOCUMENT_HEIGHT: &str = "return Math.max( document.body.scrollHeight, document.body.offsetHeight, document.documentElement.clientHeight, document.documentElement.scrollHeight, document.documentElement.offsetHeight );";
pub const JS_VIEWPORT_HEIGHT: &str = "return document.documentElement.clientHeight";
pub const JS_FONTS_LOADED: &str = "return document.fonts.status === 'loaded'";
pub const JS_HIDE_IMAGES: &str = "for (const img of document.images) { img.src = 'data:image/gif;base64,R0lGODlhAQABAIAAAP///wAAACH5BAEAAAAALAAAAAABAAEAAAICRAEAOw=='; }";

pub fn js_scroll_by(pixels: u64) -> String {
    format!("window.scrollBy(0,{})", pixels)
}

/// What a backend can and cannot do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserCapabilities {
    /// Screenshots show the viewport only, so tall pages need scroll paging.
    /// When false a single screenshot already covers the whole page.
    pub supports_viewport_paging: bool,
    /// Cookies must be written through `document.cookie`
    pub cookies_via_script: bool,
}

impl Default for BrowserCapabilities {
    fn default() -> Self {
        Self {
            supports_viewport_paging: true,
            cookies_via_script: false,
        }
    }
}

impl BrowserCapabilities {
    pub fn for_browser(browser: BrowserType) -> Self {
        match browser {
            BrowserType::PhantomJs => Self {
                supports_viewport_paging: false,
                cookies_via_script: true,
            },
            _ => Self::default(),
        }
    }
}

/// One exclusively owned remote browser
#[async_trait]
pub trait BrowserSession: Send {
    fn capabilities(&self) -> BrowserCapabilities;

    async fn set_viewport(&mut self, width: u32, height: u32) -> EngineResult<()>;

    async fn navigate(&mut self, url: &str) -> EngineResult<()>;

    async fn set_cookie(&mut self, cookie: &Cookie) -> EngineResult<()>;

    async fn execute_script(&mut self, script: &str) -> EngineResult<serde_json::Value>;

    /// Encoded image (PNG) of the current viewport, or of the whole page when
    /// viewport paging is unsupported
    async fn capture_screenshot(&mut self) -> EngineResult<Vec<u8>>;

    async fn set_local_storage(&mut self, key: &str, value: &str) -> EngineResult<()> {
        self.execute_script(&storage_script("localStorage", key, value)).await?;
        Ok(())
    }

    async fn set_session_storage(&mut self, key: &str, value: &str) -> EngineResult<()> {
        self.execute_script(&storage_script("sessionStorage", key, value)).await?;
        Ok(())
    }

    /// End the remote session
    async fn close(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

/// Opens browser sessions for the session pool
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> EngineResult<Box<dyn BrowserSession>>;
}

/// `localStorage.setItem('key','value')`; single quotes in the value become double quotes
pub fn storage_script(storage: &str, key: &str, value: &str) -> String {
    format!(
        "{}.setItem('{}','{}')",
        storage,
        key.replace('\'', "\\'"),
        value.replace('\'', "\"")
    )
}

/// `document.cookie` assignment for backends that cannot set cookies natively
pub fn cookie_script(cookie: &Cookie) -> String {
    let mut script = format!("document.cookie = '{}={};", cookie.name, cookie.value);
    if let Some(path) = &cookie.path {
        script.push_str(&format!("path={};", path));
    }
    if let Some(domain) = &cookie.domain {
        script.push_str(&format!("domain={};", domain));
    }
    if cookie.secure {
        script.push_str("secure;");
    }
    if let Some(expiry) = &cookie.expiry {
        script.push_str(&format!("expires={};", expiry.format("%d %b %Y %H:%M:%S GMT")));
    }
    script.push('\'');
    script
}

/// Interpret a script result as a non-negative number of pixels
pub fn as_pixels(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u64))
}
