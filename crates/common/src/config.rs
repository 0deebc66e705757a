//! Job configuration
//!
//! A job configuration maps every URL under test to the paths, window widths,
//! waits, browser state and thresholds used when it is captured and compared.
//! It is read once and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

pub const DEFAULT_PATH: &str = "/";
pub const DEFAULT_WINDOW_WIDTH: u32 = 800;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 800;
pub const DEFAULT_MAX_DIFF: f64 = 0.0;
pub const DEFAULT_MAX_COLOR_DIFF_PER_PIXEL: u32 = 1;
pub const DEFAULT_MAX_SCROLL_HEIGHT: u64 = 100_000;
pub const DEFAULT_PAGE_LOAD_TIMEOUT: u64 = 120;
pub const DEFAULT_ALLOWED_HTTP_CODES: &[u16] = &[200, 202, 204, 205, 206, 301, 302, 303, 304, 307, 308];

/// Browser backend requested by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserType {
    #[default]
    Firefox,
    FirefoxHeadless,
    Chrome,
    ChromeHeadless,
    /// Legacy backend that only renders whole-page screenshots and needs
    /// cookies written through `document.cookie`
    #[serde(rename = "phantomjs", alias = "phantom-js")]
    PhantomJs,
}

impl BrowserType {
    pub fn is_headless(&self) -> bool {
        matches!(self, BrowserType::FirefoxHeadless | BrowserType::ChromeHeadless | BrowserType::PhantomJs)
    }
}

impl std::fmt::Display for BrowserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserType::Firefox => write!(f, "firefox"),
            BrowserType::FirefoxHeadless => write!(f, "firefox-headless"),
            BrowserType::Chrome => write!(f, "chrome"),
            BrowserType::ChromeHeadless => write!(f, "chrome-headless"),
            BrowserType::PhantomJs => write!(f, "phantomjs"),
        }
    }
}

/// A cookie set before the target page is loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expiry: None,
            secure: false,
        }
    }
}

/// Plain HTTP status check issued before the browser visits a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_allowed_codes")]
    pub allowed_codes: Vec<u16>,
}

fn default_allowed_codes() -> Vec<u16> {
    DEFAULT_ALLOWED_HTTP_CODES.to_vec()
}

impl Default for HttpCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_codes: default_allowed_codes(),
        }
    }
}

/// Per-URL capture and comparison settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UrlConfig {
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,

    #[serde(default = "default_window_widths", alias = "widths", alias = "resolutions")]
    pub window_widths: Vec<u32>,

    /// Highest tolerated fraction of differing pixels (0.0 - 1.0)
    #[serde(default)]
    pub max_diff: f64,

    /// Channel distance up to which two pixels still count as equal
    #[serde(default = "default_max_color_diff_per_pixel")]
    pub max_color_diff_per_pixel: u32,

    #[serde(default)]
    pub cookies: Vec<Cookie>,

    /// Host label replacements, e.g. `live` -> `www`
    #[serde(default)]
    pub env_mapping: BTreeMap<String, String>,

    #[serde(default)]
    pub local_storage: BTreeMap<String, String>,

    #[serde(default)]
    pub session_storage: BTreeMap<String, String>,

    #[serde(default = "default_max_scroll_height")]
    pub max_scroll_height: u64,

    /// Seconds
    #[serde(default)]
    pub wait_after_page_load: u64,

    /// Seconds
    #[serde(default)]
    pub wait_after_scroll: u64,

    /// Seconds, fractional
    #[serde(default)]
    pub wait_for_no_animation_after_scroll: f64,

    /// Seconds
    #[serde(default)]
    pub warmup_browser_cache_time: u64,

    /// Seconds
    #[serde(default)]
    pub wait_for_fonts_time: u64,

    #[serde(default, rename = "javascript", skip_serializing_if = "Option::is_none")]
    pub java_script: Option<String>,

    #[serde(default)]
    pub hide_images: bool,

    #[serde(default)]
    pub http_check: HttpCheckConfig,
}

fn default_paths() -> Vec<String> {
    vec![DEFAULT_PATH.to_string()]
}

fn default_window_widths() -> Vec<u32> {
    vec![DEFAULT_WINDOW_WIDTH]
}

fn default_max_color_diff_per_pixel() -> u32 {
    DEFAULT_MAX_COLOR_DIFF_PER_PIXEL
}

fn default_max_scroll_height() -> u64 {
    DEFAULT_MAX_SCROLL_HEIGHT
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            paths: default_paths(),
            window_widths: default_window_widths(),
            max_diff: DEFAULT_MAX_DIFF,
            max_color_diff_per_pixel: DEFAULT_MAX_COLOR_DIFF_PER_PIXEL,
            cookies: Vec::new(),
            env_mapping: BTreeMap::new(),
            local_storage: BTreeMap::new(),
            session_storage: BTreeMap::new(),
            max_scroll_height: DEFAULT_MAX_SCROLL_HEIGHT,
            wait_after_page_load: 0,
            wait_after_scroll: 0,
            wait_for_no_animation_after_scroll: 0.0,
            warmup_browser_cache_time: 0,
            wait_for_fonts_time: 0,
            java_script: None,
            hide_images: false,
            http_check: HttpCheckConfig::default(),
        }
    }
}

/// A complete visual regression job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobConfig {
    /// URLs keyed by base URL; iteration order is the capture order
    pub urls: BTreeMap<String, UrlConfig>,

    #[serde(default)]
    pub browser: BrowserType,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Seconds waited after every page load, shared by all contexts
    #[serde(default)]
    pub async_wait: f64,

    /// Number of parallel capture workers; 0 means 1
    #[serde(default)]
    pub threads: usize,

    /// Seconds
    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout: u64,

    /// Switches logging to debug level
    #[serde(default)]
    pub debug: bool,
}

fn default_window_height() -> u32 {
    DEFAULT_WINDOW_HEIGHT
}

fn default_page_load_timeout() -> u64 {
    DEFAULT_PAGE_LOAD_TIMEOUT
}

impl JobConfig {
    /// Minimal job for a single URL with default settings
    pub fn default_for(url: &str) -> Self {
        let mut urls = BTreeMap::new();
        urls.insert(url.to_string(), UrlConfig::default());
        Self {
            urls,
            browser: BrowserType::default(),
            window_height: DEFAULT_WINDOW_HEIGHT,
            async_wait: 0.0,
            threads: 1,
            page_load_timeout: DEFAULT_PAGE_LOAD_TIMEOUT,
            debug: false,
        }
    }

    /// Documented example printed by `print-config`
    pub fn example() -> Self {
        let mut url_config = UrlConfig {
            paths: vec!["/".to_string(), "someOtherPath".to_string()],
            window_widths: vec![600, 800, 1000],
            max_diff: 0.05,
            cookies: vec![Cookie::new("exampleCookieName", "exampleValue")],
            wait_after_page_load: 0,
            wait_for_no_animation_after_scroll: 0.5,
            ..UrlConfig::default()
        };
        url_config
            .env_mapping
            .insert("live".to_string(), "www".to_string());
        url_config
            .local_storage
            .insert("exampleLocalStorageKey".to_string(), "value".to_string());

        let mut config = Self::default_for("https://www.example.com");
        config.urls.insert("https://www.example.com".to_string(), url_config);
        config
    }

    /// Parse a job configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("Cannot parse job config: {}", e)))
    }

    /// Read a job configuration file
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Cannot read job config {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn pretty_print(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        self.threads.max(1)
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(Error::config("No URLs configured"));
        }
        if self.window_height == 0 {
            return Err(Error::config("window-height must be greater than 0"));
        }
        if !self.async_wait.is_finite() || self.async_wait < 0.0 {
            return Err(Error::config("async-wait must be a non-negative number"));
        }

        for (url, url_config) in &self.urls {
            if url.trim().is_empty() {
                return Err(Error::config("Empty URL configured"));
            }
            if url_config.paths.is_empty() {
                return Err(Error::config(format!("No paths configured for {}", url)));
            }
            if url_config.window_widths.is_empty() {
                return Err(Error::config(format!("No window widths configured for {}", url)));
            }
            if url_config.window_widths.contains(&0) {
                return Err(Error::config(format!("Window width 0 configured for {}", url)));
            }
            if !(0.0..=1.0).contains(&url_config.max_diff) {
                return Err(Error::config(format!(
                    "max-diff for {} must be between 0 and 1, got {}",
                    url, url_config.max_diff
                )));
            }
            let no_animation = url_config.wait_for_no_animation_after_scroll;
            if !no_animation.is_finite() || no_animation < 0.0 {
                return Err(Error::config(format!(
                    "wait-for-no-animation-after-scroll for {} must be a non-negative number",
                    url
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_lineup_style_config() {
        let json = r#"{
            "urls": {
                "https://www.example.com": {
                    "paths": ["/", "multimedia"],
                    "max-diff": 0.05,
                    "cookies": [{"name": "trackingDisabled", "value": "true"}],
                    "env-mapping": {"live": "www"},
                    "local-storage": {"widget": "{'hidden': true}"},
                    "widths": [600, 800, 1200],
                    "wait-for-no-animation-after-scroll": 0.5
                }
            },
            "browser": "chrome-headless",
            "window-height": 1000,
            "async-wait": 1.5
        }"#;

        let config = JobConfig::from_json(json).unwrap();
        let url_config = &config.urls["https://www.example.com"];

        assert_eq!(config.browser, BrowserType::ChromeHeadless);
        assert_eq!(config.window_height, 1000);
        assert_eq!(url_config.window_widths, vec![600, 800, 1200]);
        assert_eq!(url_config.paths, vec!["/", "multimedia"]);
        assert_eq!(url_config.max_color_diff_per_pixel, DEFAULT_MAX_COLOR_DIFF_PER_PIXEL);
        assert_eq!(url_config.max_scroll_height, DEFAULT_MAX_SCROLL_HEIGHT);
        assert_eq!(url_config.cookies[0], Cookie::new("trackingDisabled", "true"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_for_single_url() {
        let config = JobConfig::default_for("https://example.org");
        let url_config = &config.urls["https://example.org"];
        assert_eq!(url_config.paths, vec!["/"]);
        assert_eq!(url_config.window_widths, vec![DEFAULT_WINDOW_WIDTH]);
        assert_eq!(config.worker_count(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_round_trips_through_json() {
        let example = JobConfig::example();
        let json = example.pretty_print().unwrap();
        assert_eq!(JobConfig::from_json(&json).unwrap(), example);
    }

    #[test]
    fn test_read_missing_file_is_configuration_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = JobConfig::read(&tmp.path().join("lineup.json")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_phantomjs_spelling() {
        let config = JobConfig::from_json(r#"{"urls": {"http://a": {}}, "browser": "phantomjs"}"#).unwrap();
        assert_eq!(config.browser, BrowserType::PhantomJs);
    }

    #[test_case(r#"{"urls": {}}"# ; "no urls")]
    #[test_case(r#"{"urls": {"http://a": {"paths": []}}}"# ; "no paths")]
    #[test_case(r#"{"urls": {"http://a": {"window-widths": []}}}"# ; "no widths")]
    #[test_case(r#"{"urls": {"http://a": {"window-widths": [0]}}}"# ; "zero width")]
    #[test_case(r#"{"urls": {"http://a": {"max-diff": 1.5}}}"# ; "max diff above one")]
    #[test_case(r#"{"urls": {"http://a": {}}, "window-height": 0}"# ; "zero window height")]
    #[test_case(r#"{"urls": {"http://a": {}}, "async-wait": -1.0}"# ; "negative async wait")]
    fn test_invalid_configs_are_rejected(json: &str) {
        let config = JobConfig::from_json(json).unwrap();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }
}
