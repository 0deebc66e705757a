//! W3C WebDriver adapter
//!
//! Speaks the WebDriver JSON wire protocol over HTTP to a driver such as
//! geckodriver, chromedriver or a Selenium grid.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use shotline_common::{BrowserType, Cookie};
use std::time::Duration;
use tracing::{debug, warn};

use crate::browser::{cookie_script, BrowserCapabilities, BrowserSession, SessionFactory};
use crate::error::{EngineError, EngineResult};

/// Response envelope of every WebDriver command
#[derive(Debug, Deserialize)]
struct WireResponse {
    value: Value,
}

/// Error payload inside `value`
#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

/// Creates WebDriver sessions for one browser type
pub struct WebDriverFactory {
    client: reqwest::Client,
    base_url: String,
    browser: BrowserType,
    page_load_timeout: Duration,
}

impl WebDriverFactory {
    pub fn new(base_url: impl Into<String>, browser: BrowserType, page_load_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            browser,
            page_load_timeout,
        }
    }

    /// `capabilities` body of the new-session request
    pub fn session_capabilities(&self) -> Value {
        let headless_args: Vec<&str> = if self.browser.is_headless() {
            vec!["--headless"]
        } else {
            vec![]
        };

        let always_match = match self.browser {
            BrowserType::Chrome | BrowserType::ChromeHeadless => json!({
                "browserName": "chrome",
                "goog:chromeOptions": { "args": headless_args },
            }),
            BrowserType::Firefox | BrowserType::FirefoxHeadless => json!({
                "browserName": "firefox",
                "moz:firefoxOptions": { "args": headless_args },
            }),
            BrowserType::PhantomJs => json!({ "browserName": "phantomjs" }),
        };

        json!({ "capabilities": { "alwaysMatch": always_match } })
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    async fn open(&self) -> EngineResult<Box<dyn BrowserSession>> {
        let url = format!("{}/session", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.session_capabilities())
            .send()
            .await?;
        let value = unwrap_response(response).await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Browser("New session response without sessionId".to_string()))?
            .to_string();

        debug!("Opened {} WebDriver session {}", self.browser, session_id);

        let mut session = WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session_id),
            capabilities: BrowserCapabilities::for_browser(self.browser),
            closed: false,
        };
        let timeouts = json!({ "pageLoad": self.page_load_timeout.as_millis() as u64 });
        if let Err(e) = session
            .command(reqwest::Method::POST, "timeouts", Some(timeouts))
            .await
        {
            session.close().await?;
            return Err(e);
        }

        Ok(Box::new(session))
    }
}

/// A live WebDriver session
pub struct WebDriverSession {
    client: reqwest::Client,
    session_url: String,
    capabilities: BrowserCapabilities,
    closed: bool,
}

impl WebDriverSession {
    async fn command(&mut self, method: reqwest::Method, endpoint: &str, body: Option<Value>) -> EngineResult<Value> {
        let url = if endpoint.is_empty() {
            self.session_url.clone()
        } else {
            format!("{}/{}", self.session_url, endpoint)
        };

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        unwrap_response(response).await
    }
}

async fn unwrap_response(response: reqwest::Response) -> EngineResult<Value> {
    let status = response.status();
    let body: WireResponse = response.json().await?;

    if !status.is_success() {
        let message = match serde_json::from_value::<WireError>(body.value.clone()) {
            Ok(err) => format!("{}: {}", err.error, err.message),
            Err(_) => body.value.to_string(),
        };
        return Err(EngineError::Browser(format!("WebDriver returned {}: {}", status, message)));
    }

    Ok(body.value)
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    fn capabilities(&self) -> BrowserCapabilities {
        self.capabilities
    }

    async fn set_viewport(&mut self, width: u32, height: u32) -> EngineResult<()> {
        self.command(
            reqwest::Method::POST,
            "window/rect",
            Some(json!({ "x": 0, "y": 0, "width": width, "height": height })),
        )
        .await?;
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> EngineResult<()> {
        self.command(reqwest::Method::POST, "url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn set_cookie(&mut self, cookie: &Cookie) -> EngineResult<()> {
        if self.capabilities.cookies_via_script {
            self.execute_script(&cookie_script(cookie)).await?;
            return Ok(());
        }

        let mut wire = json!({
            "name": cookie.name,
            "value": cookie.value,
            "secure": cookie.secure,
        });
        if let Some(domain) = &cookie.domain {
            wire["domain"] = json!(domain);
        }
        if let Some(path) = &cookie.path {
            wire["path"] = json!(path);
        }
        if let Some(expiry) = &cookie.expiry {
            wire["expiry"] = json!(expiry.timestamp());
        }

        self.command(reqwest::Method::POST, "cookie", Some(json!({ "cookie": wire })))
            .await?;
        Ok(())
    }

    async fn execute_script(&mut self, script: &str) -> EngineResult<Value> {
        self.command(
            reqwest::Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": [] })),
        )
        .await
    }

    async fn capture_screenshot(&mut self) -> EngineResult<Vec<u8>> {
        let value = self.command(reqwest::Method::GET, "screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| EngineError::Browser("Screenshot response is not a string".to_string()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| EngineError::Browser(format!("Screenshot is not valid base64: {}", e)))
    }

    async fn close(&mut self) -> EngineResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.command(reqwest::Method::DELETE, "", None).await {
            warn!("Failed to close WebDriver session {}: {}", self.session_url, e);
        }
        Ok(())
    }
}
