//! Plain HTTP pre-check before any browser work

use shotline_common::HttpCheckConfig;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Issues GET requests and judges the response status
#[derive(Clone)]
pub struct HttpChecker {
    client: reqwest::Client,
}

impl Default for HttpChecker {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl HttpChecker {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch `url` and fail unless its status is one of the allowed codes.
    /// Does nothing when the check is disabled.
    pub async fn check(&self, url: &str, config: &HttpCheckConfig) -> EngineResult<()> {
        if !config.enabled {
            return Ok(());
        }

        let status = self.client.get(url).send().await?.status().as_u16();
        debug!("HTTP check for {} returned {}", url, status);

        if is_allowed(status, &config.allowed_codes) {
            Ok(())
        } else {
            Err(EngineError::capture(
                url,
                format!("HTTP check returned status {}, allowed are {:?}", status, config.allowed_codes),
            ))
        }
    }
}

pub fn is_allowed(status: u16, allowed_codes: &[u16]) -> bool {
    allowed_codes.contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shotline_common::config::DEFAULT_ALLOWED_HTTP_CODES;
    use test_case::test_case;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one request with an empty response of the given status line
    async fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status_line);
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/shop", addr)
    }

    fn checker() -> HttpChecker {
        HttpChecker::new(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    fn enabled() -> HttpCheckConfig {
        HttpCheckConfig {
            enabled: true,
            ..HttpCheckConfig::default()
        }
    }

    #[test_case(200, true)]
    #[test_case(304, true)]
    #[test_case(404, false)]
    #[test_case(500, false)]
    fn test_default_allowed_codes(status: u16, allowed: bool) {
        assert_eq!(is_allowed(status, DEFAULT_ALLOWED_HTTP_CODES), allowed);
    }

    #[tokio::test]
    async fn test_disabled_check_sends_nothing() {
        let config = HttpCheckConfig {
            enabled: false,
            ..HttpCheckConfig::default()
        };
        // Unroutable address: any request would fail
        let result = HttpChecker::default().check("http://0.0.0.0:1/", &config).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_disallowed_status_is_capture_error() {
        let url = serve_once("404 Not Found").await;

        let err = checker().check(&url, &enabled()).await.unwrap_err();

        assert!(err.is_context_scoped());
        match err {
            EngineError::Capture { context, reason } => {
                assert_eq!(context, url);
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_allowed_status_passes() {
        let url = serve_once("200 OK").await;
        assert!(checker().check(&url, &enabled()).await.is_ok());
    }
}
