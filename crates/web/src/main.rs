use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use shotline_common::BrowserType;
use shotline_engine::EngineConfig;
use tracing::info;

use shotline_web::server::WebServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let web_addr: SocketAddr = std::env::var("SHOTLINE_WEB_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let config_path = PathBuf::from(
        std::env::var("SHOTLINE_CONFIG").unwrap_or_else(|_| "shotline.toml".to_string()),
    );
    let engine = EngineConfig::load(&config_path)
        .with_context(|| format!("Cannot load {}", config_path.display()))?;

    let browser: BrowserType = match std::env::var("SHOTLINE_BROWSER") {
        Ok(name) => serde_json::from_value(serde_json::Value::String(name.clone()))
            .with_context(|| format!("Unknown browser {}", name))?,
        Err(_) => BrowserType::default(),
    };

    info!(
        "Starting Shotline API on http://{} (webdriver: {}, browser: {})",
        web_addr, engine.webdriver_url, browser
    );

    shotline_web::server::serve(web_addr, WebServerConfig { engine, browser }).await
}
