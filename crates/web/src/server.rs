//! Web server implementation

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use shotline_common::config::DEFAULT_PAGE_LOAD_TIMEOUT;
use shotline_common::{BrowserType, Error, JobConfig};
use shotline_engine::{EngineConfig, EngineError, JobService, SessionFactory, Step, WebDriverFactory};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Web server configuration
#[derive(Debug, Clone, Default)]
pub struct WebServerConfig {
    pub engine: EngineConfig,
    /// Browser driven for every run; the job's own `browser` key is not consulted
    pub browser: BrowserType,
}

pub struct WebServer {
    service: Arc<JobService>,
}

#[derive(Debug, Deserialize)]
struct StartParams {
    step: Option<Step>,
}

impl WebServer {
    pub fn new(cfg: WebServerConfig) -> Self {
        let factory = Arc::new(WebDriverFactory::new(
            cfg.engine.webdriver_url.clone(),
            cfg.browser,
            Duration::from_secs(DEFAULT_PAGE_LOAD_TIMEOUT),
        ));
        Self::with_factory(cfg.engine, factory)
    }

    pub fn with_factory(engine: EngineConfig, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            service: Arc::new(JobService::new(engine, factory)),
        }
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/runs", get(list_runs_handler).post(start_run_handler))
            .route("/api/runs/:run_id", get(get_run_handler).delete(abort_run_handler))
            .route("/api/runs/:run_id/results", get(get_results_handler))
            .route("/api/runs/:run_id/continue", post(continue_run_handler))
            .fallback(not_found_handler)
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.service.clone())
    }

    /// Start the web server
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!("Shotline API listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

pub async fn serve(addr: SocketAddr, cfg: WebServerConfig) -> anyhow::Result<()> {
    WebServer::new(cfg).serve(addr).await
}

fn error_json(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(serde_json::json!({"error": message.to_string()}))).into_response()
}

fn engine_error_response(err: EngineError) -> Response {
    let status = match &err {
        EngineError::Common(Error::Configuration(_)) => StatusCode::BAD_REQUEST,
        EngineError::Common(Error::NotFound { .. }) => StatusCode::NOT_FOUND,
        EngineError::Common(Error::InvalidStateTransition { .. }) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_json(status, err)
}

fn run_not_found(run_id: &str) -> Response {
    error_json(StatusCode::NOT_FOUND, format!("Run {} not found", run_id))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "shotline-web"
    }))
}

async fn start_run_handler(
    State(service): State<Arc<JobService>>,
    Query(params): Query<StartParams>,
    Json(config): Json<JobConfig>,
) -> Response {
    let step = params.step.unwrap_or(Step::Full);
    match service.start_job(config, step) {
        Ok(id) => (StatusCode::ACCEPTED, Json(serde_json::json!({"id": id}))).into_response(),
        Err(e) => {
            warn!("Rejected run: {}", e);
            engine_error_response(e)
        }
    }
}

async fn list_runs_handler(State(service): State<Arc<JobService>>) -> impl IntoResponse {
    let runs = service.list();
    Json(serde_json::json!({
        "count": runs.len(),
        "runs": runs,
    }))
}

async fn get_run_handler(State(service): State<Arc<JobService>>, Path(run_id): Path<String>) -> Response {
    match service.get_status(&run_id) {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => run_not_found(&run_id),
    }
}

async fn get_results_handler(State(service): State<Arc<JobService>>, Path(run_id): Path<String>) -> Response {
    match service.get_results(&run_id) {
        Some(results) => (StatusCode::OK, Json(results)).into_response(),
        None => run_not_found(&run_id),
    }
}

async fn continue_run_handler(State(service): State<Arc<JobService>>, Path(run_id): Path<String>) -> Response {
    match service.continue_job(&run_id) {
        Ok(()) => (StatusCode::ACCEPTED, Json(serde_json::json!({"id": run_id}))).into_response(),
        Err(e) => engine_error_response(e),
    }
}

async fn abort_run_handler(State(service): State<Arc<JobService>>, Path(run_id): Path<String>) -> Response {
    let Some(status) = service.get_status(&run_id) else {
        return run_not_found(&run_id);
    };
    if service.abort(&run_id) {
        info!("Run {} aborted", run_id);
        (StatusCode::OK, Json(serde_json::json!({"id": run_id, "aborted": true}))).into_response()
    } else {
        error_json(
            StatusCode::CONFLICT,
            format!("Run {} already ended in {}", run_id, status.state),
        )
    }
}

async fn not_found_handler() -> Response {
    error_json(StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use shotline_common::RunState;
    use shotline_engine::{BrowserSession, EngineResult};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct NoBrowser;

    #[async_trait]
    impl SessionFactory for NoBrowser {
        async fn open(&self) -> EngineResult<Box<dyn BrowserSession>> {
            Err(EngineError::Browser("no browser in tests".to_string()))
        }
    }

    fn server(tmp: &TempDir) -> WebServer {
        let engine = EngineConfig::default().with_working_dir(tmp.path());
        WebServer::with_factory(engine, Arc::new(NoBrowser))
    }

    async fn send(router: Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("content-type", "application/json");
        }
        let request = request.body(body.map(Body::from).unwrap_or_else(Body::empty)).unwrap();

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn job_body() -> String {
        JobConfig::default_for("https://www.example.com").pretty_print().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let tmp = TempDir::new().unwrap();
        let (status, body) = send(server(&tmp).router(), "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_start_run_returns_id_and_run_is_observable() {
        let tmp = TempDir::new().unwrap();
        let server = server(&tmp);

        let (status, body) = send(server.router(), "POST", "/api/runs", Some(job_body())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["id"].as_str().unwrap().to_string();

        let ended = server.service().wait(&id).await.unwrap();
        assert_eq!(ended.state, RunState::Error);

        let (status, body) = send(server.router(), "GET", &format!("/api/runs/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "ERROR");

        let (status, body) = send(server.router(), "GET", "/api/runs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (status, body) = send(server.router(), "GET", &format!("/api/runs/{}/results", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_bad_request() {
        let tmp = TempDir::new().unwrap();
        let mut config = JobConfig::default_for("https://www.example.com");
        config.urls.clear();

        let (status, body) = send(
            server(&tmp).router(),
            "POST",
            "/api/runs",
            Some(config.pretty_print().unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("No URLs configured"));
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let router = server(&tmp).router();

        let (status, _) = send(router.clone(), "GET", "/api/runs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(router.clone(), "GET", "/api/runs/nope/results", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(router.clone(), "DELETE", "/api/runs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(router, "POST", "/api/runs/nope/continue", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_abort_and_continue_on_ended_run_conflict() {
        let tmp = TempDir::new().unwrap();
        let server = server(&tmp);

        let id = server
            .service()
            .run_job(JobConfig::default_for("https://www.example.com"))
            .unwrap();
        server.service().wait(&id).await.unwrap();

        let (status, _) = send(server.router(), "DELETE", &format!("/api/runs/{}", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = send(server.router(), "POST", &format!("/api/runs/{}/continue", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
