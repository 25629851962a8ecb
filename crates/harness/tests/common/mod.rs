//! Stand-in for comply-server used by the integration tests

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use comply_harness::HarnessConfig;

pub const STATUS_LOG_LINE: &str = "ERROR status handler: plugin registry unavailable";
pub const VERSION_LOG_LINE: &str = "INFO served /server/version";
pub const STATUS_BODY: &str = "plugin registry unavailable";
pub const DEFERRED_LOG_LINE: &str = "INFO audit flush for /server/audit";
pub const REJECTED_LOG_LINE: &str = "WARN rejected /server/reject";

/// Delay between `/server/audit` responding and logging
pub const DEFERRED_LOG_DELAY: Duration = Duration::from_millis(30);

#[derive(Clone)]
struct StubState {
    log: Option<PathBuf>,
    heartbeat_failures: Arc<AtomicUsize>,
}

impl StubState {
    fn log(&self, line: &str) {
        if let Some(path) = &self.log {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap();
            writeln!(file, "{}", line).unwrap();
        }
    }
}

pub struct StubServer {
    pub port: u16,
    task: JoinHandle<()>,
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve the comply-server endpoints on an ephemeral port.
///
/// `/server/status` fails with 500 and writes a line to `log`; `/server/api`
/// returns HTML instead of JSON; `/server/audit` succeeds and logs shortly
/// after responding; `/heartbeat` answers 503 `heartbeat_failures` times
/// before turning healthy.
pub async fn spawn_stub(log: Option<PathBuf>, heartbeat_failures: usize) -> StubServer {
    let state = StubState {
        log,
        heartbeat_failures: Arc::new(AtomicUsize::new(heartbeat_failures)),
    };

    let app = Router::new()
        .route("/heartbeat", get(heartbeat))
        .route("/server/status", get(status))
        .route("/server/version", get(version))
        .route("/server/api", get(api))
        .route("/server/plugins/list", get(|| async { Json(json!({ "data": [] })) }))
        .route(
            "/server/next-commands",
            get(|| async { Json(json!({ "commands": ["server status"] })) }),
        )
        .route("/server/audit", get(audit))
        .route("/server/reject", get(reject))
        .route("/echo", any(echo))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    StubServer { port, task }
}

async fn heartbeat(State(state): State<StubState>) -> Response {
    let remaining = state.heartbeat_failures.load(Ordering::SeqCst);
    if remaining > 0 {
        state.heartbeat_failures.store(remaining - 1, Ordering::SeqCst);
        return (StatusCode::SERVICE_UNAVAILABLE, "starting").into_response();
    }
    Json(json!({ "status": "OK" })).into_response()
}

async fn status(State(state): State<StubState>) -> Response {
    state.log(STATUS_LOG_LINE);
    (StatusCode::INTERNAL_SERVER_ERROR, STATUS_BODY).into_response()
}

async fn version(State(state): State<StubState>) -> Response {
    state.log(VERSION_LOG_LINE);
    Json(json!({ "version": "2.3.1" })).into_response()
}

async fn audit(State(state): State<StubState>) -> Response {
    tokio::spawn(async move {
        tokio::time::sleep(DEFERRED_LOG_DELAY).await;
        state.log(DEFERRED_LOG_LINE);
    });
    Json(json!({ "status": "OK" })).into_response()
}

async fn reject(State(state): State<StubState>) -> Response {
    state.log(REJECTED_LOG_LINE);
    (StatusCode::INTERNAL_SERVER_ERROR, "rejected").into_response()
}

async fn api() -> Response {
    (
        [("content-type", "text/html")],
        "<html><body>API docs</body></html>",
    )
        .into_response()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Json<Value> {
    let mut seen = Map::new();
    for (name, value) in &headers {
        seen.insert(
            name.as_str().to_string(),
            Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        );
    }
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "headers": seen,
        "body": body,
    }))
}

/// A port nothing is listening on
pub fn closed_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Config pointing at `port`, writing everything under `results_dir`, with short timings
pub fn test_config(results_dir: PathBuf, port: u16) -> HarnessConfig {
    let mut config = HarnessConfig {
        results_dir,
        runtime_version: "v-test.1".to_string(),
        log_settle: Duration::from_millis(50),
        ..HarnessConfig::default()
    };
    config.http.host = "127.0.0.1".to_string();
    config.http.port = port;
    config.http.request_timeout = Duration::from_secs(2);
    config.readiness.interval = Duration::from_millis(20);
    config.readiness.max_attempts = 50;
    config.server.grace_window = Duration::from_millis(200);
    config.server.shutdown_timeout = Duration::from_secs(2);
    config
}

/// Use `sh -c script` as the server process
pub fn with_shell_server(config: &mut HarnessConfig, script: &str) {
    config.server.binary = "sh".to_string();
    config.server.args = Some(vec!["-c".to_string(), script.to_string()]);
}
