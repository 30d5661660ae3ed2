//! Integration tests for toolgate
//!
//! Mock Superset and Prometheus servers run in-process on ephemeral ports so
//! the real clients, adapters and gateway can be exercised over HTTP without
//! external services.
//!
//! # Test Structure
//!
//! - `session_client_test.rs` - Superset login and CSRF caching under concurrency
//! - `prometheus_adapter_test.rs` - Prometheus adapter against a mock API
//! - `gateway_e2e_test.rs` - Both adapters mounted on a live gateway

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use toolgate_client::testing::TestServer;
use toolgate_client::Result;

/// Session cookie issued by the mock Superset after a successful login
pub const SESSION_COOKIE: &str = "session=mock-session";

/// Sample value returned for `up`; not exactly representable as f64
pub const UP_VALUE: &str = "0.30000000000000004";

// =============================================================================
// Mock Superset
// =============================================================================

/// How the mock answers a login POST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    /// 302 to `/superset/welcome/`
    Redirect,
    /// 200 with the welcome page markup
    WelcomePage,
    /// 200 with the login page and an "Invalid login" flash
    Rejected,
}

/// Shape of the database listing body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseShape {
    /// `{"count": n, "result": [...]}`
    Envelope,
    /// `[...]`
    BareArray,
}

#[derive(Debug, Clone)]
pub struct SupersetOptions {
    pub login_mode: LoginMode,
    pub database_shape: DatabaseShape,
    /// Delay before the login page is served
    pub login_page_delay: Duration,
    /// Serve a login page without a token field
    pub omit_csrf_token: bool,
    pub healthy: bool,
}

impl Default for SupersetOptions {
    fn default() -> Self {
        Self {
            login_mode: LoginMode::Redirect,
            database_shape: DatabaseShape::Envelope,
            login_page_delay: Duration::ZERO,
            omit_csrf_token: false,
            healthy: true,
        }
    }
}

/// Request counters and captured bodies
#[derive(Debug, Default)]
pub struct SupersetStats {
    pub login_page_gets: AtomicUsize,
    pub login_posts: AtomicUsize,
    pub database_calls: AtomicUsize,
    pub execute_calls: AtomicUsize,
    pub last_execute: Mutex<Option<Value>>,
    pub last_login_form: Mutex<Option<HashMap<String, String>>>,
}

impl SupersetStats {
    pub fn login_page_gets(&self) -> usize {
        self.login_page_gets.load(Ordering::SeqCst)
    }

    pub fn login_posts(&self) -> usize {
        self.login_posts.load(Ordering::SeqCst)
    }

    pub fn database_calls(&self) -> usize {
        self.database_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }
}

struct SupersetState {
    options: SupersetOptions,
    stats: Arc<SupersetStats>,
}

/// In-process Superset stand-in
pub struct MockSuperset {
    pub stats: Arc<SupersetStats>,
    server: TestServer,
}

impl MockSuperset {
    pub async fn start() -> Result<Self> {
        Self::with_options(SupersetOptions::default()).await
    }

    pub async fn with_options(options: SupersetOptions) -> Result<Self> {
        let stats = Arc::new(SupersetStats::default());
        let state = Arc::new(SupersetState {
            options,
            stats: stats.clone(),
        });

        let router = Router::new()
            .route("/health", get(superset_health))
            .route("/login/", get(login_page).post(login_submit))
            .route("/api/v1/database/", get(list_databases))
            .route("/api/v1/sqllab/execute/", axum::routing::post(execute_sql))
            .with_state(state);

        let server = TestServer::start(router).await?;
        Ok(Self { stats, server })
    }

    pub fn base_url(&self) -> String {
        self.server.base_url()
    }
}

async fn superset_health(State(state): State<Arc<SupersetState>>) -> StatusCode {
    if state.options.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn login_page(State(state): State<Arc<SupersetState>>) -> Html<String> {
    let n = state.stats.login_page_gets.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(state.options.login_page_delay).await;

    let token_field = if state.options.omit_csrf_token {
        String::new()
    } else {
        format!(
            r#"<input id="csrf_token" name="csrf_token" type="hidden" value="token-{}">"#,
            n
        )
    };
    Html(format!(
        "<html><body><form method=\"post\">{}<input name=\"username\"></form></body></html>",
        token_field
    ))
}

async fn login_submit(
    State(state): State<Arc<SupersetState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.stats.login_posts.fetch_add(1, Ordering::SeqCst);
    let has_token = form
        .get("csrf_token")
        .is_some_and(|t| t.starts_with("token-"));
    *state.stats.last_login_form.lock() = Some(form);

    if !has_token {
        return (StatusCode::BAD_REQUEST, "The CSRF token is missing.").into_response();
    }

    let set_cookie = [(header::SET_COOKIE, format!("{}; Path=/", SESSION_COOKIE))];
    match state.options.login_mode {
        LoginMode::Redirect => (
            StatusCode::FOUND,
            set_cookie,
            [(header::LOCATION, "/superset/welcome/")],
        )
            .into_response(),
        LoginMode::WelcomePage => (
            set_cookie,
            Html("<html><title>superset</title><body>dashboard list</body></html>"),
        )
            .into_response(),
        LoginMode::Rejected => {
            Html("<html><body><div class=\"alert\">Invalid login. Please try again.</div></body></html>")
                .into_response()
        }
    }
}

/// Session cookie and CSRF header must both be present
fn authorized(headers: &HeaderMap) -> bool {
    let has_session = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|c| c.contains(SESSION_COOKIE));
    let has_token = headers
        .get("X-CSRFToken")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|t| t.starts_with("token-"));
    has_session && has_token
}

async fn list_databases(State(state): State<Arc<SupersetState>>, headers: HeaderMap) -> Response {
    state.stats.database_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"msg": "Not authorized"}))).into_response();
    }

    let databases = json!([
        {"id": 1, "database_name": "examples", "backend": "postgresql"},
        {"id": 2, "database_name": "warehouse", "backend": "trino", "changed_on": "2024-01-01T00:00:00"}
    ]);
    let body = match state.options.database_shape {
        DatabaseShape::Envelope => json!({"count": 2, "ids": [1, 2], "result": databases}),
        DatabaseShape::BareArray => databases,
    };
    Json(body).into_response()
}

async fn execute_sql(
    State(state): State<Arc<SupersetState>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    state.stats.execute_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"msg": "Not authorized"}))).into_response();
    }

    let sql = request["sql"].as_str().unwrap_or_default().to_string();
    *state.stats.last_execute.lock() = Some(request);

    if sql.contains("syntax error") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "syntax error at or near \"error\"", "status": "failed"})),
        )
            .into_response();
    }

    // Row objects come back keyed by name; column order is only in `columns`
    Json(json!({
        "status": "success",
        "query_id": 42,
        "columns": [
            {"name": "zeta", "type": "STRING"},
            {"column_name": "alpha", "type": "INT"},
            {"name": "mid", "type": "FLOAT"}
        ],
        "data": [
            {"alpha": 1, "mid": 1.5, "zeta": "a"},
            {"mid": 2.5, "zeta": "b", "alpha": 2},
            {"zeta": "c", "alpha": 3}
        ],
        "query": {"sql": sql}
    }))
    .into_response()
}

// =============================================================================
// Mock Prometheus
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct PrometheusOptions {
    /// Warnings attached to every successful response
    pub warnings: Vec<String>,
}

/// Query parameters of every request, in arrival order
#[derive(Debug, Default)]
pub struct PrometheusStats {
    pub requests: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl PrometheusStats {
    /// Parameters of the most recent request to `path`
    pub fn last(&self, path: &str) -> Option<HashMap<String, String>> {
        self.requests
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, params)| params.clone())
    }
}

struct PrometheusState {
    options: PrometheusOptions,
    stats: Arc<PrometheusStats>,
}

impl PrometheusState {
    fn record(&self, path: &str, params: HashMap<String, String>) {
        self.stats.requests.lock().push((path.to_string(), params));
    }

    fn success(&self, data: Value) -> Response {
        let mut body = json!({"status": "success", "data": data});
        if !self.options.warnings.is_empty() {
            body["warnings"] = json!(self.options.warnings);
        }
        Json(body).into_response()
    }
}

/// In-process Prometheus HTTP API stand-in
pub struct MockPrometheus {
    pub stats: Arc<PrometheusStats>,
    server: TestServer,
}

impl MockPrometheus {
    pub async fn start() -> Result<Self> {
        Self::with_options(PrometheusOptions::default()).await
    }

    pub async fn with_options(options: PrometheusOptions) -> Result<Self> {
        let stats = Arc::new(PrometheusStats::default());
        let state = Arc::new(PrometheusState {
            options,
            stats: stats.clone(),
        });

        let router = Router::new()
            .route("/api/v1/query", get(prom_query))
            .route("/api/v1/query_range", get(prom_query_range))
            .route("/api/v1/targets", get(prom_targets))
            .route("/api/v1/label/__name__/values", get(prom_metric_names))
            .with_state(state);

        let server = TestServer::start(router).await?;
        Ok(Self { stats, server })
    }

    pub fn base_url(&self) -> String {
        self.server.base_url()
    }
}

async fn prom_query(
    State(state): State<Arc<PrometheusState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let expr = params.get("query").cloned().unwrap_or_default();
    state.record("/api/v1/query", params);

    if expr.contains('(') && !expr.contains(')') {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "errorType": "bad_data",
                "error": "1:5: parse error: unclosed left parenthesis"
            })),
        )
            .into_response();
    }

    state.success(json!({
        "resultType": "vector",
        "result": [
            {"metric": {"__name__": "up", "job": "node", "instance": "node:9100"}, "value": [1700000000.123, UP_VALUE]}
        ]
    }))
}

async fn prom_query_range(
    State(state): State<Arc<PrometheusState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.record("/api/v1/query_range", params);
    state.success(json!({
        "resultType": "matrix",
        "result": [
            {"metric": {"job": "node"}, "values": [[1700000000, "1"], [1700000015, "0"]]}
        ]
    }))
}

async fn prom_targets(State(state): State<Arc<PrometheusState>>) -> Response {
    state.record("/api/v1/targets", HashMap::new());
    state.success(json!({
        "activeTargets": [{
            "labels": {"job": "node", "instance": "node:9100"},
            "scrapePool": "node",
            "scrapeUrl": "http://node:9100/metrics",
            "lastError": "",
            "lastScrape": "2024-01-01T00:00:00Z",
            "lastScrapeDuration": 0.012,
            "health": "up"
        }],
        "droppedTargets": []
    }))
}

async fn prom_metric_names(
    State(state): State<Arc<PrometheusState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.record("/api/v1/label/__name__/values", params);
    state.success(json!(["node_cpu_seconds_total", "up"]))
}
