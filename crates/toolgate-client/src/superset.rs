//! Superset client with session login and CSRF token caching
//!
//! Superset's SQL Lab API needs a logged-in session cookie plus an
//! `X-CSRFToken` header scraped from the login page. Both are acquired
//! lazily and shared by every caller of one client:
//!
//! ```text
//! login state:   LoggedOut ──(exclusive lock)──> LoggingIn ──ok──> LoggedIn
//!                    ^                               │
//!                    └──────────── failure ──────────┘
//!
//! token state:   Absent/Expired ──(exclusive lock)──> Fetching ──> Valid(token, expires_at)
//! ```
//!
//! Both transitions use double-checked locking: a shared-lock fast path,
//! then an exclusive lock with a re-check, so concurrent callers trigger at
//! most one login POST and at most one token fetch. Waiting for either lock
//! is bounded by the client timeout unless a separate lock timeout is set.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use regex::Regex;
use reqwest::{header, redirect, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{ClientError, Result};

const LOGIN_PATH: &str = "/login/";
const HEALTH_PATH: &str = "/health";
const DATABASES_PATH: &str = "/api/v1/database/";
const EXECUTE_SQL_PATH: &str = "/api/v1/sqllab/execute/";
const SQLLAB_PATH: &str = "/superset/sqllab";

const CSRF_HEADER: &str = "X-CSRFToken";
const CSRF_PATTERN: &str = r#"name="csrf_token"[^>]*value="([^"]*)""#;

/// How long a scraped CSRF token is reused
pub const DEFAULT_CSRF_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 10;

const LOGIN_FAILURE_MARKERS: [&str; 3] = [
    "Invalid login",
    "Invalid username or password",
    "Authentication failed",
];

// =============================================================================
// Response Types
// =============================================================================

/// A database connection registered in Superset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub id: i64,
    pub database_name: String,
    pub backend: String,
    pub sqlalchemy_uri: String,
    pub created_on: String,
    pub changed_on: String,
}

/// SQL Lab result normalized so every row is aligned with `columns`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub original_query: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct DatabaseEnvelope {
    result: Vec<Database>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExecuteResponse {
    status: String,
    data: Vec<HashMap<String, Value>>,
    columns: Vec<ExecuteColumn>,
    query: ExecuteQuery,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExecuteColumn {
    name: String,
    column_name: String,
}

impl ExecuteColumn {
    fn key(&self) -> &str {
        if self.name.is_empty() {
            &self.column_name
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExecuteQuery {
    sql: String,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    database_id: i64,
    sql: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Outcome of a login POST
#[derive(Debug, PartialEq, Eq)]
enum LoginOutcome {
    Accepted,
    Rejected,
    Unrecognized(String),
}

// =============================================================================
// Client
// =============================================================================

/// Superset HTTP API client
pub struct SupersetClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    lock_timeout: Duration,
    csrf_ttl: Duration,
    csrf_pattern: Regex,
    logged_in: RwLock<bool>,
    csrf: RwLock<Option<CachedToken>>,
}

impl SupersetClient {
    /// Create a new client. No request is made until the first call.
    ///
    /// # Arguments
    /// * `base_url` - Superset root URL (e.g., "http://superset:8088")
    /// * `timeout` - bound for every request and, by default, every lock wait
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Url::parse(base_url)?;

        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .build()?;

        let csrf_pattern =
            Regex::new(CSRF_PATTERN).map_err(|e| ClientError::ParseError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            lock_timeout: timeout,
            csrf_ttl: DEFAULT_CSRF_TTL,
            csrf_pattern,
            logged_in: RwLock::new(false),
            csrf: RwLock::new(None),
        })
    }

    /// Override how long a fetched CSRF token stays cached
    pub fn with_csrf_ttl(mut self, ttl: Duration) -> Self {
        self.csrf_ttl = ttl;
        self
    }

    /// Bound waits for the login and token locks separately from requests
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}{}", self.base_url, path))?)
    }

    async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::time::timeout(self.lock_timeout, fut)
            .await
            .map_err(|_| ClientError::Timeout)
    }

    // =========================================================================
    // Health Check
    // =========================================================================

    /// Check that the server answers `/health` with 200
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn test_connection(&self) -> Result<()> {
        let response = self.http.get(self.url(HEALTH_PATH)?).send().await?;
        let status = response.status();
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(ClientError::server_error(
                status.as_u16(),
                "health check failed",
            ))
        }
    }

    // =========================================================================
    // Session Handling
    // =========================================================================

    /// Whether a login has succeeded on this client
    pub async fn is_logged_in(&self) -> Result<bool> {
        Ok(*self.bounded(self.logged_in.read()).await?)
    }

    /// Log in unless a session already exists
    #[instrument(skip(self), fields(user = %self.username))]
    pub async fn ensure_logged_in(&self) -> Result<()> {
        if *self.bounded(self.logged_in.read()).await? {
            return Ok(());
        }

        let mut logged_in = self.bounded(self.logged_in.write()).await?;
        if *logged_in {
            debug!("Session established by a concurrent caller");
            return Ok(());
        }

        self.login().await?;
        *logged_in = true;
        info!(base_url = %self.base_url, "Logged in to Superset");
        Ok(())
    }

    /// Submit credentials with a freshly scraped token. Caller holds the login lock.
    async fn login(&self) -> Result<()> {
        let login_url = self.url(LOGIN_PATH)?;
        let token = self.scrape_csrf_token().await?;

        let form = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("csrf_token", token.as_str()),
        ];
        let response = self
            .http
            .post(login_url.clone())
            .header(header::REFERER, login_url.as_str())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = if status == StatusCode::OK {
            response.text().await?
        } else {
            String::new()
        };

        match classify_login(status, location.as_deref(), &body) {
            LoginOutcome::Accepted => Ok(()),
            LoginOutcome::Rejected => {
                warn!(user = %self.username, "Superset rejected credentials");
                Err(ClientError::AuthenticationFailed(
                    "invalid username or password".to_string(),
                ))
            }
            LoginOutcome::Unrecognized(reason) => Err(ClientError::LoginFailed(reason)),
        }
    }

    /// Return a valid CSRF token, fetching one if the cache is empty or expired
    pub async fn csrf_token(&self) -> Result<String> {
        {
            let cached = self.bounded(self.csrf.read()).await?;
            if let Some(token) = &*cached {
                if token.is_valid() {
                    return Ok(token.value.clone());
                }
            }
        }

        let mut cached = self.bounded(self.csrf.write()).await?;
        if let Some(token) = &*cached {
            if token.is_valid() {
                debug!("CSRF token refreshed by a concurrent caller");
                return Ok(token.value.clone());
            }
        }

        let value = self.scrape_csrf_token().await?;
        debug!(ttl_secs = self.csrf_ttl.as_secs(), "Cached new CSRF token");
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + self.csrf_ttl,
        });
        Ok(value)
    }

    async fn scrape_csrf_token(&self) -> Result<String> {
        let response = self.http.get(self.url(LOGIN_PATH)?).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::server_error(
                status.as_u16(),
                "failed to load login page",
            ));
        }
        let body = response.text().await?;
        extract_csrf_token(&self.csrf_pattern, &body).ok_or(ClientError::CsrfTokenMissing)
    }

    // =========================================================================
    // API Calls
    // =========================================================================

    /// List configured databases
    #[instrument(skip(self))]
    pub async fn get_databases(&self) -> Result<Vec<Database>> {
        self.ensure_logged_in().await?;
        let token = self.csrf_token().await?;

        let response = self
            .http
            .get(self.url(DATABASES_PATH)?)
            .header(header::ACCEPT, "application/json")
            .header(CSRF_HEADER, token)
            .header(header::REFERER, format!("{}{}", self.base_url, SQLLAB_PATH))
            .send()
            .await?;

        let body = self.read_ok_body(response).await?;
        decode_databases(&body)
    }

    /// Execute `sql` against the database with `database_id`
    pub async fn execute_sql(&self, sql: &str, database_id: i64) -> Result<SqlResult> {
        self.execute(sql, database_id, None).await
    }

    /// Execute `sql` with `schema` as the default schema
    pub async fn execute_sql_with_schema(
        &self,
        sql: &str,
        database_id: i64,
        schema: &str,
    ) -> Result<SqlResult> {
        self.execute(sql, database_id, Some(schema)).await
    }

    #[instrument(skip(self, sql))]
    async fn execute(
        &self,
        sql: &str,
        database_id: i64,
        schema: Option<&str>,
    ) -> Result<SqlResult> {
        self.ensure_logged_in().await?;
        let token = self.csrf_token().await?;

        let request = ExecuteRequest {
            database_id,
            sql,
            schema,
        };
        let response = self
            .http
            .post(self.url(EXECUTE_SQL_PATH)?)
            .header(header::ACCEPT, "application/json")
            .header(CSRF_HEADER, token)
            .header(header::REFERER, format!("{}{}", self.base_url, SQLLAB_PATH))
            .json(&request)
            .send()
            .await?;

        let body = self.read_ok_body(response).await?;
        let parsed: ExecuteResponse = serde_json::from_str(&body)
            .map_err(|e| ClientError::ParseError(format!("{}: {}", e, body)))?;
        Ok(align_rows(parsed))
    }

    async fn read_ok_body(&self, response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::OK {
            Ok(body)
        } else {
            Err(ClientError::server_error(status.as_u16(), body))
        }
    }
}

// =============================================================================
// Decoding Helpers
// =============================================================================

fn extract_csrf_token(pattern: &Regex, markup: &str) -> Option<String> {
    pattern
        .captures(markup)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn classify_login(status: StatusCode, location: Option<&str>, body: &str) -> LoginOutcome {
    match status {
        StatusCode::FOUND | StatusCode::SEE_OTHER => {
            let location = location.unwrap_or_default();
            if location.contains("/superset/welcome")
                || location == "/"
                || location.contains("/superset")
            {
                LoginOutcome::Accepted
            } else {
                LoginOutcome::Unrecognized(format!(
                    "unexpected redirect to '{}' (status {})",
                    location,
                    status.as_u16()
                ))
            }
        }
        StatusCode::OK => {
            if LOGIN_FAILURE_MARKERS.iter().any(|m| body.contains(m)) {
                LoginOutcome::Rejected
            } else if body.contains("superset") && body.contains("dashboard") {
                LoginOutcome::Accepted
            } else {
                LoginOutcome::Unrecognized("login page returned without a session".to_string())
            }
        }
        other => LoginOutcome::Unrecognized(format!("status {}", other.as_u16())),
    }
}

/// The database list arrives either as `{"result": [...]}` or as a bare array
fn decode_databases(body: &str) -> Result<Vec<Database>> {
    if let Ok(envelope) = serde_json::from_str::<DatabaseEnvelope>(body) {
        return Ok(envelope.result);
    }
    serde_json::from_str::<Vec<Database>>(body)
        .map_err(|e| ClientError::ParseError(format!("database list: {}", e)))
}

fn align_rows(response: ExecuteResponse) -> SqlResult {
    let columns: Vec<String> = response
        .columns
        .iter()
        .map(|c| c.key().to_string())
        .collect();

    let rows = response
        .data
        .into_iter()
        .map(|row| {
            columns
                .iter()
                .map(|name| row.get(name).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    SqlResult {
        columns,
        rows,
        original_query: response.query.sql,
        status: response.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pattern() -> Regex {
        Regex::new(CSRF_PATTERN).unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client =
            SupersetClient::new("http://localhost:8088/", "admin", "pw", Duration::from_secs(5))
                .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8088");
    }

    #[test]
    fn test_invalid_url() {
        assert!(SupersetClient::new("not a url", "a", "b", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_extract_csrf_token() {
        let markup = r#"<input id="csrf_token" name="csrf_token" type="hidden" value="abc.123">"#;
        assert_eq!(extract_csrf_token(&pattern(), markup), Some("abc.123".to_string()));
        assert_eq!(extract_csrf_token(&pattern(), "<form></form>"), None);
    }

    #[test]
    fn test_classify_redirects() {
        for location in ["/superset/welcome/", "/", "http://host/superset/dashboard/"] {
            assert_eq!(
                classify_login(StatusCode::FOUND, Some(location), ""),
                LoginOutcome::Accepted
            );
        }
        assert!(matches!(
            classify_login(StatusCode::SEE_OTHER, Some("/login/"), ""),
            LoginOutcome::Unrecognized(_)
        ));
    }

    #[test]
    fn test_classify_bodies() {
        assert_eq!(
            classify_login(StatusCode::OK, None, "<p>Invalid login. Please try again.</p>"),
            LoginOutcome::Rejected
        );
        assert_eq!(
            classify_login(StatusCode::OK, None, "<title>superset</title> dashboard list"),
            LoginOutcome::Accepted
        );
        assert!(matches!(
            classify_login(StatusCode::OK, None, "<html></html>"),
            LoginOutcome::Unrecognized(_)
        ));
        assert!(matches!(
            classify_login(StatusCode::INTERNAL_SERVER_ERROR, None, ""),
            LoginOutcome::Unrecognized(_)
        ));
    }

    #[test]
    fn test_decode_databases_both_shapes() {
        let envelope = r#"{"count": 1, "result": [{"id": 1, "database_name": "examples", "backend": "postgresql"}]}"#;
        let bare = r#"[{"id": 2, "database_name": "warehouse"}]"#;

        let from_envelope = decode_databases(envelope).unwrap();
        assert_eq!(from_envelope[0].id, 1);
        assert_eq!(from_envelope[0].backend, "postgresql");

        let from_bare = decode_databases(bare).unwrap();
        assert_eq!(from_bare[0].database_name, "warehouse");
        assert_eq!(from_bare[0].sqlalchemy_uri, "");

        assert!(decode_databases(r#"{"message": "nope"}"#).is_err());
    }

    #[test]
    fn test_align_rows_follows_column_order() {
        let response: ExecuteResponse = serde_json::from_value(json!({
            "status": "success",
            "columns": [{"name": "id"}, {"name": "name"}, {"column_name": "score"}],
            "data": [
                {"score": 9.5, "name": "a", "id": 1},
                {"id": 2}
            ],
            "query": {"sql": "SELECT id, name, score FROM t"}
        }))
        .unwrap();

        let result = align_rows(response);
        assert_eq!(result.columns, vec!["id", "name", "score"]);
        assert_eq!(result.rows[0], vec![json!(1), json!("a"), json!(9.5)]);
        assert_eq!(result.rows[1], vec![json!(2), Value::Null, Value::Null]);
        assert_eq!(result.original_query, "SELECT id, name, score FROM t");
        assert_eq!(result.status, "success");
    }

    #[test]
    fn test_align_rows_repeats_duplicate_columns() {
        let response: ExecuteResponse = serde_json::from_value(json!({
            "status": "success",
            "columns": [{"name": "x"}, {"name": "x"}],
            "data": [{"x": 7}],
            "query": {"sql": "SELECT x, x FROM t"}
        }))
        .unwrap();

        let result = align_rows(response);
        assert_eq!(result.columns, vec!["x", "x"]);
        assert_eq!(result.rows, vec![vec![json!(7), json!(7)]]);
    }
}
