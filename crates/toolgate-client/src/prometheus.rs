//! Prometheus HTTP API v1 client
//!
//! Sample values are kept in the string form Prometheus sends them in, so
//! re-encoding a result never rounds a float.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::{ClientError, Result};

const QUERY_PATH: &str = "/api/v1/query";
const QUERY_RANGE_PATH: &str = "/api/v1/query_range";
const TARGETS_PATH: &str = "/api/v1/targets";
const METRIC_NAMES_PATH: &str = "/api/v1/label/__name__/values";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(5);
const METRIC_NAMES_WINDOW_HOURS: i64 = 1;

// =============================================================================
// Response Types
// =============================================================================

/// `[unix_seconds, "value"]`
pub type SamplePair = (f64, String);

/// One series of an instant vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub value: SamplePair,
}

/// One series of a range matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixSeries {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub values: Vec<SamplePair>,
}

/// Result of a query, tagged by `resultType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryValue {
    Vector(Vec<VectorSample>),
    Matrix(Vec<MatrixSeries>),
    Scalar(SamplePair),
    String(SamplePair),
}

/// A target currently being scraped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActiveTarget {
    pub discovered_labels: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub scrape_pool: String,
    pub scrape_url: String,
    pub global_url: String,
    pub last_error: String,
    pub last_scrape: String,
    pub last_scrape_duration: f64,
    pub health: String,
}

/// A target removed by relabelling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DroppedTarget {
    pub discovered_labels: BTreeMap<String, String>,
}

/// Scrape target listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Targets {
    #[serde(rename = "activeTargets")]
    pub active: Vec<ActiveTarget>,
    #[serde(rename = "droppedTargets")]
    pub dropped: Vec<DroppedTarget>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

// =============================================================================
// Client
// =============================================================================

/// Prometheus REST API client
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: Client,
    base_url: String,
}

impl PrometheusClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - Prometheus root URL (e.g., "http://prometheus:9090")
    /// * `timeout` - upper bound for any single request
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Evaluate `up` within a short deadline
    pub async fn test_connection(&self) -> Result<()> {
        tokio::time::timeout(CONNECTION_TEST_TIMEOUT, self.query("up", Utc::now()))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map(|_| ())
    }

    // =========================================================================
    // Query Operations
    // =========================================================================

    /// Instant query at `time`
    #[instrument(skip(self))]
    pub async fn query(&self, expr: &str, time: DateTime<Utc>) -> Result<QueryValue> {
        let params = [("query", expr.to_string()), ("time", unix_seconds(time))];
        self.get(QUERY_PATH, &params).await
    }

    /// Range query over `[start, end]` at `step` resolution
    #[instrument(skip(self))]
    pub async fn query_range(
        &self,
        expr: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<QueryValue> {
        let params = [
            ("query", expr.to_string()),
            ("start", unix_seconds(start)),
            ("end", unix_seconds(end)),
            ("step", step.as_secs_f64().to_string()),
        ];
        self.get(QUERY_RANGE_PATH, &params).await
    }

    /// Active and dropped scrape targets
    #[instrument(skip(self))]
    pub async fn targets(&self) -> Result<Targets> {
        self.get(TARGETS_PATH, &[]).await
    }

    /// Metric names seen during the last hour
    #[instrument(skip(self))]
    pub async fn metric_names(&self) -> Result<Vec<String>> {
        let end = Utc::now();
        let start = end - chrono::Duration::hours(METRIC_NAMES_WINDOW_HOURS);
        let params = [("start", unix_seconds(start)), ("end", unix_seconds(end))];
        self.get(METRIC_NAMES_PATH, &params).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, path), params)?;
        debug!(%url, "Prometheus request");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let envelope: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ClientError::server_error(status.as_u16(), body));
            }
            Err(e) => return Err(ClientError::ParseError(e.to_string())),
        };

        if !envelope.warnings.is_empty() {
            warn!(path, warnings = ?envelope.warnings, "Prometheus returned warnings");
        }

        if envelope.status != "success" {
            return Err(ClientError::QueryFailed {
                error_type: envelope.error_type.unwrap_or_else(|| "unknown".to_string()),
                message: envelope
                    .error
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            });
        }

        envelope
            .data
            .ok_or_else(|| ClientError::ParseError("response has no data".to_string()))
    }
}

fn unix_seconds(time: DateTime<Utc>) -> String {
    format!("{:.3}", time.timestamp_millis() as f64 / 1000.0)
}
