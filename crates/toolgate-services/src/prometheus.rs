//! Prometheus adapter - PromQL queries exposed as tools

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use toolgate_client::{ClientError, PrometheusClient, QueryValue};
use toolgate_core::duration::parse_duration;
use toolgate_core::{
    Service, ServiceConfig, ServiceError, ServiceKind, ServiceResult, ToolCall, ToolInfo,
    ToolResult,
};
use tracing::{debug, info};

/// Mount path used when the configuration leaves `endpoint` empty
pub const DEFAULT_ENDPOINT: &str = "/prometheus/mcp";

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const RANGE_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_METRICS_TIMEOUT: Duration = Duration::from_secs(15);

pub const TOOL_QUERY: &str = "prometheus_query";
pub const TOOL_QUERY_RANGE: &str = "prometheus_query_range";
pub const TOOL_TARGETS: &str = "prometheus_targets";
pub const TOOL_STATUS: &str = "prometheus_status";
pub const TOOL_COMMON_METRICS: &str = "prometheus_common_metrics";
pub const TOOL_LIST_METRICS: &str = "prometheus_list_metrics";

const TOOLS: [(&str, &str); 6] = [
    (TOOL_QUERY, "Run an instant PromQL query"),
    (TOOL_QUERY_RANGE, "Run a PromQL range query"),
    (TOOL_TARGETS, "List scrape targets"),
    (TOOL_STATUS, "Check Prometheus connectivity"),
    (TOOL_COMMON_METRICS, "Query a common host metric (cpu, memory, disk, network, up)"),
    (TOOL_LIST_METRICS, "List all metric names"),
];

/// PromQL behind each `metric_type` of the common metrics tool
fn common_metric_query(metric_type: &str) -> Option<&'static str> {
    match metric_type {
        "cpu" => Some(r#"100 - (avg by (instance) (irate(node_cpu_seconds_total{mode="idle"}[5m])) * 100)"#),
        "memory" => Some("(1 - (node_memory_MemAvailable_bytes / node_memory_MemTotal_bytes)) * 100"),
        "disk" => Some(r#"(1 - (node_filesystem_avail_bytes{mountpoint="/"} / node_filesystem_size_bytes{mountpoint="/"})) * 100"#),
        "network" => Some("rate(node_network_receive_bytes_total[5m])"),
        "up" => Some("up"),
        _ => None,
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// `prometheus` section of the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub url: String,
    pub endpoint: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl PrometheusConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl ServiceConfig for PrometheusConfig {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Prometheus
    }

    fn endpoint(&self) -> &str {
        if self.endpoint.is_empty() {
            DEFAULT_ENDPOINT
        } else {
            &self.endpoint
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled && !self.url.is_empty()
    }

    fn validate(&self) -> ServiceResult<()> {
        if self.enabled && self.url.is_empty() {
            return Err(ServiceError::config(
                "prometheus.url",
                "required when prometheus is enabled",
            ));
        }
        if !self.endpoint().starts_with('/') {
            return Err(ServiceError::config(
                "prometheus.endpoint",
                "must start with '/'",
            ));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// Tool Parameters
// =============================================================================

#[derive(Debug, Deserialize)]
struct QueryParams {
    query: String,
}

#[derive(Debug, Deserialize)]
struct QueryRangeParams {
    query: String,
    start_time: String,
    end_time: String,
    step: String,
}

#[derive(Debug, Deserialize)]
struct CommonMetricsParams {
    metric_type: String,
}

// =============================================================================
// Service
// =============================================================================

/// Adapter exposing a Prometheus server as a set of tools
pub struct PrometheusService {
    client: PrometheusClient,
    endpoint: String,
    request_timeout: Duration,
}

/// Factory registered for [`ServiceKind::Prometheus`]
pub fn create_service(
    config: &dyn ServiceConfig,
    timeout: Duration,
) -> ServiceResult<Arc<dyn Service>> {
    let config = config
        .as_any()
        .downcast_ref::<PrometheusConfig>()
        .ok_or_else(|| ServiceError::config("prometheus", "expected a Prometheus configuration"))?;
    config.validate()?;

    let service = PrometheusService::new(config, timeout)
        .map_err(|e| ServiceError::creation(ServiceKind::Prometheus, e))?;
    info!(url = %config.url, endpoint = %service.endpoint, "Created Prometheus service");
    Ok(Arc::new(service))
}

impl PrometheusService {
    pub fn new(config: &PrometheusConfig, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: PrometheusClient::new(&config.url, timeout)?,
            endpoint: config.endpoint().to_string(),
            request_timeout: timeout,
        })
    }

    /// Run `fut` under `limit`, never longer than the adapter's request timeout
    async fn within<T, F>(&self, limit: Duration, fut: F) -> ServiceResult<T>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        tokio::time::timeout(limit.min(self.request_timeout), fut)
            .await
            .map_err(|_| ServiceError::Timeout)?
            .map_err(ServiceError::from)
    }

    async fn query(&self, call: &ToolCall) -> ServiceResult<QueryValue> {
        let params: QueryParams = call.arguments()?;
        self.within(QUERY_TIMEOUT, self.client.query(&params.query, Utc::now()))
            .await
    }

    async fn query_range(&self, call: &ToolCall) -> ServiceResult<QueryValue> {
        let params: QueryRangeParams = call.arguments()?;
        let start = parse_time("start_time", &params.start_time)?;
        let end = parse_time("end_time", &params.end_time)?;
        let step = parse_duration(&params.step)?;
        if step.is_zero() {
            return Err(ServiceError::InvalidArgument(
                "step must be greater than zero".to_string(),
            ));
        }
        if end < start {
            return Err(ServiceError::InvalidArgument(
                "end_time must not be before start_time".to_string(),
            ));
        }

        self.within(
            RANGE_QUERY_TIMEOUT,
            self.client.query_range(&params.query, start, end, step),
        )
        .await
    }

    async fn targets(&self) -> ServiceResult<serde_json::Value> {
        let targets = self.within(QUERY_TIMEOUT, self.client.targets()).await?;
        Ok(json!({
            "active_count": targets.active.len(),
            "dropped_count": targets.dropped.len(),
            "active": targets.active,
            "dropped": targets.dropped,
        }))
    }

    async fn status(&self) -> ServiceResult<serde_json::Value> {
        self.test_connection().await?;
        let up = self
            .within(QUERY_TIMEOUT, self.client.query("up", Utc::now()))
            .await?;
        Ok(json!({
            "status": "connected",
            "message": "Prometheus server is reachable",
            "up_result": up,
        }))
    }

    async fn common_metrics(&self, call: &ToolCall) -> ServiceResult<QueryValue> {
        let params: CommonMetricsParams = call.arguments()?;
        let query = common_metric_query(&params.metric_type).ok_or_else(|| {
            ServiceError::InvalidArgument(format!(
                "unsupported metric_type '{}' (expected cpu, memory, disk, network or up)",
                params.metric_type
            ))
        })?;
        self.within(QUERY_TIMEOUT, self.client.query(query, Utc::now()))
            .await
    }

    async fn list_metrics(&self) -> ServiceResult<serde_json::Value> {
        let names = self
            .within(LIST_METRICS_TIMEOUT, self.client.metric_names())
            .await?;
        Ok(json!({
            "count": names.len(),
            "metrics": names,
        }))
    }
}

fn parse_time(field: &str, value: &str) -> ServiceResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ServiceError::InvalidArgument(format!("{} '{}': {}", field, value, e)))
}

#[async_trait]
impl Service for PrometheusService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Prometheus
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn description(&self) -> &str {
        "Query Prometheus monitoring data"
    }

    fn tools(&self) -> Vec<ToolInfo> {
        TOOLS
            .iter()
            .map(|(name, description)| ToolInfo::new(*name, *description))
            .collect()
    }

    async fn handle(&self, call: ToolCall) -> ToolResult {
        debug!(tool = %call.tool, "Handling Prometheus tool call");
        match call.tool.as_str() {
            TOOL_QUERY => ToolResult::from_result(self.query(&call).await, "Query failed"),
            TOOL_QUERY_RANGE => {
                ToolResult::from_result(self.query_range(&call).await, "Range query failed")
            }
            TOOL_TARGETS => {
                ToolResult::from_result(self.targets().await, "Failed to get targets")
            }
            TOOL_STATUS => ToolResult::from_result(self.status().await, "Status check failed"),
            TOOL_COMMON_METRICS => {
                ToolResult::from_result(self.common_metrics(&call).await, "Query failed")
            }
            TOOL_LIST_METRICS => ToolResult::from_result(
                self.list_metrics().await,
                "Failed to get metric names",
            ),
            other => ToolResult::error(format!("Unknown tool: {}", other)),
        }
    }

    async fn test_connection(&self) -> ServiceResult<()> {
        self.client
            .test_connection()
            .await
            .map_err(|e| ServiceError::Connection {
                kind: ServiceKind::Prometheus,
                endpoint: self.client.base_url().to_string(),
                message: e.to_string(),
            })
    }

    async fn close(&self) -> ServiceResult<()> {
        debug!(endpoint = %self.endpoint, "Closing Prometheus service");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> PrometheusService {
        PrometheusService::new(
            &PrometheusConfig::new("http://127.0.0.1:9"),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config: PrometheusConfig =
            serde_json::from_value(json!({"url": "http://prom:9090"})).unwrap();
        assert!(config.enabled);
        assert!(config.is_enabled());
        assert_eq!(ServiceConfig::endpoint(&config), DEFAULT_ENDPOINT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let missing_url = PrometheusConfig::default();
        assert!(!missing_url.is_enabled());
        assert!(matches!(
            missing_url.validate(),
            Err(ServiceError::Config { .. })
        ));

        let disabled = PrometheusConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(disabled.validate().is_ok());

        let bad_endpoint = PrometheusConfig::new("http://prom:9090").with_endpoint("metrics");
        assert!(bad_endpoint.validate().is_err());
    }

    #[test]
    fn test_factory_rejects_unparseable_url() {
        let err = create_service(&PrometheusConfig::new("not a url"), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ServiceError::Creation {
                kind: ServiceKind::Prometheus,
                ..
            }
        ));
    }

    #[test]
    fn test_common_metric_queries() {
        for metric in ["cpu", "memory", "disk", "network", "up"] {
            assert!(common_metric_query(metric).is_some());
        }
        assert_eq!(common_metric_query("up"), Some("up"));
        assert!(common_metric_query("gpu").is_none());
    }

    #[test]
    fn test_tool_listing() {
        let names: Vec<String> = service().tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 6);
        assert!(names.contains(&TOOL_LIST_METRICS.to_string()));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_envelope() {
        let result = service()
            .handle(ToolCall::new("prometheus_delete", json!({})))
            .await;
        assert_eq!(result.message(), Some("Unknown tool: prometheus_delete"));
    }

    #[tokio::test]
    async fn test_range_query_argument_validation() {
        let svc = service();

        let bad_time = svc
            .handle(ToolCall::new(
                TOOL_QUERY_RANGE,
                json!({"query": "up", "start_time": "yesterday", "end_time": "2024-01-01T00:00:00Z", "step": "1m"}),
            ))
            .await;
        assert!(bad_time.message().unwrap().contains("start_time"));

        let bad_step = svc
            .handle(ToolCall::new(
                TOOL_QUERY_RANGE,
                json!({"query": "up", "start_time": "2024-01-01T00:00:00Z", "end_time": "2024-01-01T01:00:00Z", "step": "often"}),
            ))
            .await;
        assert!(!bad_step.is_success());

        let reversed = svc
            .handle(ToolCall::new(
                TOOL_QUERY_RANGE,
                json!({"query": "up", "start_time": "2024-01-02T00:00:00Z", "end_time": "2024-01-01T00:00:00Z", "step": "1m"}),
            ))
            .await;
        assert!(reversed.message().unwrap().contains("end_time"));
    }

    #[tokio::test]
    async fn test_unsupported_metric_type() {
        let result = service()
            .handle(ToolCall::new(TOOL_COMMON_METRICS, json!({"metric_type": "gpu"})))
            .await;
        assert!(result.message().unwrap().contains("unsupported metric_type"));
    }
}
