//! Superset adapter - SQL Lab execution exposed as tools

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use toolgate_client::{ClientError, SqlResult, SupersetClient};
use toolgate_core::{
    Service, ServiceConfig, ServiceError, ServiceKind, ServiceResult, ToolCall, ToolInfo,
    ToolResult,
};
use tracing::{debug, info};

/// Mount path used when the configuration leaves `endpoint` empty
pub const DEFAULT_ENDPOINT: &str = "/superset/mcp";

pub const TOOL_LIST_DATABASES: &str = "superset_list_databases";
pub const TOOL_EXECUTE_SQL: &str = "superset_execute_sql";
pub const TOOL_EXECUTE_SQL_WITH_SCHEMA: &str = "superset_execute_sql_with_schema";
pub const TOOL_STATUS: &str = "superset_status";

const TOOLS: [(&str, &str); 4] = [
    (TOOL_LIST_DATABASES, "List configured databases"),
    (TOOL_EXECUTE_SQL, "Execute a SQL query"),
    (TOOL_EXECUTE_SQL_WITH_SCHEMA, "Execute a SQL query in a given schema"),
    (TOOL_STATUS, "Check Superset connectivity and login"),
];

// =============================================================================
// Configuration
// =============================================================================

/// `superset` section of the configuration file
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupersetConfig {
    pub enabled: bool,
    pub url: String,
    pub user: String,
    pub pass: String,
    pub endpoint: String,
}

impl fmt::Debug for SupersetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupersetConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Default for SupersetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: String::new(),
            user: String::new(),
            pass: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl SupersetConfig {
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            pass: pass.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl ServiceConfig for SupersetConfig {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Superset
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
        if !self.enabled {
            return Ok(());
        }
        if self.url.is_empty() {
            return Err(ServiceError::config(
                "superset.url",
                "required when superset is enabled",
            ));
        }
        if self.user.is_empty() {
            return Err(ServiceError::config(
                "superset.user",
                "required when superset is enabled",
            ));
        }
        if self.pass.is_empty() {
            return Err(ServiceError::config(
                "superset.pass",
                "required when superset is enabled",
            ));
        }
        if !self.endpoint().starts_with('/') {
            return Err(ServiceError::config("superset.endpoint", "must start with '/'"));
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
struct ExecuteSqlParams {
    sql: String,
    #[serde(deserialize_with = "database_id")]
    database_id: i64,
    #[serde(default)]
    schema: Option<String>,
}

/// Database ids arrive as numeric strings; plain numbers are accepted too
fn database_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(id) => Ok(id),
        Raw::Text(text) => text.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!("database_id must be numeric, got '{}'", text))
        }),
    }
}

// =============================================================================
// Service
// =============================================================================

/// Adapter exposing Superset SQL Lab as a set of tools
pub struct SupersetService {
    client: SupersetClient,
    endpoint: String,
    request_timeout: Duration,
}

/// Factory registered for [`ServiceKind::Superset`]
pub fn create_service(
    config: &dyn ServiceConfig,
    timeout: Duration,
) -> ServiceResult<Arc<dyn Service>> {
    let config = config
        .as_any()
        .downcast_ref::<SupersetConfig>()
        .ok_or_else(|| ServiceError::config("superset", "expected a Superset configuration"))?;
    config.validate()?;

    let service = SupersetService::new(config, timeout)
        .map_err(|e| ServiceError::creation(ServiceKind::Superset, e))?;
    info!(url = %config.url, endpoint = %service.endpoint, "Created Superset service");
    Ok(Arc::new(service))
}

impl SupersetService {
    pub fn new(config: &SupersetConfig, timeout: Duration) -> Result<Self, ClientError> {
        let client = SupersetClient::new(&config.url, &config.user, &config.pass, timeout)?;
        Ok(Self::with_client(config, client, timeout))
    }

    /// Build around an already configured client
    pub fn with_client(config: &SupersetConfig, client: SupersetClient, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: ServiceConfig::endpoint(config).to_string(),
            request_timeout: timeout,
        }
    }

    /// Bound a whole tool call, login and token refresh included
    async fn within<T, F>(&self, fut: F) -> ServiceResult<T>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| ServiceError::Timeout)?
            .map_err(ServiceError::from)
    }

    async fn list_databases(&self) -> ServiceResult<serde_json::Value> {
        let databases = self.within(self.client.get_databases()).await?;
        Ok(json!({
            "count": databases.len(),
            "databases": databases,
        }))
    }

    async fn execute_sql(&self, call: &ToolCall, with_schema: bool) -> ServiceResult<SqlResult> {
        let params: ExecuteSqlParams = call.arguments()?;
        if params.sql.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("sql must not be empty".to_string()));
        }

        if with_schema {
            let schema = params
                .schema
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ServiceError::InvalidArgument("schema is required".to_string()))?;
            self.within(self.client.execute_sql_with_schema(
                &params.sql,
                params.database_id,
                &schema,
            ))
            .await
        } else {
            self.within(self.client.execute_sql(&params.sql, params.database_id))
                .await
        }
    }

    async fn status(&self) -> ServiceResult<serde_json::Value> {
        self.test_connection().await?;
        self.within(self.client.ensure_logged_in()).await?;
        let databases = self.within(self.client.get_databases()).await?;
        Ok(json!({
            "status": "connected",
            "message": "Superset server is reachable",
            "login": "success",
            "databases": databases.len(),
            "functional": "ready",
        }))
    }
}

#[async_trait]
impl Service for SupersetService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Superset
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn description(&self) -> &str {
        "Query and manage Superset databases"
    }

    fn tools(&self) -> Vec<ToolInfo> {
        TOOLS
            .iter()
            .map(|(name, description)| ToolInfo::new(*name, *description))
            .collect()
    }

    async fn handle(&self, call: ToolCall) -> ToolResult {
        debug!(tool = %call.tool, "Handling Superset tool call");
        match call.tool.as_str() {
            TOOL_LIST_DATABASES => ToolResult::from_result(
                self.list_databases().await,
                "Failed to list databases",
            ),
            TOOL_EXECUTE_SQL => ToolResult::from_result(
                self.execute_sql(&call, false).await,
                "SQL execution failed",
            ),
            TOOL_EXECUTE_SQL_WITH_SCHEMA => ToolResult::from_result(
                self.execute_sql(&call, true).await,
                "SQL execution failed",
            ),
            TOOL_STATUS => ToolResult::from_result(self.status().await, "Status check failed"),
            other => ToolResult::error(format!("Unknown tool: {}", other)),
        }
    }

    async fn test_connection(&self) -> ServiceResult<()> {
        self.within(self.client.test_connection())
            .await
            .map_err(|e| ServiceError::Connection {
                kind: ServiceKind::Superset,
                endpoint: self.client.base_url().to_string(),
                message: e.to_string(),
            })
    }

    async fn close(&self) -> ServiceResult<()> {
        debug!(endpoint = %self.endpoint, "Closing Superset service");
        Ok(())
    }
}
