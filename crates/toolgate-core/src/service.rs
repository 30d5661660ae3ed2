//! Service trait - the uniform capability set every backend adapter exposes

use std::any::Any;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};
use crate::tool::{ToolCall, ToolInfo, ToolResult};

/// Backend kinds the gateway knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Metrics query backend (Prometheus HTTP API)
    Prometheus,
    /// SQL query backend (Superset SQL Lab)
    Superset,
}

impl ServiceKind {
    /// Stable lowercase identifier used in logs, config and URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Prometheus => "prometheus",
            ServiceKind::Superset => "superset",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prometheus" => Ok(ServiceKind::Prometheus),
            "superset" => Ok(ServiceKind::Superset),
            other => Err(ServiceError::config(
                "kind",
                format!("unknown service kind '{}'", other),
            )),
        }
    }
}

/// Configuration for one adapter instance.
///
/// The registry only needs [`ServiceConfig::kind`] to pick a factory; the
/// factory downcasts through [`ServiceConfig::as_any`] to read its own fields.
pub trait ServiceConfig: Send + Sync + fmt::Debug {
    /// Which factory builds this configuration
    fn kind(&self) -> ServiceKind;

    /// HTTP path the adapter is mounted at
    fn endpoint(&self) -> &str;

    /// Enabled flag set and a base URL present
    fn is_enabled(&self) -> bool;

    /// Check required fields
    fn validate(&self) -> ServiceResult<()>;

    /// Access to the concrete configuration type
    fn as_any(&self) -> &dyn Any;
}

/// A backend adapter mounted by the gateway.
///
/// Identity (`kind`, `endpoint`) is fixed at construction. Tool handlers
/// never fail at the transport level: every call returns an envelope.
#[async_trait]
pub trait Service: Send + Sync {
    /// Backend kind
    fn kind(&self) -> ServiceKind;

    /// Mount path, stable for the lifetime of the adapter
    fn endpoint(&self) -> &str;

    /// Human-readable description for the status page
    fn description(&self) -> &str;

    /// Named operations this adapter serves
    fn tools(&self) -> Vec<ToolInfo>;

    /// Dispatch one tool call
    async fn handle(&self, call: ToolCall) -> ToolResult;

    /// Probe the backend
    async fn test_connection(&self) -> ServiceResult<()>;

    /// Release backend resources
    async fn close(&self) -> ServiceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [ServiceKind::Prometheus, ServiceKind::Superset] {
            assert_eq!(kind.as_str().parse::<ServiceKind>().unwrap(), kind);
        }
        assert!("mysql".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn test_kind_serde_lowercase() {
        let json = serde_json::to_string(&ServiceKind::Prometheus).unwrap();
        assert_eq!(json, "\"prometheus\"");
    }
}
