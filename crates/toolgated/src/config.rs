//! YAML configuration for toolgated

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use toolgate_core::ServiceConfig;
use toolgate_services::{PrometheusConfig, SupersetConfig};

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Per-request timeout handed to every adapter
    #[serde(
        default = "default_timeout",
        deserialize_with = "toolgate_core::duration::deserialize"
    )]
    pub timeout: Duration,

    #[serde(default)]
    pub prometheus: Option<PrometheusConfig>,

    #[serde(default)]
    pub superset: Option<SupersetConfig>,
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            timeout: DEFAULT_TIMEOUT,
            prometheus: None,
            superset: None,
        }
    }
}

/// One invalid configuration field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Load and parse a YAML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Every problem in the configuration, not just the first
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.timeout.is_zero() {
            errors.push(ValidationError::new("timeout", "must be greater than zero"));
        }

        if let Some(prometheus) = self.prometheus.as_ref().filter(|p| p.enabled) {
            if prometheus.url.is_empty() {
                errors.push(ValidationError::new(
                    "prometheus.url",
                    "required when prometheus is enabled",
                ));
            }
            if !prometheus.endpoint().starts_with('/') {
                errors.push(ValidationError::new(
                    "prometheus.endpoint",
                    "must start with '/'",
                ));
            }
        }

        if let Some(superset) = self.superset.as_ref().filter(|s| s.enabled) {
            for (field, value) in [
                ("superset.url", &superset.url),
                ("superset.user", &superset.user),
                ("superset.pass", &superset.pass),
            ] {
                if value.is_empty() {
                    errors.push(ValidationError::new(
                        field,
                        "required when superset is enabled",
                    ));
                }
            }
            if !superset.endpoint().starts_with('/') {
                errors.push(ValidationError::new(
                    "superset.endpoint",
                    "must start with '/'",
                ));
            }
        }

        errors
    }

    /// Sections that are present, enabled, have a URL and pass validation
    pub fn enabled_services(&self) -> Vec<Arc<dyn ServiceConfig>> {
        let mut services: Vec<Arc<dyn ServiceConfig>> = Vec::new();
        if let Some(prometheus) = &self.prometheus {
            services.push(Arc::new(prometheus.clone()));
        }
        if let Some(superset) = &self.superset {
            services.push(Arc::new(superset.clone()));
        }
        services.retain(|s| s.is_enabled() && s.validate().is_ok());
        services
    }
}
