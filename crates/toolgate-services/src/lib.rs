//! toolgate-services - Backend adapters
//!
//! Implements [`toolgate_core::Service`] for the two supported backends:
//!
//! - [`PrometheusService`]: instant/range PromQL queries, scrape targets,
//!   canned host metrics and metric-name listing
//! - [`SupersetService`]: database listing and SQL Lab execution over an
//!   authenticated session
//!
//! [`register_builtin`] installs both factories into a registry.

pub mod prometheus;
pub mod superset;

use toolgate_core::{ServiceKind, ServiceRegistry};

pub use prometheus::{PrometheusConfig, PrometheusService};
pub use superset::{SupersetConfig, SupersetService};

/// Register the factories for every adapter in this crate
pub fn register_builtin(registry: &ServiceRegistry) {
    registry.register(ServiceKind::Prometheus, prometheus::create_service);
    registry.register(ServiceKind::Superset, superset::create_service);
}
