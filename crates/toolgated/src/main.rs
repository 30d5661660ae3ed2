//! toolgated - toolgate daemon
//!
//! Mounts the configured Prometheus and Superset adapters on one HTTP
//! listener and serves until SIGINT/SIGTERM.
//!
//! Usage:
//!   toolgated [--config <path>] [--port <port>]

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::task::JoinSet;
use toolgate_core::{Service, ServiceConfig, ServiceRegistry};
use toolgate_gateway::Gateway;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Upper bound for each adapter's startup connectivity test
const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for draining in-flight requests on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "toolgated")]
#[command(author, version, about = "Prometheus and Superset tool gateway")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "TOOLGATE_CONFIG", default_value = "config/config.yaml")]
    config: PathBuf,

    /// Listen port, overrides `http_port` from the config file
    #[arg(short, long, env = "TOOLGATE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "toolgated=info,toolgate_gateway=info,toolgate_services=info,toolgate_client=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }

    for problem in config.validate() {
        warn!(field = %problem.field, "Invalid configuration: {}", problem.message);
    }

    let enabled = config.enabled_services();
    info!(
        config = %args.config.display(),
        port = config.http_port,
        timeout = ?config.timeout,
        services = ?enabled.iter().map(|s| s.kind().as_str()).collect::<Vec<_>>(),
        "Starting toolgated"
    );

    let registry = Arc::new(ServiceRegistry::new());
    toolgate_services::register_builtin(&registry);

    let services = create_services(registry, enabled, config.timeout).await;
    if services.is_empty() {
        bail!("No services could be created, refusing to start");
    }

    let gateway = Arc::new(
        Gateway::new(config.http_port).context("Failed to initialise gateway")?,
    );
    for service in services {
        gateway.add_service(service);
    }

    let mut server = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.start().await }
    });

    tokio::select! {
        result = &mut server => {
            // Listener ended without a shutdown request
            gateway.shutdown(SHUTDOWN_TIMEOUT).await?;
            result.context("Gateway task panicked")??;
            return Ok(());
        }
        result = wait_for_signal() => {
            result.context("Failed to install signal handlers")?;
        }
    }

    info!("Shutdown signal received");
    if let Err(e) = gateway.shutdown(SHUTDOWN_TIMEOUT).await {
        error!(error = %e, "Gateway shutdown incomplete");
    }
    match server.await {
        Ok(Ok(())) => info!("toolgated stopped"),
        Ok(Err(e)) => error!(error = %e, "Gateway exited with error"),
        Err(e) => error!(error = %e, "Gateway task failed"),
    }

    Ok(())
}

/// Build every enabled adapter concurrently. Adapters that fail to build are
/// logged and skipped; a failed connectivity test only warns.
async fn create_services(
    registry: Arc<ServiceRegistry>,
    configs: Vec<Arc<dyn ServiceConfig>>,
    timeout: Duration,
) -> Vec<Arc<dyn Service>> {
    let mut tasks = JoinSet::new();

    for config in configs {
        let registry = registry.clone();
        tasks.spawn(async move {
            let kind = config.kind();
            let service = registry.create(config.as_ref(), timeout)?;

            match tokio::time::timeout(CONNECTION_TEST_TIMEOUT, service.test_connection()).await
            {
                Ok(Ok(())) => info!(%kind, "Connection test passed"),
                Ok(Err(e)) => warn!(%kind, error = %e, "Connection test failed"),
                Err(_) => warn!(%kind, "Connection test timed out"),
            }
            Ok::<_, toolgate_core::ServiceError>(service)
        });
    }

    let mut services = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(service)) => {
                info!(kind = %service.kind(), endpoint = %service.endpoint(), "Service created");
                services.push(service);
            }
            Ok(Err(e)) => warn!(error = %e, "Failed to create service"),
            Err(e) => error!(error = %e, "Service creation task failed"),
        }
    }
    services
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_core::ServiceKind;
    use toolgate_services::{PrometheusConfig, SupersetConfig};

    // Nothing listens on the discard port
    const UNREACHABLE: &str = "http://127.0.0.1:9";

    fn configs() -> Vec<Arc<dyn ServiceConfig>> {
        vec![
            Arc::new(PrometheusConfig::new(UNREACHABLE)),
            Arc::new(SupersetConfig::new(UNREACHABLE, "admin", "admin")),
        ]
    }

    #[tokio::test]
    async fn test_failed_connection_test_still_mounts() {
        let registry = Arc::new(ServiceRegistry::new());
        toolgate_services::register_builtin(&registry);

        let services = create_services(registry, configs(), Duration::from_secs(1)).await;

        let mut kinds: Vec<ServiceKind> = services.iter().map(|s| s.kind()).collect();
        kinds.sort();
        assert_eq!(kinds, vec![ServiceKind::Prometheus, ServiceKind::Superset]);
    }

    #[tokio::test]
    async fn test_creation_failure_skips_only_that_adapter() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(ServiceKind::Prometheus, toolgate_services::prometheus::create_service);

        let services = create_services(registry, configs(), Duration::from_secs(1)).await;

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].kind(), ServiceKind::Prometheus);
        assert_eq!(services[0].endpoint(), "/prometheus/mcp");
    }
}
