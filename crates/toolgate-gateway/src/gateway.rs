//! Multiplexing gateway
//!
//! One HTTP listener serves every mounted adapter. Each adapter owns one
//! endpoint path; requests are matched against the live routing table on
//! every call, and `/` renders the status page.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use toolgate_core::{Service, ServiceKind, ToolInfo};
use tower::ServiceExt;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::addresses::host_addresses;
use crate::error::{GatewayError, GatewayResult};
use crate::handlers::{dispatch, status_page, AppState};
use crate::routing::RoutingTable;
use crate::status::StatusPage;

/// Time allowed for a client to send complete request headers. Also bounds
/// how long an idle keep-alive connection is held open.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on handling a single request, response included
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum buffered request head size
pub const MAX_HEADER_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Drain,
    Abort,
}

/// Listener lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started yet
    Idle,
    Serving,
    /// Accept loop closed, waiting for in-flight connections
    Draining,
    /// All connections finished
    Stopped,
    /// Drain deadline expired and remaining connections were dropped
    Aborted,
}

/// Summary of one mounted adapter
#[derive(Debug, Clone)]
pub struct MountedService {
    pub endpoint: String,
    pub kind: ServiceKind,
    pub description: String,
    pub tools: Vec<ToolInfo>,
}

/// HTTP front for all mounted adapters
pub struct Gateway {
    port: u16,
    routes: RoutingTable,
    addresses: Arc<Vec<String>>,
    status: Arc<StatusPage>,
    control: watch::Sender<Control>,
    phase: watch::Sender<Phase>,
}

impl Gateway {
    /// Create a gateway for `port` with the host's reachable addresses
    pub fn new(port: u16) -> GatewayResult<Self> {
        Self::with_addresses(port, host_addresses())
    }

    /// Create a gateway advertising the given addresses on its status page
    pub fn with_addresses(port: u16, addresses: Vec<String>) -> GatewayResult<Self> {
        let (control, _) = watch::channel(Control::Run);
        let (phase, _) = watch::channel(Phase::Idle);
        Ok(Self {
            port,
            routes: RoutingTable::new(),
            addresses: Arc::new(addresses),
            status: Arc::new(StatusPage::new()?),
            control,
            phase,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Shared handle to the live routing table
    pub fn routes(&self) -> RoutingTable {
        self.routes.clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    // =========================================================================
    // Service Management
    // =========================================================================

    /// Mount an adapter at its endpoint path. A previously mounted adapter at
    /// the same path is replaced without being closed.
    pub fn add_service(&self, service: Arc<dyn Service>) {
        let endpoint = service.endpoint().to_string();
        let kind = service.kind();
        if let Some(previous) = self.routes.insert(service) {
            warn!(
                %endpoint,
                %kind,
                replaced = %previous.kind(),
                "Replaced adapter already mounted at endpoint"
            );
        }
        info!(%endpoint, %kind, "Added service");
    }

    /// Unmount the adapter at `path`, closing it. Close errors are logged.
    pub async fn remove_service(&self, path: &str) -> Option<Arc<dyn Service>> {
        let service = self.routes.remove(path)?;
        if let Err(e) = service.close().await {
            warn!(endpoint = %path, error = %e, "Failed to close service");
        }
        info!(endpoint = %path, "Removed service");
        Some(service)
    }

    /// Mounted adapters sorted by endpoint
    pub fn services(&self) -> Vec<MountedService> {
        self.routes
            .snapshot()
            .into_iter()
            .map(|(endpoint, service)| MountedService {
                endpoint,
                kind: service.kind(),
                description: service.description().to_string(),
                tools: service.tools(),
            })
            .collect()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.routes.snapshot().into_iter().map(|(path, _)| path).collect()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bind `0.0.0.0:<port>` and serve until shutdown
    pub async fn start(&self) -> GatewayResult<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until [`Gateway::shutdown`] drains it
    pub async fn serve(&self, listener: TcpListener) -> GatewayResult<()> {
        let mut started = false;
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Idle {
                *phase = Phase::Serving;
                started = true;
            }
            started
        });
        if !started {
            return Err(GatewayError::AlreadyServing);
        }

        let local = listener.local_addr()?;
        self.log_endpoints(local);

        let router = self.router();
        let graceful = GracefulShutdown::new();
        let mut connections = JoinSet::new();
        let mut control = self.control.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let router = router.clone();
                    let service = service_fn(move |req: hyper::Request<Incoming>| {
                        router.clone().oneshot(req)
                    });
                    let conn = http1::Builder::new()
                        .timer(TokioTimer::new())
                        .header_read_timeout(HEADER_READ_TIMEOUT)
                        .max_buf_size(MAX_HEADER_BYTES)
                        .serve_connection(TokioIo::new(stream), service);
                    let conn = graceful.watch(conn);

                    connections.spawn(async move {
                        if let Err(e) = conn.await {
                            debug!(%peer, error = %e, "Connection closed with error");
                        }
                    });
                }
                _ = stop_requested(&mut control) => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Refuse new connections before waiting for in-flight ones
        drop(listener);
        self.phase.send_replace(Phase::Draining);
        info!(in_flight = connections.len(), "Draining connections");

        let finished = tokio::select! {
            _ = graceful.shutdown() => Phase::Stopped,
            _ = abort_requested(&mut control) => {
                connections.abort_all();
                Phase::Aborted
            }
        };

        self.phase.send_replace(finished);
        info!(phase = ?finished, "Gateway stopped");
        Ok(())
    }

    /// Close every mounted adapter, then drain the listener within `timeout`.
    ///
    /// Adapter close errors are logged and do not stop the others from
    /// closing. If connections are still open at the deadline they are
    /// aborted and [`GatewayError::DrainTimeout`] is returned.
    pub async fn shutdown(&self, timeout: Duration) -> GatewayResult<()> {
        info!("Shutting down gateway");
        self.close_services().await;

        let mut phase = self.phase.subscribe();
        self.control.send_replace(Control::Drain);
        if *phase.borrow() == Phase::Idle {
            return Ok(());
        }

        let finished = async {
            phase
                .wait_for(|p| matches!(p, Phase::Stopped | Phase::Aborted))
                .await
                .map(|_| ())
        };

        match tokio::time::timeout(timeout, finished).await {
            Ok(_) => Ok(()),
            Err(_) => {
                self.control.send_replace(Control::Abort);
                error!(?timeout, "Graceful shutdown timed out, aborting connections");
                Err(GatewayError::DrainTimeout(timeout))
            }
        }
    }

    async fn close_services(&self) {
        for (endpoint, service) in self.routes.snapshot() {
            match service.close().await {
                Ok(()) => debug!(%endpoint, "Closed service"),
                Err(e) => error!(%endpoint, error = %e, "Failed to close service"),
            }
        }
    }

    fn router(&self) -> Router {
        let state = AppState {
            routes: self.routes.clone(),
            status: self.status.clone(),
            addresses: self.addresses.clone(),
            port: self.port,
        };

        Router::new()
            .route("/", get(status_page))
            .fallback(dispatch)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
    }

    fn log_endpoints(&self, local: SocketAddr) {
        let port = local.port();
        info!(%local, "Gateway listening");
        for address in self.addresses.iter() {
            info!("Status page: http://{}:{}/", address, port);
        }
        for (endpoint, service) in self.routes.snapshot() {
            for address in self.addresses.iter() {
                info!(
                    kind = %service.kind(),
                    "Endpoint: http://{}:{}{}",
                    address,
                    port,
                    endpoint
                );
            }
        }
    }
}

async fn stop_requested(control: &mut watch::Receiver<Control>) {
    // A dropped sender also ends the accept loop
    let _ = control.wait_for(|c| *c != Control::Run).await.map(|_| ());
}

async fn abort_requested(control: &mut watch::Receiver<Control>) {
    if control.wait_for(|c| *c == Control::Abort).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use toolgate_core::{ServiceResult, ToolCall, ToolResult};

    struct EchoService {
        kind: ServiceKind,
        endpoint: String,
        label: &'static str,
        closed: AtomicUsize,
    }

    impl EchoService {
        fn new(kind: ServiceKind, endpoint: &str, label: &'static str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                endpoint: endpoint.to_string(),
                label,
                closed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Service for EchoService {
        fn kind(&self) -> ServiceKind {
            self.kind
        }

        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        fn description(&self) -> &str {
            "echo <adapter>"
        }

        fn tools(&self) -> Vec<ToolInfo> {
            vec![ToolInfo::new("echo", "Return the arguments")]
        }

        async fn handle(&self, call: ToolCall) -> ToolResult {
            if call.tool == "sleep" {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            ToolResult::success(json!({"by": self.label, "tool": call.tool, "args": call.arguments}))
        }

        async fn test_connection(&self) -> ServiceResult<()> {
            Ok(())
        }

        async fn close(&self) -> ServiceResult<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn spawn_gateway(
        gateway: Arc<Gateway>,
    ) -> (String, tokio::task::JoinHandle<GatewayResult<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move { gateway.serve(listener).await });
        (base, handle)
    }

    fn gateway() -> Arc<Gateway> {
        Arc::new(Gateway::with_addresses(8080, vec!["10.0.0.5".to_string()]).unwrap())
    }

    #[test]
    fn test_add_replace_and_list() {
        let gateway = gateway();
        gateway.add_service(EchoService::new(ServiceKind::Prometheus, "/prometheus/mcp", "a"));
        gateway.add_service(EchoService::new(ServiceKind::Superset, "/superset/mcp", "b"));
        gateway.add_service(EchoService::new(ServiceKind::Prometheus, "/prometheus/mcp", "c"));

        assert_eq!(gateway.endpoints(), vec!["/prometheus/mcp", "/superset/mcp"]);
        let services = gateway.services();
        assert_eq!(services[1].kind, ServiceKind::Superset);
        assert_eq!(services[0].tools[0].name, "echo");
    }

    #[tokio::test]
    async fn test_remove_service_closes_adapter() {
        let gateway = gateway();
        let service = EchoService::new(ServiceKind::Prometheus, "/prometheus/mcp", "a");
        gateway.add_service(service.clone());

        assert!(gateway.remove_service("/prometheus/mcp").await.is_some());
        assert!(gateway.remove_service("/prometheus/mcp").await.is_none());
        assert_eq!(service.closed.load(Ordering::SeqCst), 1);
        assert!(gateway.endpoints().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_serve() {
        let gateway = gateway();
        let service = EchoService::new(ServiceKind::Superset, "/superset/mcp", "a");
        gateway.add_service(service.clone());

        gateway.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(service.closed.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_routes_resolved_per_request() {
        let gateway = gateway();
        gateway.add_service(EchoService::new(ServiceKind::Prometheus, "/prometheus/mcp", "a"));
        let (base, handle) = spawn_gateway(gateway.clone()).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{}/prometheus/mcp", base))
            .json(&json!({"tool": "echo", "arguments": {"x": 1}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["by"], "a");
        assert_eq!(body["data"]["args"]["x"], 1);

        // Mounted after the listener started
        gateway.add_service(EchoService::new(ServiceKind::Superset, "/superset/mcp", "b"));
        let body: Value = client
            .post(format!("{}/superset/mcp", base))
            .json(&json!({"tool": "echo"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["data"]["by"], "b");

        let listing: Value = client
            .get(format!("{}/superset/mcp", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listing["service"], "superset");
        assert_eq!(listing["tools"][0]["name"], "echo");

        gateway.remove_service("/superset/mcp").await;
        let response = client
            .post(format!("{}/superset/mcp", base))
            .json(&json!({"tool": "echo"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        gateway.shutdown(Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(gateway.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_error_responses() {
        let gateway = gateway();
        gateway.add_service(EchoService::new(ServiceKind::Prometheus, "/prometheus/mcp", "a"));
        let (base, handle) = spawn_gateway(gateway.clone()).await;
        let client = reqwest::Client::new();

        let response = client.get(format!("{}/nowhere", base)).send().await.unwrap();
        assert_eq!(response.status(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "not_found");

        let response = client
            .post(format!("{}/prometheus/mcp", base))
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "error");

        let response = client
            .delete(format!("{}/prometheus/mcp", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 405);

        gateway.shutdown(Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_status_page_lists_services() {
        let gateway = gateway();
        gateway.add_service(EchoService::new(ServiceKind::Prometheus, "/prometheus/mcp", "a"));
        let (base, handle) = spawn_gateway(gateway.clone()).await;

        let response = reqwest::get(format!("{}/", base)).await.unwrap();
        assert_eq!(response.status(), 200);
        let html = response.text().await.unwrap();
        assert!(html.contains("http://10.0.0.5:8080"));
        assert!(html.contains("/prometheus/mcp"));
        assert!(html.contains("echo - Return the arguments"));
        assert!(html.contains("echo &lt;adapter&gt;"));
        assert!(html.contains("available"));

        gateway.shutdown(Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_twice_rejected() {
        let gateway = gateway();
        let (_base, handle) = spawn_gateway(gateway.clone()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(
            gateway.serve(second).await,
            Err(GatewayError::AlreadyServing)
        ));

        gateway.shutdown(Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_request() {
        let gateway = gateway();
        gateway.add_service(EchoService::new(ServiceKind::Prometheus, "/prometheus/mcp", "a"));
        let (base, handle) = spawn_gateway(gateway.clone()).await;

        let request = tokio::spawn(async move {
            reqwest::Client::new()
                .post(format!("{}/prometheus/mcp", base))
                .json(&json!({"tool": "sleep"}))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        gateway.shutdown(Duration::from_secs(5)).await.unwrap();
        let body = request.await.unwrap();
        assert_eq!(body["data"]["tool"], "sleep");
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_deadline_aborts() {
        let gateway = gateway();
        gateway.add_service(EchoService::new(ServiceKind::Prometheus, "/prometheus/mcp", "a"));
        let (base, handle) = spawn_gateway(gateway.clone()).await;

        let request = tokio::spawn(async move {
            reqwest::Client::new()
                .post(format!("{}/prometheus/mcp", base))
                .json(&json!({"tool": "sleep"}))
                .send()
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = gateway.shutdown(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(GatewayError::DrainTimeout(_))));
        handle.await.unwrap().unwrap();
        assert_eq!(gateway.phase(), Phase::Aborted);
        assert!(request.await.unwrap().is_err());
    }
}
