//! Backend HTTP clients for toolgate
//!
//! - [`SupersetClient`]: session-authenticated SQL Lab client with a shared
//!   login state and a time-bounded CSRF token cache
//! - [`PrometheusClient`]: Prometheus HTTP API v1 query client
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use chrono::Utc;
//! use toolgate_client::PrometheusClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PrometheusClient::new("http://localhost:9090", Duration::from_secs(30))?;
//!     let up = client.query("up", Utc::now()).await?;
//!     println!("{:?}", up);
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module starts axum routers on an ephemeral port so mock
//! backends can be exercised over real HTTP.

mod error;
pub mod prometheus;
pub mod superset;
pub mod testing;

pub use error::{ClientError, Result};
pub use prometheus::{PrometheusClient, QueryValue, Targets};
pub use superset::{Database, SqlResult, SupersetClient};
