//! toolgate-gateway - One HTTP listener for every mounted backend adapter
//!
//! The [`Gateway`] holds a path → adapter routing table that is consulted on
//! every request, so adapters can be added or removed while serving. `/`
//! renders an HTML status page listing the mounted adapters and the host
//! addresses they are reachable on.
//!
//! # Example
//!
//! ```rust,no_run
//! use toolgate_gateway::{Gateway, GatewayResult};
//!
//! # async fn run(adapter: std::sync::Arc<dyn toolgate_core::Service>) -> GatewayResult<()> {
//! let gateway = Gateway::new(8080)?;
//! gateway.add_service(adapter);
//! gateway.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod addresses;
mod error;
pub mod gateway;
mod handlers;
pub mod routing;
pub mod status;

pub use error::{ApiError, GatewayError, GatewayResult};
pub use gateway::{Gateway, MountedService, Phase};
pub use routing::RoutingTable;
pub use status::StatusPage;
