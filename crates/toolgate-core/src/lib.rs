//! toolgate-core - Core traits and types for toolgate backend adapters
//!
//! This crate provides the abstractions that let different backends
//! (metrics query, SQL query, ...) be mounted behind one gateway without
//! the gateway knowing their concrete type.
//!
//! - [`Service`]: the uniform adapter capability set
//! - [`ServiceConfig`]: configuration that selects and builds an adapter
//! - [`ServiceRegistry`]: maps a [`ServiceKind`] to the factory that builds it
//! - [`ToolCall`] / [`ToolResult`]: the request and envelope of a tool invocation

pub mod duration;
pub mod error;
pub mod registry;
pub mod service;
pub mod tool;

pub use error::{ServiceError, ServiceResult};
pub use registry::{ServiceFactory, ServiceRegistry};
pub use service::{Service, ServiceConfig, ServiceKind};
pub use tool::{ToolCall, ToolInfo, ToolResult};
