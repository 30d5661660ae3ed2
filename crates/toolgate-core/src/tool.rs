//! Tool call request and result envelope

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ServiceError, ServiceResult};

/// Named operation exposed by an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// One-line summary, `name - description`
    pub fn summary(&self) -> String {
        format!("{} - {}", self.name, self.description)
    }
}

/// Inbound tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Default::default())
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
        }
    }

    /// Decode the arguments into a typed parameter struct
    pub fn arguments<T: DeserializeOwned>(&self) -> ServiceResult<T> {
        let args = if self.arguments.is_null() {
            empty_arguments()
        } else {
            self.arguments.clone()
        };
        serde_json::from_value(args).map_err(|e| {
            ServiceError::InvalidArgument(format!("{}: {}", self.tool, e))
        })
    }
}

/// Envelope returned by every tool call: a payload or a message, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResult {
    Success { data: Value },
    Error { message: String },
}

impl ToolResult {
    /// Wrap a serializable payload. A payload that fails to serialize
    /// becomes an error envelope.
    pub fn success<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => ToolResult::Success { data },
            Err(e) => ToolResult::error(format!("Failed to encode result: {}", e)),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolResult::Error {
            message: message.into(),
        }
    }

    /// Convert a handler outcome, prefixing failures with `context`
    pub fn from_result<T: Serialize>(result: ServiceResult<T>, context: &str) -> Self {
        match result {
            Ok(data) => ToolResult::success(data),
            Err(e) => ToolResult::error(format!("{}: {}", context, e)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    /// Payload of a success envelope
    pub fn data(&self) -> Option<&Value> {
        match self {
            ToolResult::Success { data } => Some(data),
            ToolResult::Error { .. } => None,
        }
    }

    /// Message of an error envelope
    pub fn message(&self) -> Option<&str> {
        match self {
            ToolResult::Success { .. } => None,
            ToolResult::Error { message } => Some(message),
        }
    }
}
