//! Tool execution boundary
//!
//! The gateway never knows what a tool does. It lists descriptors and forwards
//! `tools/call` invocations to a [`ToolExecutor`], receiving an opaque,
//! already-rendered [`ToolOutput`] in return.

pub mod builtin;

use async_trait::async_trait;
use rust_mcp_sdk::schema::Tool;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
    #[error("failed to serialize tool result: {0}")]
    Serialization(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Pre-serialized tool result, carried to the client as a single text block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput(String);

impl ToolOutput {
    /// Renders `value` as pretty-printed JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ToolError> {
        serde_json::to_string_pretty(value)
            .map(Self)
            .map_err(|err| ToolError::Serialization(err.to_string()))
    }

    pub fn as_text(&self) -> &str {
        &self.0
    }

    pub fn into_text(self) -> String {
        self.0
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn list_tools(&self) -> Vec<Tool>;

    async fn execute(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn output_is_pretty_printed_json() {
        let output = ToolOutput::json(&json!({"id": 7, "tags": ["a"]})).expect("render");
        assert_eq!(
            output.as_text(),
            "{\n  \"id\": 7,\n  \"tags\": [\n    \"a\"\n  ]\n}"
        );
    }

    #[test]
    fn failure_message_is_displayed_verbatim() {
        assert_eq!(ToolError::failed("no such tool").to_string(), "no such tool");
        assert_eq!(
            ToolError::UnknownTool("crm_search".into()).to_string(),
            "Unknown tool: crm_search"
        );
    }
}
