//! Tools bundled with the gateway binary
//!
//! Provides `echo` and `server_time` so the server is usable without an
//! external backend wired in.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rust_mcp_sdk::{macros, schema::Tool};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{ToolError, ToolExecutor, ToolOutput};

#[macros::mcp_tool(name = "echo", description = "Return the supplied message unchanged")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct EchoTool {
    pub message: String,
}

#[macros::mcp_tool(
    name = "server_time",
    description = "Report the current server time in UTC"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ServerTimeTool {
    pub millis: Option<bool>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTools;

impl BuiltinTools {
    pub fn new() -> Self {
        Self
    }
}

fn parse_arguments<T: for<'de> Deserialize<'de>>(
    tool: &str,
    arguments: Map<String, Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|err| ToolError::InvalidArguments(format!("invalid arguments for {tool}: {err}")))
}

#[async_trait]
impl ToolExecutor for BuiltinTools {
    fn list_tools(&self) -> Vec<Tool> {
        vec![EchoTool::tool(), ServerTimeTool::tool()]
    }

    async fn execute(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        match name {
            "echo" => {
                let args: EchoTool = parse_arguments(name, arguments)?;
                ToolOutput::json(&json!({ "message": args.message }))
            }
            "server_time" => {
                let args: ServerTimeTool = parse_arguments(name, arguments)?;
                let precision = if args.millis.unwrap_or(false) {
                    SecondsFormat::Millis
                } else {
                    SecondsFormat::Secs
                };
                let now = Utc::now();
                ToolOutput::json(&json!({
                    "utc": now.to_rfc3339_opts(precision, true),
                    "unix_seconds": now.timestamp(),
                }))
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_bundled_tools() {
        let names = BuiltinTools::new()
            .list_tools()
            .into_iter()
            .map(|tool| tool.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["echo", "server_time"]);
    }

    #[tokio::test]
    async fn echo_returns_message() {
        let mut arguments = Map::new();
        arguments.insert("message".to_string(), json!("hello"));

        let output = BuiltinTools::new()
            .execute("echo", arguments)
            .await
            .expect("echo succeeds");
        let value: Value = serde_json::from_str(output.as_text()).expect("json output");
        assert_eq!(value["message"], "hello");
    }

    #[tokio::test]
    async fn echo_rejects_missing_message() {
        let error = BuiltinTools::new()
            .execute("echo", Map::new())
            .await
            .expect_err("missing message must fail");
        assert!(matches!(error, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn server_time_reports_utc() {
        let output = BuiltinTools::new()
            .execute("server_time", Map::new())
            .await
            .expect("server_time succeeds");
        let value: Value = serde_json::from_str(output.as_text()).expect("json output");
        assert!(value["utc"].as_str().expect("utc string").ends_with('Z'));
        assert!(value["unix_seconds"].is_i64());
    }

    #[tokio::test]
    async fn unknown_tool_fails() {
        let error = BuiltinTools::new()
            .execute("crm_search", Map::new())
            .await
            .expect_err("unknown tool must fail");
        assert_eq!(error.to_string(), "Unknown tool: crm_search");
    }
}
