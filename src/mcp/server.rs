//! The central Model Context Protocol engine
//!
//! Validates one JSON-RPC call, routes it by method, and delegates `tools/*`
//! to the configured [`ToolExecutor`]. Every failure, including a panicking
//! tool, is turned into a JSON-RPC error here and never escapes to the
//! transport.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use rust_mcp_sdk::schema::{
    CallToolResult, ContentBlock, Implementation, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerCapabilitiesTools, TextContent, Tool,
};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::errors::RpcFault;
use crate::mcp::rpc::{version_fault, RpcRequest, RpcResponse, JSONRPC_VERSION};
use crate::tools::ToolExecutor;

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2025-03-26";

#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn ToolExecutor>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.executor.list_tools()
    }

    pub fn tool_count(&self) -> usize {
        self.executor.list_tools().len()
    }

    /// Dispatches an already-parsed JSON body.
    pub async fn dispatch_value(&self, payload: Value) -> RpcResponse {
        match RpcRequest::from_value(payload) {
            Ok(request) => self.dispatch(request).await,
            Err(rejected) => {
                warn!(
                    code = rejected.error_code(),
                    "rejected malformed json-rpc envelope"
                );
                rejected
            }
        }
    }

    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let RpcRequest {
            jsonrpc,
            id,
            method,
            params,
        } = request;

        if jsonrpc != JSONRPC_VERSION {
            return RpcResponse::failure(id, &version_fault());
        }

        let audit_params = redact_audit_params(params.as_ref());
        let response = match self.route(&method, params).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(fault) => RpcResponse::failure(id, &fault),
        };

        info!(
            method = %method,
            params = %audit_params,
            outcome = if response.is_success() { "success" } else { "failure" },
            "mcp action audited"
        );

        response
    }

    async fn route(&self, method: &str, params: Option<Value>) -> Result<Value, RpcFault> {
        match method {
            "initialize" => to_result(&initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => to_result(&ListToolsResult {
                meta: None,
                next_cursor: None,
                tools: self.executor.list_tools(),
            }),
            "tools/call" => self.call_tool(params).await,
            other => Err(RpcFault::MethodNotFound(other.to_string())),
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, RpcFault> {
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RpcFault::invalid_params("name is required"))?
            .to_string();
        let arguments = match params.get("arguments") {
            Some(Value::Object(arguments)) => arguments.clone(),
            None => Map::new(),
            Some(value) if is_falsy(value) => Map::new(),
            Some(_) => return Err(RpcFault::invalid_params("arguments must be an object")),
        };

        info!(tool = %name, "calling tool");
        let outcome = AssertUnwindSafe(self.executor.execute(&name, arguments))
            .catch_unwind()
            .await;

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(tool = %name, error = %err, "tool execution failed");
                return Err(RpcFault::internal(err.to_string()));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(tool = %name, panic = %message, "tool execution panicked");
                return Err(RpcFault::internal(message));
            }
        };

        to_result(&CallToolResult {
            content: vec![ContentBlock::from(TextContent::new(
                output.into_text(),
                None,
                None,
            ))],
            is_error: None,
            meta: None,
            structured_content: None,
        })
    }
}

pub fn initialize_result() -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            ..Default::default()
        },
        protocol_version: SUPPORTED_PROTOCOL_VERSION.into(),
        instructions: None,
        meta: None,
    }
}

fn to_result<T: serde::Serialize>(value: &T) -> Result<Value, RpcFault> {
    serde_json::to_value(value).map_err(|err| RpcFault::internal(err.to_string()))
}

/// `null`, `false`, `0` and `""` stand in for "no arguments".
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "Internal error".to_string()
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey" | "webhook" | "webhook_url"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
