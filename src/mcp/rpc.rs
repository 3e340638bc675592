//! JSON-RPC envelope types
//!
//! Requests are decoded leniently enough that a usable `id` can be echoed back
//! even when the rest of the envelope is rejected.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Number, Value};

use crate::errors::RpcFault;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(Number),
    String(String),
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: Option<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Decodes a parsed body into a request.
    ///
    /// On rejection the returned response already carries the best `id` that
    /// could be recovered from the payload.
    pub fn from_value(payload: Value) -> Result<Self, RpcResponse> {
        if !payload.is_object() {
            return Err(RpcResponse::failure(
                None,
                &RpcFault::invalid_request("request must be a JSON object"),
            ));
        }

        let id = recover_id(&payload);
        if payload.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(RpcResponse::failure(id, &version_fault()));
        }

        serde_json::from_value(payload)
            .map_err(|err| RpcResponse::failure(id, &RpcFault::invalid_request(err.to_string())))
    }
}

pub(crate) fn version_fault() -> RpcFault {
    RpcFault::invalid_request(format!("jsonrpc must be \"{JSONRPC_VERSION}\""))
}

fn recover_id(payload: &Value) -> Option<RequestId> {
    payload
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<Option<RequestId>>(id).ok())
        .flatten()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Success {
        id: Option<RequestId>,
        result: Value,
    },
    Failure {
        id: Option<RequestId>,
        error: RpcErrorObject,
    },
}

impl RpcResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self::Success { id, result }
    }

    pub fn failure(id: Option<RequestId>, fault: &RpcFault) -> Self {
        Self::Failure {
            id,
            error: RpcErrorObject {
                code: fault.code(),
                message: fault.to_string(),
            },
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Success { id, .. } | Self::Failure { id, .. } => id.as_ref(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error_code(&self) -> Option<i32> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error.code),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RpcErrorObject>,
}

impl Serialize for RpcResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = match self {
            Self::Success { id, result } => Envelope {
                jsonrpc: JSONRPC_VERSION,
                id: id.as_ref(),
                result: Some(result),
                error: None,
            },
            Self::Failure { id, error } => Envelope {
                jsonrpc: JSONRPC_VERSION,
                id: id.as_ref(),
                result: None,
                error: Some(error),
            },
        };
        envelope.serialize(serializer)
    }
}

/// Server-initiated message pushed over standing streams.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}
