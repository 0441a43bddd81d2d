//! JSON-RPC 2.0 envelopes exchanged with a tool server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarnessError;

/// Protocol revision requested in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// `None` makes this a notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id: Some(Value::from(id)),
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Unwrap the result, turning an error object into [`HarnessError::Server`].
    pub fn into_result(self) -> Result<Value, HarnessError> {
        if let Some(error) = self.error {
            return Err(HarnessError::Server {
                code: Some(error.code),
                message: error.message,
            });
        }
        self.result
            .ok_or_else(|| HarnessError::protocol("Response carries neither result nor error"))
    }
}

/// Classification of one inbound message.
#[derive(Debug)]
pub enum Incoming {
    /// Reply to a request we sent.
    Response(JsonRpcResponse),
    /// Server-initiated request that expects a reply.
    Request { id: Value, method: String },
    /// Server notification, no reply expected.
    Notification { method: String },
}

impl Incoming {
    /// Parse one framed message.
    pub fn parse(text: &str) -> Result<Self, HarnessError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| HarnessError::protocol(format!("Invalid JSON from server: {e}")))?;

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            return Ok(match value.get("id") {
                Some(id) if !id.is_null() => Self::Request {
                    id: id.clone(),
                    method,
                },
                _ => Self::Notification { method },
            });
        }

        if value.get("result").is_some() || value.get("error").is_some() {
            let response: JsonRpcResponse = serde_json::from_value(value)
                .map_err(|e| HarnessError::protocol(format!("Invalid JSON-RPC response: {e}")))?;
            return Ok(Self::Response(response));
        }

        Err(HarnessError::protocol(format!(
            "Unrecognised JSON-RPC message: {text}"
        )))
    }
}

/// Whether a response id matches the numeric id we issued.
///
/// Some servers echo ids back as strings.
pub fn id_matches(id: &Value, expected: u64) -> bool {
    match id {
        Value::Number(n) => n.as_u64() == Some(expected),
        Value::String(s) => s.parse::<u64>().ok() == Some(expected),
        _ => false,
    }
}
