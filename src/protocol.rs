// bridge/src/protocol.rs
//
// JSON-RPC 2.0 message shapes for the assistant<->editor wire. The transport
// (WebSocket framing) lives in server.rs; this module is only the payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Sentinel marker opening an accepted-diff result payload.
pub const FILE_SAVED: &str = "FILE_SAVED";
/// Sentinel marker opening a rejected-diff result payload.
pub const DIFF_REJECTED: &str = "DIFF_REJECTED";

/// Request/response correlation id. The wire allows numbers and strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Num(i64),
    Str(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Server->client notification (no id, no reply expected).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl From<&BridgeError> for RpcError {
    fn from(err: &BridgeError) -> Self {
        Self {
            code: err.code(),
            message: err.wire_message().to_string(),
            data: Some(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// One typed part of a tool result. Only text parts exist today; the enum
/// keeps the wire shape `{ "type": "text", "text": ... }` extensible.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// The outbound success payload of a tool call: a list of typed content
/// parts, wrapped as `{ "content": [...] }` on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
}

impl ToolResult {
    pub fn text_parts<S: Into<String>>(parts: impl IntoIterator<Item = S>) -> Self {
        Self {
            content: parts.into_iter().map(Content::text).collect(),
        }
    }

    /// `[FILE_SAVED, <final contents>]`
    pub fn file_saved(final_contents: impl Into<String>) -> Self {
        Self::text_parts([FILE_SAVED.to_string(), final_contents.into()])
    }

    /// `[DIFF_REJECTED, <tab name>]`
    pub fn diff_rejected(tab_name: impl Into<String>) -> Self {
        Self::text_parts([DIFF_REJECTED.to_string(), tab_name.into()])
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
