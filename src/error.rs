// bridge/src/error.rs

use thiserror::Error;

/// Result type alias used across the bridge.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// JSON-RPC error codes surfaced over the wire.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// A required tool parameter is missing or has the wrong type.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Request named a tool or method the dispatcher does not know.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// A blocking tool was dispatched without a deferred response context.
    #[error("{tool} must run in a deferred dispatch context")]
    BlockingContext { tool: &'static str },

    /// Buffer/window creation or configuration failed mid-setup. Partial
    /// session state has already been cleaned up when this surfaces.
    #[error("Diff setup failed: {0}")]
    Setup(String),

    /// No writable scratch location could be found, or the scratch file
    /// could not be created.
    #[error("Scratch workspace error: {0}")]
    Scratch(String),

    /// Editor surface operation failed.
    #[error("Editor error: {0}")]
    Editor(String),

    /// Session bookkeeping failed in a way the caller can't recover.
    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup(message.into())
    }

    pub fn scratch(message: impl Into<String>) -> Self {
        Self::Scratch(message.into())
    }

    pub fn editor(message: impl Into<String>) -> Self {
        Self::Editor(message.into())
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session(message.into())
    }

    /// Wire-level error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::BlockingContext { .. }
            | Self::Setup(_)
            | Self::Scratch(_)
            | Self::Editor(_)
            | Self::Session(_)
            | Self::Io(_)
            | Self::Json(_) => INTERNAL_ERROR,
        }
    }

    /// Short wire message; the full rendering goes into the data field.
    pub fn wire_message(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => "Invalid params",
            Self::MethodNotFound(_) => "Method not found",
            _ => "Internal error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_jsonrpc() {
        assert_eq!(BridgeError::invalid_params("x").code(), INVALID_PARAMS);
        assert_eq!(
            BridgeError::MethodNotFound("nope".into()).code(),
            METHOD_NOT_FOUND
        );
        assert_eq!(
            BridgeError::BlockingContext { tool: "openDiff" }.code(),
            INTERNAL_ERROR
        );
        assert_eq!(BridgeError::setup("boom").code(), INTERNAL_ERROR);
    }

    #[test]
    fn blocking_context_names_the_tool() {
        let e = BridgeError::BlockingContext { tool: "openDiff" };
        assert_eq!(
            e.to_string(),
            "openDiff must run in a deferred dispatch context"
        );
    }
}
