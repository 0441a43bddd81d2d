//! Error types for the conformance harness.
//!
//! [`HarnessError`] is the run-time taxonomy every session, fetcher and invoker
//! operation fails with. [`ScenarioError`] covers loading and validating
//! scenario files before a run starts.

use std::time::Duration;

/// Failures surfaced while talking to a tool server.
///
/// Only a failure of the `connect` step aborts a run; every other variant is
/// recorded against the step that produced it.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum HarnessError {
    /// The session could not be established (spawn failure, refused
    /// connection, broken handshake, closed channel).
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The server answered with a payload the harness cannot decode.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The server reported a failure, either as a JSON-RPC error object
    /// (`code` is set) or as a tool result flagged `isError` (`code` is `None`).
    #[error("Server error: {message}")]
    Server { code: Option<i64>, message: String },

    /// The requested tool is absent from the fetched catalog.
    #[error("Unknown tool '{name}': not advertised in the server catalog")]
    UnknownTool { name: String },
}

impl HarnessError {
    /// Build a [`HarnessError::Connection`] from anything displayable.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Build a [`HarnessError::Protocol`] from anything displayable.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Build a [`HarnessError::Timeout`] for `operation` after `limit`.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns the error category as a static string for report classification.
    ///
    /// Categories: `"connection"`, `"timeout"`, `"protocol"`, `"server"`,
    /// `"unknown_tool"`.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Timeout { .. } => "timeout",
            Self::Protocol { .. } => "protocol",
            Self::Server { .. } => "server",
            Self::UnknownTool { .. } => "unknown_tool",
        }
    }

    /// Returns `true` if this is a JSON-RPC "Invalid params" error (code -32602).
    ///
    /// Many servers answer an unregistered tool name this way.
    pub fn is_invalid_params(&self) -> bool {
        matches!(
            self,
            Self::Server {
                code: Some(-32602),
                ..
            }
        )
    }

    /// Returns `true` if this is a JSON-RPC "Method not found" error (code -32601).
    pub fn is_method_not_found(&self) -> bool {
        matches!(
            self,
            Self::Server {
                code: Some(-32601),
                ..
            }
        )
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        Self::connection(err.to_string())
    }
}

/// Errors raised while loading or validating a scenario file.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// The scenario file could not be read from disk.
    #[error("Failed to read scenario file '{path}': {source}")]
    Io {
        source: std::io::Error,
        path: String,
    },

    /// TOML syntax error or schema mismatch.
    #[error("Failed to parse scenario TOML: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },

    /// YAML syntax error or schema mismatch.
    #[error("Failed to parse scenario YAML: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    /// JSON syntax error or schema mismatch.
    #[error("Failed to parse scenario JSON: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// The scenario parsed but contains invalid values.
    #[error("Scenario validation error: {message}")]
    Validation { message: String },
}
