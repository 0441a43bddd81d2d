//! Transports carrying JSON-RPC between the harness and a tool server.
//!
//! Every transport implements [`RpcChannel`]; the MCP handshake and the tool
//! methods are layered on top by [`crate::session::McpSession`], so the same
//! protocol code runs over a child process, a TCP socket, HTTP, or an
//! in-memory pipe in tests.

mod http;
mod line;
mod process;

pub use http::HttpChannel;
pub use line::{connect_tcp, LineChannel, TcpChannel};
pub use process::{LaunchSpec, ProcessChannel};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HarnessError;

/// Request/response correlation over one bidirectional channel.
#[async_trait]
pub trait RpcChannel: Send {
    /// Send a request and wait for the response carrying the same id.
    ///
    /// A JSON-RPC error object is returned as [`HarnessError::Server`].
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, HarnessError>;

    /// Send a notification; no response is awaited.
    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), HarnessError>;

    /// Release the channel. Safe to call repeatedly and on a broken channel.
    async fn shutdown(&mut self) -> Result<(), HarnessError>;

    /// Record the protocol version agreed during the handshake.
    fn set_protocol_version(&mut self, _version: &str) {}

    /// Short transport name for logs.
    fn transport_type(&self) -> &'static str;
}
