//! Sessions with a tool server and the strategies for obtaining them.
//!
//! The runner only sees the [`Session`] capability trait. [`McpSession`]
//! implements it on top of any [`RpcChannel`]; [`DefaultSessionProvider`]
//! turns a [`ConnectionStrategy`] into a connected, handshaken session.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::HarnessError;
use crate::jsonrpc::PROTOCOL_VERSION;
use crate::transport::{connect_tcp, HttpChannel, LaunchSpec, ProcessChannel, RpcChannel};
use crate::types::{ServerInfo, ToolCallRequest, ToolCallResponse, ToolDescriptor};

/// Name announced in `clientInfo` during the handshake.
pub const CLIENT_NAME: &str = "mcp-conformance";

/// Upper bound on `tools/list` pages followed before giving up.
const MAX_CATALOG_PAGES: usize = 100;

/// An established, handshaken channel to a tool server.
///
/// Owned by exactly one run; never shared.
#[async_trait]
pub trait Session: Send {
    /// Identity reported by the server during the handshake.
    fn server_info(&self) -> Option<&ServerInfo>;

    /// Fetch the full tool catalog in server order.
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, HarnessError>;

    /// Invoke a tool and decode its response.
    async fn call_tool(
        &mut self,
        request: &ToolCallRequest,
    ) -> Result<ToolCallResponse, HarnessError>;

    /// Release the session. Idempotent, and safe on a broken channel.
    async fn close(&mut self) -> Result<(), HarnessError>;
}

/// MCP client session over any JSON-RPC channel.
#[derive(Debug)]
pub struct McpSession<C> {
    channel: C,
    server: ServerInfo,
    closed: bool,
}

impl<C: RpcChannel> McpSession<C> {
    /// Run the `initialize` handshake on `channel`.
    ///
    /// On failure the channel is shut down before the error is returned.
    pub async fn handshake(mut channel: C) -> Result<Self, HarnessError> {
        match Self::initialize(&mut channel).await {
            Ok(server) => {
                info!(
                    target: "mcp.conformance",
                    transport = channel.transport_type(),
                    server = %server.name,
                    version = %server.version,
                    protocol = %server.protocol_version,
                    "Session established"
                );
                Ok(Self {
                    channel,
                    server,
                    closed: false,
                })
            },
            Err(err) => {
                if let Err(close_err) = channel.shutdown().await {
                    debug!(
                        target: "mcp.conformance",
                        "Shutdown after failed handshake: {close_err}"
                    );
                }
                Err(match err {
                    HarnessError::Connection { .. } => err,
                    other => {
                        HarnessError::connection(format!("initialize handshake failed: {other}"))
                    },
                })
            },
        }
    }

    async fn initialize(channel: &mut C) -> Result<ServerInfo, HarnessError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = channel.request("initialize", Some(params)).await?;
        let server = parse_initialize_result(&result)?;

        if server.protocol_version != PROTOCOL_VERSION {
            warn!(
                target: "mcp.conformance",
                requested = PROTOCOL_VERSION,
                negotiated = %server.protocol_version,
                "Server negotiated a different protocol version"
            );
        }
        channel.set_protocol_version(&server.protocol_version);
        channel.notify("notifications/initialized", None).await?;
        Ok(server)
    }

    fn ensure_open(&self) -> Result<(), HarnessError> {
        if self.closed {
            Err(HarnessError::connection("Session is closed"))
        } else {
            Ok(())
        }
    }
}

fn parse_initialize_result(result: &Value) -> Result<ServerInfo, HarnessError> {
    let protocol_version = result
        .get("protocolVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| HarnessError::protocol("initialize result has no protocolVersion"))?;
    let info = result.get("serverInfo");
    let field = |key: &str| {
        info.and_then(|i| i.get(key))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    };

    Ok(ServerInfo {
        name: field("name"),
        version: field("version"),
        protocol_version: protocol_version.to_string(),
    })
}

#[async_trait]
impl<C: RpcChannel> Session for McpSession<C> {
    fn server_info(&self) -> Option<&ServerInfo> {
        Some(&self.server)
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, HarnessError> {
        self.ensure_open()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_CATALOG_PAGES {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            let result = self.channel.request("tools/list", params).await?;

            let entries = result
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| HarnessError::protocol("tools/list result has no tools array"))?;
            for entry in entries {
                tools.push(ToolDescriptor::from_value(entry)?);
            }

            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => return Ok(tools),
            }
        }

        Err(HarnessError::protocol(format!(
            "tools/list still paginating after {MAX_CATALOG_PAGES} pages"
        )))
    }

    async fn call_tool(
        &mut self,
        request: &ToolCallRequest,
    ) -> Result<ToolCallResponse, HarnessError> {
        self.ensure_open()?;

        let params = json!({
            "name": request.tool_name,
            "arguments": request.arguments,
        });
        let result = self.channel.request("tools/call", Some(params)).await?;
        ToolCallResponse::from_value(result)
    }

    async fn close(&mut self) -> Result<(), HarnessError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel.shutdown().await
    }
}

/// Address of an already-running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Newline-delimited JSON-RPC over TCP, as `host:port`.
    Tcp(String),
    /// JSON-RPC over HTTP POST.
    Http(Url),
}

impl FromStr for Endpoint {
    type Err = HarnessError;

    fn from_str(endpoint: &str) -> Result<Self, Self::Err> {
        let invalid =
            |why: &str| HarnessError::connection(format!("Invalid endpoint '{endpoint}': {why}"));

        if !endpoint.contains("://") {
            let (host, port) = endpoint
                .rsplit_once(':')
                .ok_or_else(|| invalid("expected host:port or a URL"))?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(invalid("expected host:port or a URL"));
            }
            return Ok(Self::Tcp(endpoint.to_string()));
        }

        let url = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(Self::Http(url)),
            "tcp" => {
                let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
                let port = url.port().ok_or_else(|| invalid("missing port"))?;
                Ok(Self::Tcp(format!("{host}:{port}")))
            },
            other => Err(invalid(&format!("unsupported scheme '{other}'"))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(address) => write!(f, "tcp://{address}"),
            Self::Http(url) => write!(f, "{url}"),
        }
    }
}

/// How a run obtains its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConnectionStrategy {
    /// Launch the server and talk over its stdin/stdout.
    #[serde(rename = "spawn")]
    SpawnProcess(LaunchSpec),
    /// Connect to a server that is already running.
    #[serde(rename = "attach")]
    AttachExisting {
        /// `tcp://host:port`, `host:port`, or an `http(s)://` URL.
        endpoint: String,
    },
}

impl ConnectionStrategy {
    pub fn spawn<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::SpawnProcess(LaunchSpec::new(command, args))
    }

    pub fn attach(endpoint: impl Into<String>) -> Self {
        Self::AttachExisting {
            endpoint: endpoint.into(),
        }
    }

    /// One-line description used in fatal step details.
    pub fn describe(&self) -> String {
        match self {
            Self::SpawnProcess(spec) => format!("spawn `{}`", spec.command_line()),
            Self::AttachExisting { endpoint } => format!("attach {endpoint}"),
        }
    }
}

/// Produces connected sessions. Makes exactly one attempt per call.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire(
        &self,
        strategy: &ConnectionStrategy,
    ) -> Result<Box<dyn Session>, HarnessError>;
}

/// Provider backed by the built-in transports.
#[derive(Debug, Clone)]
pub struct DefaultSessionProvider {
    close_timeout: Duration,
}

impl DefaultSessionProvider {
    /// `close_timeout` bounds the wait for a spawned server to exit on close.
    pub fn new(close_timeout: Duration) -> Self {
        Self { close_timeout }
    }
}

impl Default for DefaultSessionProvider {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl SessionProvider for DefaultSessionProvider {
    async fn acquire(
        &self,
        strategy: &ConnectionStrategy,
    ) -> Result<Box<dyn Session>, HarnessError> {
        debug!(target: "mcp.conformance", strategy = %strategy.describe(), "Acquiring session");
        match strategy {
            ConnectionStrategy::SpawnProcess(spec) => {
                let channel = ProcessChannel::spawn(spec, self.close_timeout)?;
                Ok(Box::new(McpSession::handshake(channel).await?))
            },
            ConnectionStrategy::AttachExisting { endpoint } => match endpoint.parse::<Endpoint>()? {
                Endpoint::Tcp(address) => {
                    let channel = connect_tcp(&address).await?;
                    Ok(Box::new(McpSession::handshake(channel).await?))
                },
                Endpoint::Http(url) => {
                    let channel = HttpChannel::new(url)?;
                    Ok(Box::new(McpSession::handshake(channel).await?))
                },
            },
        }
    }
}
