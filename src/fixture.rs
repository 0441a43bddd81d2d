//! Reference tool server used by the test suite and for local smoke runs.
//!
//! Speaks newline-delimited JSON-RPC and exposes four tools:
//! `EchoCapability`, `SystemInformation`, `FailingCapability` and
//! `SlowCapability`. [`FixtureServer::handle`] is transport-agnostic so the
//! same logic can sit behind stdio, TCP or an HTTP route.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use crate::jsonrpc::{
    JsonRpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};

pub const FIXTURE_NAME: &str = "mcp-conformance-fixture";

/// Behaviour switches for misbehaving-server scenarios.
#[derive(Debug, Clone, Default)]
pub struct FixtureOptions {
    /// Never answer `initialize`.
    pub hang_on_initialize: bool,
    /// Advertise no tools (calls still work).
    pub empty_catalog: bool,
    /// Split `tools/list` into pages of this many tools.
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureServer {
    options: FixtureOptions,
}

const TOOLS: [(&str, &str); 4] = [
    ("EchoCapability", "Echoes the `message` argument verbatim"),
    ("SystemInformation", "Describes the host operating system"),
    ("FailingCapability", "Always reports a tool-level failure"),
    ("SlowCapability", "Sleeps for `millis` milliseconds before answering"),
];

impl FixtureServer {
    pub fn new(options: FixtureOptions) -> Self {
        Self { options }
    }

    /// Answer one JSON-RPC message. Notifications and suppressed replies yield `None`.
    pub async fn handle(&self, message: Value) -> Option<Value> {
        let method = message.get("method").and_then(Value::as_str)?.to_string();
        let id = message.get("id").cloned()?;
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        debug!(target: "mcp.conformance.fixture", %method, "Request");

        let response = match method.as_str() {
            "initialize" if self.options.hang_on_initialize => return None,
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": FIXTURE_NAME, "version": env!("CARGO_PKG_VERSION") },
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, self.list_tools(&params)),
            "tools/call" => match self.call_tool(&params).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(message) => JsonRpcResponse::failure(id, INVALID_PARAMS, message),
            },
            other => JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        };
        serde_json::to_value(response).ok()
    }

    fn list_tools(&self, params: &Value) -> Value {
        let tools: Vec<Value> = if self.options.empty_catalog {
            Vec::new()
        } else {
            TOOLS
                .iter()
                .map(|(name, description)| {
                    json!({
                        "name": name,
                        "description": description,
                        "inputSchema": input_schema(name),
                    })
                })
                .collect()
        };

        let Some(size) = self.options.page_size.filter(|s| *s > 0) else {
            return json!({ "tools": tools });
        };
        let start = params
            .get("cursor")
            .and_then(Value::as_str)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0)
            .min(tools.len());
        let end = (start + size).min(tools.len());
        let mut page = json!({ "tools": tools[start..end].to_vec() });
        if end < tools.len() {
            page["nextCursor"] = json!(end.to_string());
        }
        page
    }

    async fn call_tool(&self, params: &Value) -> Result<Value, String> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| "Missing tool name".to_string())?;
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        match name {
            "EchoCapability" => {
                let message = arguments
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "EchoCapability requires a string `message`".to_string())?;
                Ok(text_result(message, false))
            },
            "SystemInformation" => Ok(text_result(
                &format!(
                    "OS: {}\nArchitecture: {}\nFamily: {}",
                    std::env::consts::OS,
                    std::env::consts::ARCH,
                    std::env::consts::FAMILY
                ),
                false,
            )),
            "FailingCapability" => Ok(text_result("FailingCapability always fails", true)),
            "SlowCapability" => {
                let millis = arguments.get("millis").and_then(Value::as_u64).unwrap_or(1000);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(text_result(&format!("slept {millis}ms"), false))
            },
            unknown => Err(format!("Unknown tool: {unknown}")),
        }
    }

    /// Serve one newline-delimited connection until the peer closes it.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = FramedRead::new(reader, LinesCodec::new());
        while let Some(line) = lines.next().await {
            let line = line.map_err(std::io::Error::other)?;
            if line.trim().is_empty() {
                continue;
            }

            let reply = match serde_json::from_str::<Value>(&line) {
                Ok(message) => self.handle(message).await,
                Err(e) => {
                    warn!(target: "mcp.conformance.fixture", "Unparseable line: {e}");
                    let failure = JsonRpcResponse::failure(Value::Null, PARSE_ERROR, e.to_string());
                    serde_json::to_value(failure).ok()
                },
            };

            if let Some(reply) = reply {
                let mut bytes = serde_json::to_vec(&reply).map_err(std::io::Error::other)?;
                bytes.push(b'\n');
                writer.write_all(&bytes).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Accept TCP connections forever, serving each on its own task.
    pub async fn serve_tcp(self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            info!(target: "mcp.conformance.fixture", %peer, "Accepted connection");
            let server = self.clone();
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                if let Err(e) = server.serve(reader, writer).await {
                    warn!(target: "mcp.conformance.fixture", %peer, "Connection ended: {e}");
                }
            });
        }
    }
}

fn text_result(text: &str, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

fn input_schema(tool: &str) -> Value {
    match tool {
        "EchoCapability" => json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"],
        }),
        "SlowCapability" => json!({
            "type": "object",
            "properties": { "millis": { "type": "integer", "minimum": 0 } },
        }),
        _ => json!({ "type": "object", "properties": {} }),
    }
}
