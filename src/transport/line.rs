//! Newline-delimited JSON-RPC over any async byte stream.
//!
//! Each message is one JSON object followed by `\n`. Reads go through
//! [`FramedRead`] so an abandoned request (timeout) never loses a partially
//! read line. Writes are staged in a pending buffer: bytes a cancelled write
//! did not get out are sent ahead of the next message, so the peer always
//! sees whole lines.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use super::RpcChannel;
use crate::error::HarnessError;
use crate::jsonrpc::{id_matches, Incoming, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND};

/// Upper bound for a single message line.
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Line channel over a TCP connection.
pub type TcpChannel = LineChannel<OwnedReadHalf, OwnedWriteHalf>;

/// JSON-RPC channel over a reader/writer pair.
pub struct LineChannel<R, W> {
    reader: FramedRead<R, LinesCodec>,
    writer: Option<W>,
    /// Serialized bytes not yet accepted by the writer.
    pending: Vec<u8>,
    next_id: u64,
    transport: &'static str,
}

impl<R, W> std::fmt::Debug for LineChannel<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineChannel")
            .field("transport", &self.transport)
            .field("next_id", &self.next_id)
            .field("open", &self.writer.is_some())
            .field("pending_bytes", &self.pending.len())
            .finish()
    }
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, transport: &'static str) -> Self {
        Self {
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            writer: Some(writer),
            pending: Vec::new(),
            next_id: 0,
            transport,
        }
    }

    async fn write_message<T: Serialize + Sync>(
        &mut self,
        message: &T,
    ) -> Result<(), HarnessError> {
        if self.writer.is_none() {
            return Err(HarnessError::connection("Channel is closed"));
        }

        let mut line = serde_json::to_vec(message)
            .map_err(|e| HarnessError::protocol(format!("Failed to serialize message: {e}")))?;
        line.push(b'\n');
        if !self.pending.is_empty() {
            debug!(
                target: "mcp.conformance",
                transport = self.transport,
                bytes = self.pending.len(),
                "Completing an interrupted write"
            );
        }
        self.pending.extend_from_slice(&line);

        self.flush_pending().await
    }

    /// Push out everything in `pending`.
    ///
    /// Cancel-safe: bytes leave the buffer only once the writer has taken
    /// them, so a dropped future leaves the remainder for the next call.
    async fn flush_pending(&mut self) -> Result<(), HarnessError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| HarnessError::connection("Channel is closed"))?;

        while !self.pending.is_empty() {
            let written = writer.write(&self.pending).await?;
            if written == 0 {
                return Err(HarnessError::connection("Peer stopped accepting input"));
            }
            self.pending.drain(..written);
        }
        writer.flush().await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Incoming, HarnessError> {
        loop {
            match self.reader.next().await {
                None => return Err(HarnessError::connection("Server closed the connection")),
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    return Err(HarnessError::protocol(format!(
                        "Message exceeds {MAX_LINE_LENGTH} bytes"
                    )))
                },
                Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
                Some(Ok(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if !line.starts_with('{') {
                        warn!(
                            target: "mcp.conformance",
                            transport = self.transport,
                            "Ignoring non-JSON output: {line}"
                        );
                        continue;
                    }
                    return Incoming::parse(line);
                },
            }
        }
    }
}

#[async_trait]
impl<R, W> RpcChannel for LineChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, HarnessError> {
        let id = self.next_id;
        self.next_id += 1;

        debug!(
            target: "mcp.conformance",
            transport = self.transport,
            id,
            method,
            "Sending request"
        );
        self.write_message(&JsonRpcRequest::new(id, method, params))
            .await?;

        loop {
            match self.next_message().await? {
                Incoming::Response(response) if id_matches(&response.id, id) => {
                    return response.into_result();
                },
                Incoming::Response(response) => {
                    debug!(
                        target: "mcp.conformance",
                        expected = id,
                        received = %response.id,
                        "Discarding stale response"
                    );
                },
                Incoming::Request {
                    id: request_id,
                    method,
                } => {
                    let reply = if method == "ping" {
                        JsonRpcResponse::success(request_id, json!({}))
                    } else {
                        JsonRpcResponse::failure(
                            request_id,
                            METHOD_NOT_FOUND,
                            format!("Client does not handle {method}"),
                        )
                    };
                    self.write_message(&reply).await?;
                },
                Incoming::Notification { method } => {
                    debug!(target: "mcp.conformance", method = %method, "Server notification");
                },
            }
        }
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), HarnessError> {
        self.write_message(&JsonRpcRequest::notification(method, params))
            .await
    }

    async fn shutdown(&mut self) -> Result<(), HarnessError> {
        // Dropping the writer is what signals EOF to the peer.
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(
                    target: "mcp.conformance",
                    transport = self.transport,
                    "Writer shutdown failed: {e}"
                );
            }
        }
        Ok(())
    }

    fn transport_type(&self) -> &'static str {
        self.transport
    }
}

/// Open a line channel to `host:port`.
pub async fn connect_tcp(address: &str) -> Result<TcpChannel, HarnessError> {
    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| HarnessError::connection(format!("Failed to connect to {address}: {e}")))?;
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    Ok(LineChannel::new(reader, writer, "tcp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{
        duplex, split, AsyncBufRead, AsyncBufReadExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
    };

    type TestChannel = LineChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn channel_pair() -> (TestChannel, DuplexStream) {
        channel_pair_with_buffer(64 * 1024)
    }

    fn channel_pair_with_buffer(buffer: usize) -> (TestChannel, DuplexStream) {
        let (client, server) = duplex(buffer);
        let (reader, writer) = split(client);
        (LineChannel::new(reader, writer, "memory"), server)
    }

    async fn read_json<R: AsyncBufRead + Unpin>(lines: &mut tokio::io::Lines<R>) -> Value {
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_request_skips_noise_and_stale_responses() {
        let (mut channel, server) = channel_pair();

        let peer = tokio::spawn(async move {
            let (reader, mut writer) = split(server);
            let mut lines = BufReader::new(reader).lines();
            let request = read_json(&mut lines).await;
            assert_eq!(request["method"], "tools/list");
            let id = request["id"].as_u64().unwrap();

            let script = format!(
                "Server starting...\n\
                 {{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{{}}}}\n\
                 {{\"jsonrpc\":\"2.0\",\"id\":{stale},\"result\":{{\"late\":true}}}}\n\
                 \n\
                 {{\"jsonrpc\":\"2.0\",\"id\":{id},\"result\":{{\"tools\":[]}}}}\n",
                stale = id + 100
            );
            writer.write_all(script.as_bytes()).await.unwrap();
        });

        let result = channel.request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({"tools": []}));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_answers_server_ping() {
        let (mut channel, server) = channel_pair();

        let peer = tokio::spawn(async move {
            let (reader, mut writer) = split(server);
            let mut lines = BufReader::new(reader).lines();
            let request = read_json(&mut lines).await;
            writer
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"srv-1\",\"method\":\"ping\"}\n")
                .await
                .unwrap();
            let pong = read_json(&mut lines).await;
            assert_eq!(pong["id"], "srv-1");
            assert_eq!(pong["result"], json!({}));

            let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": {"ok": true}});
            writer
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
        });

        let result = channel.request("tools/call", Some(json!({}))).await.unwrap();
        assert_eq!(result["ok"], true);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_peer_is_connection_error() {
        let (mut channel, server) = channel_pair();
        drop(server);
        let err = channel.request("tools/list", None).await.unwrap_err();
        assert_eq!(err.category(), "connection");
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (mut channel, _server) = channel_pair();
        channel.shutdown().await.unwrap();
        channel.shutdown().await.unwrap();
        let err = channel.notify("notifications/initialized", None).await.unwrap_err();
        assert_eq!(err.category(), "connection");
    }

    #[tokio::test]
    async fn test_rejects_unhandled_server_request() {
        let (mut channel, server) = channel_pair();

        let peer = tokio::spawn(async move {
            let (reader, mut writer) = split(server);
            let mut lines = BufReader::new(reader).lines();
            let request = read_json(&mut lines).await;
            let sampling = json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "sampling/createMessage",
                "params": { "messages": [] },
            });
            writer
                .write_all(format!("{sampling}\n").as_bytes())
                .await
                .unwrap();

            let rejection = read_json(&mut lines).await;
            assert_eq!(rejection["id"], 7);
            assert_eq!(rejection["error"]["code"], METHOD_NOT_FOUND);
            assert!(rejection.get("result").is_none());

            let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": {"tools": []}});
            writer
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
        });

        let result = channel.request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({"tools": []}));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_write_is_completed_before_next_message() {
        // A tiny pipe forces the large request to stall half written.
        let (mut channel, server) = channel_pair_with_buffer(256);
        let big = "x".repeat(64 * 1024);

        let cut = tokio::time::timeout(
            Duration::from_millis(50),
            channel.request("tools/call", Some(json!({ "message": big }))),
        )
        .await;
        assert!(cut.is_err(), "write should still be blocked");
        assert!(!channel.pending.is_empty());

        let peer = tokio::spawn(async move {
            let (reader, mut writer) = split(server);
            let mut lines = BufReader::new(reader).lines();

            let first = read_json(&mut lines).await;
            assert_eq!(first["params"]["message"].as_str().map(str::len), Some(64 * 1024));
            let stale = json!({"jsonrpc": "2.0", "id": first["id"], "result": {"late": true}});
            writer
                .write_all(format!("{stale}\n").as_bytes())
                .await
                .unwrap();

            let second = read_json(&mut lines).await;
            assert_eq!(second["params"]["message"], "fresh");
            let reply = json!({"jsonrpc": "2.0", "id": second["id"], "result": {"ok": true}});
            writer
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
        });

        let result = channel
            .request("tools/call", Some(json!({ "message": "fresh" })))
            .await
            .unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert!(channel.pending.is_empty());
        peer.await.unwrap();
    }
}
