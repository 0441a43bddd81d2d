//! JSON-RPC over HTTP POST (streamable HTTP servers and plain JSON-RPC endpoints).

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::RpcChannel;
use crate::error::HarnessError;
use crate::jsonrpc::{id_matches, Incoming, JsonRpcRequest};

const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_HEADER: &str = "mcp-protocol-version";

/// Channel that POSTs every message to a single endpoint URL.
#[derive(Debug)]
pub struct HttpChannel {
    client: Client,
    url: Url,
    next_id: u64,
    session_id: Option<String>,
    protocol_version: Option<String>,
    closed: bool,
}

struct HttpReply {
    body: String,
    event_stream: bool,
}

impl HttpChannel {
    pub fn new(url: Url) -> Result<Self, HarnessError> {
        let client = reqwest::ClientBuilder::new()
            .build()
            .map_err(|e| HarnessError::connection(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url,
            next_id: 0,
            session_id: None,
            protocol_version: None,
            closed: false,
        })
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn post(&mut self, message: &JsonRpcRequest) -> Result<HttpReply, HarnessError> {
        if self.closed {
            return Err(HarnessError::connection("Channel is closed"));
        }

        let body = serde_json::to_vec(message)
            .map_err(|e| HarnessError::protocol(format!("Failed to serialize message: {e}")))?;

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }
        if let Some(version) = &self.protocol_version {
            request = request.header(PROTOCOL_HEADER, version);
        }

        let response = request.send().await.map_err(classify_reqwest)?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }

        let status = response.status();
        let event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response.text().await.map_err(classify_reqwest)?;

        // Error statuses still count when the body is a JSON-RPC error object.
        if !status.is_success() && !body.trim_start().starts_with('{') {
            return Err(HarnessError::connection(format!("HTTP {status}: {body}")));
        }

        Ok(HttpReply { body, event_stream })
    }
}

#[async_trait]
impl RpcChannel for HttpChannel {
    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, HarnessError> {
        let id = self.next_id;
        self.next_id += 1;

        debug!(target: "mcp.conformance", transport = "http", id, method, "Sending request");
        let reply = self
            .post(&JsonRpcRequest::new(id, method, params))
            .await?;

        let payloads = if reply.event_stream {
            event_stream_payloads(&reply.body)
        } else {
            vec![reply.body]
        };

        for payload in payloads {
            if let Incoming::Response(response) = Incoming::parse(&payload)? {
                if id_matches(&response.id, id) {
                    return response.into_result();
                }
            }
        }

        Err(HarnessError::protocol(format!(
            "No response for {method} (id {id}) in HTTP reply"
        )))
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), HarnessError> {
        self.post(&JsonRpcRequest::notification(method, params))
            .await
            .map(|_| ())
    }

    async fn shutdown(&mut self) -> Result<(), HarnessError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Stateful servers expect the session to be ended with DELETE; 405 is fine.
        if let Some(session_id) = self.session_id.take() {
            match self
                .client
                .delete(self.url.clone())
                .header(SESSION_HEADER, session_id)
                .send()
                .await
            {
                Ok(response) => {
                    debug!(
                        target: "mcp.conformance",
                        status = %response.status(),
                        "Session terminated"
                    );
                },
                Err(e) => {
                    debug!(target: "mcp.conformance", "Session termination failed: {e}");
                },
            }
        }
        Ok(())
    }

    fn set_protocol_version(&mut self, version: &str) {
        self.protocol_version = Some(version.to_string());
    }

    fn transport_type(&self) -> &'static str {
        "http"
    }
}

/// Classify a [`reqwest::Error`] into the matching [`HarnessError`] variant.
fn classify_reqwest(err: reqwest::Error) -> HarnessError {
    if err.is_decode() {
        HarnessError::protocol(err.to_string())
    } else {
        HarnessError::connection(err.to_string())
    }
}

/// Extract the `data:` payload of every event in a `text/event-stream` body.
fn event_stream_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.is_empty() {
            if !current.is_empty() {
                payloads.push(current.join("\n"));
                current.clear();
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        payloads.push(current.join("\n"));
    }
    payloads
}
