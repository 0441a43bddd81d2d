//! In-memory session doubles for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::HarnessError;
use crate::session::{ConnectionStrategy, Session, SessionProvider};
use crate::types::{ContentBlock, ServerInfo, ToolCallRequest, ToolCallResponse, ToolDescriptor};

/// Session that echoes `message` arguments back unless told otherwise.
#[derive(Debug, Clone)]
pub(crate) struct FakeSession {
    server: ServerInfo,
    tools: Vec<ToolDescriptor>,
    list_error: Option<HarnessError>,
    response: Option<ToolCallResponse>,
    call_errors: HashMap<String, HarnessError>,
    close_error: Option<HarnessError>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl FakeSession {
    pub(crate) fn with_tools(names: &[&str]) -> Self {
        Self {
            server: ServerInfo {
                name: "fake".to_string(),
                version: "0.0.0".to_string(),
                protocol_version: crate::jsonrpc::PROTOCOL_VERSION.to_string(),
            },
            tools: names.iter().map(|n| ToolDescriptor::new(*n, "")).collect(),
            list_error: None,
            response: None,
            call_errors: HashMap::new(),
            close_error: None,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn respond_with(mut self, response: ToolCallResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub(crate) fn fail_listing(mut self, err: HarnessError) -> Self {
        self.list_error = Some(err);
        self
    }

    pub(crate) fn fail_call(mut self, tool: &str, err: HarnessError) -> Self {
        self.call_errors.insert(tool.to_string(), err);
        self
    }

    pub(crate) fn fail_close(mut self, err: HarnessError) -> Self {
        self.close_error = Some(err);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared close counter, readable after the session has been boxed away.
    pub(crate) fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }

    pub(crate) fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Session for FakeSession {
    fn server_info(&self) -> Option<&ServerInfo> {
        Some(&self.server)
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, HarnessError> {
        tokio::time::sleep(self.delay).await;
        match &self.list_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.tools.clone()),
        }
    }

    async fn call_tool(
        &mut self,
        request: &ToolCallRequest,
    ) -> Result<ToolCallResponse, HarnessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if let Some(err) = self.call_errors.get(&request.tool_name) {
            return Err(err.clone());
        }
        if let Some(response) = &self.response {
            return Ok(response.clone());
        }
        let text = request
            .arguments
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("ok");
        Ok(ToolCallResponse {
            content_blocks: vec![ContentBlock::text(text)],
            is_error: false,
        })
    }

    async fn close(&mut self) -> Result<(), HarnessError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        match &self.close_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Provider handing out one prepared [`FakeSession`], a fixed error, or never answering.
#[derive(Debug)]
pub(crate) enum FakeProvider {
    Ready(Mutex<Option<FakeSession>>),
    Refuse(HarnessError),
    Hang,
}

impl FakeProvider {
    pub(crate) fn ready(session: FakeSession) -> Self {
        Self::Ready(Mutex::new(Some(session)))
    }
}

#[async_trait]
impl SessionProvider for FakeProvider {
    async fn acquire(
        &self,
        _strategy: &ConnectionStrategy,
    ) -> Result<Box<dyn Session>, HarnessError> {
        match self {
            Self::Ready(slot) => {
                let session = slot
                    .lock()
                    .ok()
                    .and_then(|mut s| s.take())
                    .ok_or_else(|| HarnessError::connection("session already handed out"))?;
                Ok(Box::new(session))
            },
            Self::Refuse(err) => Err(err.clone()),
            Self::Hang => std::future::pending().await,
        }
    }
}
