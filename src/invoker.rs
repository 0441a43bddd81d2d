//! Single tool invocation.

use std::collections::HashSet;
use std::time::Duration;

use tracing::debug;

use crate::error::HarnessError;
use crate::session::Session;
use crate::types::{ToolCallRequest, ToolCallResponse, ToolDescriptor};

/// Calls one tool per request, bounded by a timeout.
///
/// When a catalog is attached, calls to tools it does not list fail with
/// [`HarnessError::UnknownTool`] without touching the session.
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    timeout: Duration,
    catalog: Option<HashSet<String>>,
}

impl ToolInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            catalog: None,
        }
    }

    pub fn with_catalog(mut self, tools: &[ToolDescriptor]) -> Self {
        self.catalog = Some(tools.iter().map(|t| t.name.clone()).collect());
        self
    }

    /// Invoke `request.tool_name`.
    ///
    /// A response flagged `isError` is reported as a server error carrying
    /// the response text.
    pub async fn invoke(
        &self,
        session: &mut dyn Session,
        request: &ToolCallRequest,
    ) -> Result<ToolCallResponse, HarnessError> {
        if let Some(catalog) = &self.catalog {
            if !catalog.contains(&request.tool_name) {
                return Err(HarnessError::UnknownTool {
                    name: request.tool_name.clone(),
                });
            }
        }

        let operation = format!("tools/call {}", request.tool_name);
        let response = tokio::time::timeout(self.timeout, session.call_tool(request))
            .await
            .map_err(|_| HarnessError::timeout(operation, self.timeout))??;

        debug!(
            target: "mcp.conformance",
            tool = %request.tool_name,
            blocks = response.content_blocks.len(),
            is_error = response.is_error,
            "Tool call returned"
        );

        if response.is_error {
            return Err(HarnessError::Server {
                code: None,
                message: response.joined_text(),
            });
        }
        Ok(response)
    }
}
