//! Tool catalog retrieval.

use std::time::Duration;

use tracing::debug;

use crate::error::HarnessError;
use crate::session::Session;
use crate::types::ToolDescriptor;

/// Fetches the tool catalog from a session within a deadline.
#[derive(Debug, Clone)]
pub struct ToolCatalogFetcher {
    timeout: Duration,
}

impl ToolCatalogFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Return every advertised tool in server order. An empty catalog is valid.
    pub async fn list_tools(
        &self,
        session: &mut dyn Session,
    ) -> Result<Vec<ToolDescriptor>, HarnessError> {
        let tools = tokio::time::timeout(self.timeout, session.list_tools())
            .await
            .map_err(|_| HarnessError::timeout("tools/list", self.timeout))??;
        debug!(target: "mcp.conformance", count = tools.len(), "Fetched tool catalog");
        Ok(tools)
    }
}

/// Names of the expected tools missing from `catalog`, in expectation order.
pub fn missing_tools<'a>(catalog: &[ToolDescriptor], expected: &'a [String]) -> Vec<&'a str> {
    expected
        .iter()
        .filter(|name| !catalog.iter().any(|tool| &tool.name == *name))
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSession;

    #[tokio::test]
    async fn test_returns_catalog_in_order() {
        let mut session = FakeSession::with_tools(&["b", "a"]);
        let fetcher = ToolCatalogFetcher::new(Duration::from_secs(1));
        let names: Vec<_> = fetcher
            .list_tools(&mut session)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_slow_listing_times_out() {
        let mut session = FakeSession::with_tools(&["a"]).delay(Duration::from_millis(500));
        let fetcher = ToolCatalogFetcher::new(Duration::from_millis(20));
        let err = fetcher.list_tools(&mut session).await.unwrap_err();
        assert_eq!(err.category(), "timeout");
        assert!(err.to_string().contains("tools/list"));
    }

    #[test]
    fn test_missing_tools() {
        let catalog = vec![ToolDescriptor::new("EchoCapability", "")];
        let expected = vec!["EchoCapability".to_string(), "SystemInformation".to_string()];
        assert_eq!(missing_tools(&catalog, &expected), vec!["SystemInformation"]);
        assert!(missing_tools(&catalog, &[]).is_empty());
    }
}
