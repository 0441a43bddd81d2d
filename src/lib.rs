//! MCP Server Conformance Harness
//!
//! Connects to a tool server (by spawning it or attaching to a running
//! endpoint), lists its tool catalog, invokes a scripted sequence of tools,
//! checks their responses and reports a per-step verdict. It can be used as a
//! standalone CLI (`mcp-conformance run`) or as a library.
//!
//! # Example
//!
//! ```no_run
//! use mcp_conformance::{ConformanceRunner, ConnectionStrategy, Scenario, ToolCallStep};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let scenario = Scenario::builder(ConnectionStrategy::spawn("java", ["-jar", "server.jar"]))
//!         .name("echo")
//!         .expect_tool("EchoCapability")
//!         .call(
//!             ToolCallStep::new("EchoCapability")
//!                 .argument("message", "ping")
//!                 .expect_text("ping"),
//!         )
//!         .build()?;
//!
//!     let report = ConformanceRunner::new(scenario).run().await;
//!     std::process::exit(report.exit_code().into());
//! }
//! ```

pub mod catalog;
pub mod error;
pub mod fixture;
pub mod invoker;
pub mod jsonrpc;
pub mod report;
pub mod reporter;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use catalog::ToolCatalogFetcher;
pub use error::{HarnessError, ScenarioError};
pub use invoker::ToolInvoker;
pub use report::{OverallOutcome, RunReport, StepOutcome, StepResult};
pub use reporter::{OutputFormat, ResultReporter};
pub use runner::{ConformanceRunner, RunState};
pub use scenario::{Scenario, ScenarioBuilder, Settings, ToolCallStep};
pub use session::{
    ConnectionStrategy, DefaultSessionProvider, Endpoint, McpSession, Session, SessionProvider,
};
pub use types::{ContentBlock, ServerInfo, ToolCallRequest, ToolCallResponse, ToolDescriptor};
