//! Declarative conformance scenarios.
//!
//! A scenario names a connection strategy, timeouts, the tools the catalog is
//! expected to contain, and an ordered list of tool calls with expectations.
//! Scenarios load from TOML (default), YAML or JSON, chosen by extension.
//!
//! # Example TOML
//!
//! ```toml
//! name = "umcp-stdio"
//!
//! [settings]
//! request_timeout_ms = 5000
//!
//! [connection]
//! type = "spawn"
//! command = "java"
//! args = ["-jar", "build/libs/uMCP-1.0.2.jar"]
//!
//! [catalog]
//! expect_tools = ["EchoCapability"]
//!
//! [[call]]
//! tool = "EchoCapability"
//! arguments = { message = "ping" }
//! expect_text = "ping"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ScenarioError;
use crate::session::{ConnectionStrategy, Endpoint};
use crate::types::{ToolCallRequest, ToolCallResponse};

/// A complete run plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub settings: Settings,
    pub connection: ConnectionStrategy,
    #[serde(default)]
    pub catalog: CatalogExpectation,
    /// Ordered tool calls. The field is `call` because TOML `[[call]]`
    /// array-of-tables syntax creates a key called `call`.
    #[serde(default)]
    pub call: Vec<ToolCallStep>,
}

fn default_name() -> String {
    "unnamed".to_string()
}

/// Timeouts and run-wide switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Deadline for launching/attaching plus the handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Deadline for each `tools/list` and `tools/call`.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// How long a spawned server gets to exit after stdin closes.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,
    /// Reject calls to tools missing from the fetched catalog without a round trip.
    #[serde(default)]
    pub precheck_tools: bool,
    /// Latency budget for `tools/list`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_list_ms: Option<u64>,
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_request_timeout() -> u64 {
    5_000
}

fn default_close_timeout() -> u64 {
    2_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            close_timeout_ms: default_close_timeout(),
            precheck_tools: false,
            max_list_ms: None,
        }
    }
}

impl Settings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Tools the catalog must contain. Order and extra tools are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogExpectation {
    #[serde(default)]
    pub expect_tools: Vec<String>,
}

/// One scheduled `tools/call` with its expectations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallStep {
    /// Label for the step; defaults to `tools/call <tool>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tool: String,
    /// JSON object of arguments (defaults to null, meaning none).
    #[serde(default)]
    pub arguments: Value,
    /// The first content block must be text equal to this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_text: Option<String>,
    /// The joined text content must contain this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_contains: Option<String>,
    /// At least one non-empty text block is required.
    #[serde(default)]
    pub expect_non_empty: bool,
    /// Latency budget for the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ms: Option<u64>,
}

impl ToolCallStep {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            name: None,
            tool: tool.into(),
            arguments: Value::Null,
            expect_text: None,
            expect_contains: None,
            expect_non_empty: false,
            max_ms: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.arguments.is_object() {
            self.arguments = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(map) = &mut self.arguments {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn expect_text(mut self, text: impl Into<String>) -> Self {
        self.expect_text = Some(text.into());
        self
    }

    pub fn expect_contains(mut self, text: impl Into<String>) -> Self {
        self.expect_contains = Some(text.into());
        self
    }

    pub fn expect_non_empty(mut self) -> Self {
        self.expect_non_empty = true;
        self
    }

    pub fn max_ms(mut self, millis: u64) -> Self {
        self.max_ms = Some(millis);
        self
    }

    /// Name recorded in the step result.
    pub fn step_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("tools/call {}", self.tool))
    }

    pub fn request(&self) -> Result<ToolCallRequest, ScenarioError> {
        ToolCallRequest::from_json(&self.tool, self.arguments.clone()).map_err(|e| {
            ScenarioError::Validation {
                message: format!("call '{}': {e}", self.step_name()),
            }
        })
    }

    /// Check `response` against the configured expectations.
    ///
    /// Returns the first violated expectation as a message.
    pub fn check(&self, response: &ToolCallResponse) -> Result<(), String> {
        if let Some(expected) = &self.expect_text {
            match response.first_text() {
                Some(actual) if actual == expected => {},
                Some(actual) => {
                    return Err(format!(
                        "expected first text block {expected:?}, got {:?}",
                        crate::report::truncate_detail(actual)
                    ))
                },
                None => {
                    return Err(format!(
                        "expected first text block {expected:?}, got no text block"
                    ))
                },
            }
        }

        if let Some(needle) = &self.expect_contains {
            if !response.joined_text().contains(needle.as_str()) {
                return Err(format!("response text does not contain {needle:?}"));
            }
        }

        if self.expect_non_empty
            && !response
                .content_blocks
                .iter()
                .filter_map(|b| b.as_text())
                .any(|t| !t.trim().is_empty())
        {
            return Err("expected non-empty text content".to_string());
        }

        Ok(())
    }
}

impl Scenario {
    pub fn builder(connection: ConnectionStrategy) -> ScenarioBuilder {
        ScenarioBuilder::new(connection)
    }

    /// Parse a TOML string into a validated [`Scenario`].
    pub fn from_toml(content: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = serde_yaml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_json(content: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = serde_json::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load and validate a scenario file.
    ///
    /// `.yaml`/`.yml` parse as YAML, `.json` as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            source,
            path: path.display().to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&content),
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }

    /// Validate semantic constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let invalid = |message: String| Err(ScenarioError::Validation { message });

        match &self.connection {
            ConnectionStrategy::SpawnProcess(spec) if spec.command.trim().is_empty() => {
                return invalid("connection.command must not be empty".to_string());
            },
            ConnectionStrategy::AttachExisting { endpoint } => {
                if let Err(e) = endpoint.parse::<Endpoint>() {
                    return invalid(format!("connection.endpoint: {e}"));
                }
            },
            ConnectionStrategy::SpawnProcess(_) => {},
        }

        let s = &self.settings;
        for (field, value) in [
            ("connect_timeout_ms", s.connect_timeout_ms),
            ("request_timeout_ms", s.request_timeout_ms),
            ("close_timeout_ms", s.close_timeout_ms),
        ] {
            if value == 0 {
                return invalid(format!("settings.{field} must be > 0"));
            }
        }
        if s.max_list_ms == Some(0) {
            return invalid("settings.max_list_ms must be > 0".to_string());
        }

        if let Some(empty) = self.catalog.expect_tools.iter().position(|t| t.trim().is_empty()) {
            return invalid(format!("catalog.expect_tools[{empty}] must not be empty"));
        }

        for (i, call) in self.call.iter().enumerate() {
            if call.tool.trim().is_empty() {
                return invalid(format!("call[{i}].tool must not be empty"));
            }
            if call.max_ms == Some(0) {
                return invalid(format!("call[{i}].max_ms must be > 0"));
            }
            call.request()?;
        }

        Ok(())
    }
}

/// Builds a [`Scenario`] in code.
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    scenario: Scenario,
}

impl ScenarioBuilder {
    fn new(connection: ConnectionStrategy) -> Self {
        Self {
            scenario: Scenario {
                name: default_name(),
                settings: Settings::default(),
                connection,
                catalog: CatalogExpectation::default(),
                call: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.scenario.name = name.into();
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.scenario.settings = settings;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.scenario.settings.connect_timeout_ms = millis(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.scenario.settings.request_timeout_ms = millis(timeout);
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.scenario.settings.close_timeout_ms = millis(timeout);
        self
    }

    pub fn precheck_tools(mut self, enabled: bool) -> Self {
        self.scenario.settings.precheck_tools = enabled;
        self
    }

    pub fn max_list_ms(mut self, millis: u64) -> Self {
        self.scenario.settings.max_list_ms = Some(millis);
        self
    }

    pub fn expect_tool(mut self, name: impl Into<String>) -> Self {
        self.scenario.catalog.expect_tools.push(name.into());
        self
    }

    pub fn call(mut self, step: ToolCallStep) -> Self {
        self.scenario.call.push(step);
        self
    }

    /// Validate and return the scenario.
    pub fn build(self) -> Result<Scenario, ScenarioError> {
        self.scenario.validate()?;
        Ok(self.scenario)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
