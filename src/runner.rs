//! The conformance run state machine.
//!
//! ```text
//! NotStarted -> Connecting -> Connected -> Listing -> Invoking(0..n) -> Closing -> Done
//!                    |                                                   ^
//!                    +------------------ connect failed -----------------+
//! ```
//!
//! Every scheduled step yields exactly one [`StepResult`] in execution order.
//! Only a failed `connect` is fatal; it marks every later step as skipped.
//! The session is closed exactly once whenever one was acquired.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::catalog::{missing_tools, ToolCatalogFetcher};
use crate::error::HarnessError;
use crate::invoker::ToolInvoker;
use crate::jsonrpc::PROTOCOL_VERSION;
use crate::report::{truncate_detail, RunReport, StepOutcome, StepResult};
use crate::scenario::{Scenario, ToolCallStep};
use crate::session::{DefaultSessionProvider, Session, SessionProvider};
use crate::types::{ServerInfo, ToolDescriptor};

/// Name of the first scheduled step.
pub const CONNECT_STEP: &str = "connect";
/// Name of the catalog step.
pub const LIST_STEP: &str = "tools/list";
/// Name of the last scheduled step.
pub const DISCONNECT_STEP: &str = "disconnect";

/// Position of a run in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Connecting,
    Connected,
    Listing,
    /// Executing the call at this index.
    Invoking(usize),
    Closing,
    Done,
}

/// Drives one scenario against one server.
///
/// The runner holds no per-run state, so `run` can be called repeatedly;
/// each call acquires its own session.
#[derive(Debug)]
pub struct ConformanceRunner<P = DefaultSessionProvider> {
    scenario: Scenario,
    provider: P,
}

impl ConformanceRunner<DefaultSessionProvider> {
    /// Runner using the built-in transports.
    pub fn new(scenario: Scenario) -> Self {
        let provider = DefaultSessionProvider::new(scenario.settings.close_timeout());
        Self { scenario, provider }
    }
}

/// Mutable state of a single run.
struct RunContext {
    steps: Vec<StepResult>,
    session: Option<Box<dyn Session>>,
    server: Option<ServerInfo>,
    catalog: Option<Vec<ToolDescriptor>>,
}

impl RunContext {
    fn record(&mut self, result: StepResult) {
        match &result.outcome {
            StepOutcome::Success => info!(
                target: "mcp.conformance",
                step = %result.step_name,
                elapsed_ms = result.elapsed_millis,
                "Step passed"
            ),
            outcome => warn!(
                target: "mcp.conformance",
                step = %result.step_name,
                outcome = outcome.label(),
                elapsed_ms = result.elapsed_millis,
                error = outcome.message().unwrap_or_default(),
                "Step did not pass"
            ),
        }
        self.steps.push(result);
    }
}

impl<P: SessionProvider> ConformanceRunner<P> {
    pub fn with_provider(scenario: Scenario, provider: P) -> Self {
        Self { scenario, provider }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Names of every step a run schedules, in order.
    pub fn scheduled_steps(&self) -> Vec<String> {
        let mut names = vec![CONNECT_STEP.to_string(), LIST_STEP.to_string()];
        names.extend(self.scenario.call.iter().map(ToolCallStep::step_name));
        names.push(DISCONNECT_STEP.to_string());
        names
    }

    /// Execute the scenario to completion. Never fails; failures live in the report.
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let mut ctx = RunContext {
            steps: Vec::new(),
            session: None,
            server: None,
            catalog: None,
        };

        let mut state = RunState::NotStarted;
        loop {
            debug!(target: "mcp.conformance", ?state, "Runner state");
            state = match state {
                RunState::NotStarted => RunState::Connecting,
                RunState::Connecting => self.connect(&mut ctx).await,
                RunState::Connected => RunState::Listing,
                RunState::Listing => {
                    self.list(&mut ctx).await;
                    RunState::Invoking(0)
                },
                RunState::Invoking(index) => match self.scenario.call.get(index) {
                    Some(step) => {
                        self.invoke(&mut ctx, step).await;
                        RunState::Invoking(index + 1)
                    },
                    None => RunState::Closing,
                },
                RunState::Closing => {
                    self.close(&mut ctx).await;
                    RunState::Done
                },
                RunState::Done => break,
            };
        }

        let report = RunReport::new(
            self.scenario.name.clone(),
            ctx.server,
            ctx.catalog,
            ctx.steps,
            elapsed_millis(started),
        );
        info!(
            target: "mcp.conformance",
            scenario = %report.scenario,
            outcome = ?report.overall_outcome,
            passed = report.passed(),
            total = report.steps.len(),
            "Run finished"
        );
        report
    }

    async fn connect(&self, ctx: &mut RunContext) -> RunState {
        let strategy = &self.scenario.connection;
        let limit = self.scenario.settings.connect_timeout();
        let started = Instant::now();

        let acquired = tokio::time::timeout(limit, self.provider.acquire(strategy))
            .await
            .unwrap_or_else(|_| Err(HarnessError::timeout(CONNECT_STEP, limit)));

        match acquired {
            Ok(session) => {
                let server = session.server_info().cloned();
                let mut result =
                    StepResult::new(CONNECT_STEP, StepOutcome::Success, elapsed_millis(started));
                if let Some(info) = &server {
                    result = result.with_details(describe_server(info));
                }
                ctx.record(result);
                ctx.server = server;
                ctx.session = Some(session);
                RunState::Connected
            },
            Err(err) => {
                ctx.record(StepResult::new(
                    CONNECT_STEP,
                    StepOutcome::FatalError {
                        message: err.to_string(),
                        detail: strategy.describe(),
                    },
                    elapsed_millis(started),
                ));
                for name in self.scheduled_steps().into_iter().skip(1) {
                    ctx.record(StepResult::skipped(name, "connect failed"));
                }
                RunState::Closing
            },
        }
    }

    async fn list(&self, ctx: &mut RunContext) {
        let Some(session) = ctx.session.as_deref_mut() else {
            return;
        };
        let fetcher = ToolCatalogFetcher::new(self.scenario.settings.request_timeout());
        let started = Instant::now();
        let listed = fetcher.list_tools(session).await;
        let elapsed = elapsed_millis(started);

        let result = match listed {
            Ok(tools) => {
                let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
                let details = format!("{} tools: {}", tools.len(), names.join(", "));
                let missing = missing_tools(&tools, &self.scenario.catalog.expect_tools);

                let outcome = if !missing.is_empty() {
                    StepOutcome::Failure {
                        message: format!(
                            "catalog is missing expected tools: {}",
                            missing.join(", ")
                        ),
                    }
                } else {
                    over_budget(elapsed, self.scenario.settings.max_list_ms)
                };
                ctx.catalog = Some(tools);
                StepResult::new(LIST_STEP, outcome, elapsed).with_details(details)
            },
            Err(err) => StepResult::new(
                LIST_STEP,
                StepOutcome::Failure {
                    message: err.to_string(),
                },
                elapsed,
            ),
        };
        ctx.record(result);
    }

    async fn invoke(&self, ctx: &mut RunContext, step: &ToolCallStep) {
        let name = step.step_name();
        let request = match step.request() {
            Ok(request) => request,
            Err(err) => {
                ctx.record(StepResult::new(
                    name,
                    StepOutcome::Failure {
                        message: err.to_string(),
                    },
                    0,
                ));
                return;
            },
        };

        let Some(session) = ctx.session.as_deref_mut() else {
            return;
        };
        let mut invoker = ToolInvoker::new(self.scenario.settings.request_timeout());
        if self.scenario.settings.precheck_tools {
            if let Some(catalog) = &ctx.catalog {
                invoker = invoker.with_catalog(catalog);
            }
        }

        let started = Instant::now();
        let called = invoker.invoke(session, &request).await;
        let elapsed = elapsed_millis(started);

        let result = match called {
            Ok(response) => {
                let outcome = match step.check(&response) {
                    Ok(()) => over_budget(elapsed, step.max_ms),
                    Err(message) => StepOutcome::Failure { message },
                };
                StepResult::new(name, outcome, elapsed).with_details(response.joined_text())
            },
            Err(err) => {
                let result = StepResult::new(
                    name,
                    StepOutcome::Failure {
                        message: err.to_string(),
                    },
                    elapsed,
                );
                match rejection_detail(&err) {
                    Some(detail) => result.with_details(detail),
                    None => result,
                }
            },
        };
        ctx.record(result);
    }

    async fn close(&self, ctx: &mut RunContext) {
        let Some(mut session) = ctx.session.take() else {
            return;
        };
        let started = Instant::now();
        let outcome = match session.close().await {
            Ok(()) => StepOutcome::Success,
            Err(err) => StepOutcome::Failure {
                message: err.to_string(),
            },
        };
        ctx.record(StepResult::new(DISCONNECT_STEP, outcome, elapsed_millis(started)));
    }
}

fn describe_server(info: &ServerInfo) -> String {
    let mut details = format!("{} {}, protocol {}", info.name, info.version, info.protocol_version);
    if info.protocol_version != PROTOCOL_VERSION {
        details.push_str(&format!(" (requested {PROTOCOL_VERSION})"));
    }
    truncate_detail(&details)
}

fn over_budget(elapsed: u64, budget: Option<u64>) -> StepOutcome {
    match budget {
        Some(max) if elapsed > max => StepOutcome::Failure {
            message: format!("took {elapsed}ms, budget is {max}ms"),
        },
        _ => StepOutcome::Success,
    }
}

fn elapsed_millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Explains a JSON-RPC level rejection of `tools/call`.
fn rejection_detail(err: &HarnessError) -> Option<&'static str> {
    if err.is_invalid_params() {
        Some("server rejected the tool name or arguments (invalid params)")
    } else if err.is_method_not_found() {
        Some("server does not implement tools/call (method not found)")
    } else {
        None
    }
}
