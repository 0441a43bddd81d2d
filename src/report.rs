//! Run results and the JSON report.
//!
//! A [`RunReport`] is the terminal artifact of one run: the ordered
//! [`StepResult`]s plus an [`OverallOutcome`] derived from them. It is
//! self-contained so a JSON report file can be read without the scenario.

use std::path::Path;

use serde::Serialize;

use crate::types::{ServerInfo, ToolDescriptor};

/// Schema version for the JSON report format.
///
/// Increment when making breaking changes to the report structure.
pub const SCHEMA_VERSION: &str = "1.0";

/// Longest `details` string kept in a step result.
pub const MAX_DETAIL_CHARS: usize = 200;

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure {
        message: String,
    },
    /// Only produced by the `connect` step.
    FatalError {
        message: String,
        detail: String,
    },
    /// Scheduled but never attempted because `connect` failed.
    Skipped {
        reason: String,
    },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short lowercase label, e.g. for table output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "passed",
            Self::Failure { .. } => "failed",
            Self::FatalError { .. } => "fatal",
            Self::Skipped { .. } => "skipped",
        }
    }

    /// Error message carried by the outcome, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failure { message } | Self::FatalError { message, .. } => Some(message),
            Self::Skipped { reason } => Some(reason),
        }
    }
}

/// Record of one attempted (or skipped) step. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub step_name: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    pub elapsed_millis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl StepResult {
    pub fn new(step_name: impl Into<String>, outcome: StepOutcome, elapsed_millis: u64) -> Self {
        Self {
            step_name: step_name.into(),
            outcome,
            elapsed_millis,
            details: None,
        }
    }

    pub fn skipped(step_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            step_name,
            StepOutcome::Skipped {
                reason: reason.into(),
            },
            0,
        )
    }

    /// Attach details, truncated to [`MAX_DETAIL_CHARS`].
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(truncate_detail(&details.into()));
        self
    }
}

/// Verdict over every step of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallOutcome {
    AllPassed,
    SomeFailed,
}

impl OverallOutcome {
    /// `AllPassed` iff every step succeeded.
    pub fn from_steps(steps: &[StepResult]) -> Self {
        if steps.iter().all(|s| s.outcome.is_success()) {
            Self::AllPassed
        } else {
            Self::SomeFailed
        }
    }
}

/// Full ordered outcome of one conformance run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema_version: String,
    /// RFC 3339 timestamp of report creation.
    pub timestamp: String,
    pub scenario: String,
    /// Absent when the run never connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerInfo>,
    /// Catalog as fetched, absent when listing failed or never ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<Vec<ToolDescriptor>>,
    pub steps: Vec<StepResult>,
    pub overall_outcome: OverallOutcome,
    pub duration_ms: u64,
}

impl RunReport {
    /// Build a report, deriving the overall outcome from `steps`.
    pub fn new(
        scenario: impl Into<String>,
        server: Option<ServerInfo>,
        catalog: Option<Vec<ToolDescriptor>>,
        steps: Vec<StepResult>,
        duration_ms: u64,
    ) -> Self {
        let overall_outcome = OverallOutcome::from_steps(&steps);
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            scenario: scenario.into(),
            server,
            catalog,
            steps,
            overall_outcome,
            duration_ms,
        }
    }

    /// Process exit status: 0 when every step passed, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self.overall_outcome {
            OverallOutcome::AllPassed => 0,
            OverallOutcome::SomeFailed => 1,
        }
    }

    pub fn passed(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.is_success()).count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Write `report` as pretty JSON to `path`, creating parent directories.
pub fn write_report(report: &RunReport, path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = report.to_json().map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

/// Cut `text` to [`MAX_DETAIL_CHARS`] characters, marking the cut with `...`.
pub fn truncate_detail(text: &str) -> String {
    if text.chars().count() <= MAX_DETAIL_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX_DETAIL_CHARS).collect();
        format!("{cut}...")
    }
}
