//! Presentation of a [`RunReport`]: coloured text or JSON, plus exit status.

use std::io::IsTerminal;

use colored::{ColoredString, Colorize};

use crate::report::{OverallOutcome, RunReport, StepOutcome};

/// Output format for the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable step table.
    #[default]
    Pretty,
    /// The JSON report document.
    Json,
}

/// Renders run reports. The core never formats output itself.
#[derive(Debug, Clone)]
pub struct ResultReporter {
    format: OutputFormat,
    color: bool,
}

impl ResultReporter {
    /// Create a reporter.
    ///
    /// Colour is disabled when `no_color` is set or stdout is not a terminal.
    pub fn new(format: OutputFormat, no_color: bool) -> Self {
        let color = !no_color && std::io::stdout().is_terminal();
        if !color {
            colored::control::set_override(false);
        }
        Self { format, color }
    }

    /// Reporter that never emits escape codes, regardless of the terminal.
    pub fn plain(format: OutputFormat) -> Self {
        Self { format, color: false }
    }

    pub fn render(&self, report: &RunReport) -> Result<String, serde_json::Error> {
        match self.format {
            OutputFormat::Json => report.to_json(),
            OutputFormat::Pretty => Ok(self.render_pretty(report)),
        }
    }

    /// Process exit status for `report`.
    pub fn exit_code(&self, report: &RunReport) -> u8 {
        report.exit_code()
    }

    fn paint(&self, text: &str, style: fn(&str) -> ColoredString) -> String {
        if self.color {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn render_pretty(&self, report: &RunReport) -> String {
        let mut out = String::new();

        let heading = format!("Scenario: {}", report.scenario);
        out.push_str(&self.paint(&heading, |s| s.bold()));
        if let Some(server) = &report.server {
            out.push_str(&format!(
                "  (server {} {}, protocol {})",
                server.name, server.version, server.protocol_version
            ));
        }
        out.push_str("\n\n");

        let width = report
            .steps
            .iter()
            .map(|s| s.step_name.chars().count())
            .max()
            .unwrap_or(0);

        for step in &report.steps {
            let marker = match &step.outcome {
                StepOutcome::Success => self.paint("✓", |s| s.green()),
                StepOutcome::Failure { .. } => self.paint("✗", |s| s.red()),
                StepOutcome::FatalError { .. } => self.paint("✗", |s| s.red().bold()),
                StepOutcome::Skipped { .. } => self.paint("-", |s| s.dimmed()),
            };
            out.push_str(&format!(
                "  {marker} {:<width$}  {:>6}ms",
                step.step_name, step.elapsed_millis
            ));
            if let Some(details) = &step.details {
                out.push_str(&format!("  {}", self.paint(details, |s| s.dimmed())));
            }
            out.push('\n');

            match &step.outcome {
                StepOutcome::Success => {},
                StepOutcome::Failure { message } => {
                    out.push_str(&format!("      {}\n", self.paint(message, |s| s.red())));
                },
                StepOutcome::FatalError { message, detail } => {
                    out.push_str(&format!("      {}\n", self.paint(message, |s| s.red())));
                    out.push_str(&format!("      while trying to {detail}\n"));
                },
                StepOutcome::Skipped { reason } => {
                    out.push_str(&format!("      skipped: {reason}\n"));
                },
            }
        }

        let verdict = match report.overall_outcome {
            OverallOutcome::AllPassed => self.paint("ALL PASSED", |s| s.green().bold()),
            OverallOutcome::SomeFailed => self.paint("SOME FAILED", |s| s.red().bold()),
        };
        out.push_str(&format!(
            "\nResult: {verdict} ({}/{} steps passed) in {}ms\n",
            report.passed(),
            report.steps.len(),
            report.duration_ms
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::StepResult;
    use crate::types::ServerInfo;

    fn failing_report() -> RunReport {
        RunReport::new(
            "demo",
            Some(ServerInfo {
                name: "fixture".to_string(),
                version: "0.1.0".to_string(),
                protocol_version: "2024-11-05".to_string(),
            }),
            None,
            vec![
                StepResult::new("connect", StepOutcome::Success, 4),
                StepResult::new(
                    "tools/call DoesNotExist",
                    StepOutcome::Failure {
                        message: "Server error: Unknown tool: DoesNotExist".to_string(),
                    },
                    1,
                ),
                StepResult::new("disconnect", StepOutcome::Success, 0),
            ],
            9,
        )
    }

    #[test]
    fn test_pretty_lists_every_step_in_order() {
        let text = ResultReporter::plain(OutputFormat::Pretty)
            .render(&failing_report())
            .unwrap();
        let connect = text.find("✓ connect").unwrap();
        let call = text.find("✗ tools/call DoesNotExist").unwrap();
        let disconnect = text.find("✓ disconnect").unwrap();
        assert!(connect < call && call < disconnect);
        assert!(text.contains("Unknown tool: DoesNotExist"));
        assert!(text.contains("server fixture 0.1.0"));
        assert!(text.contains("Result: SOME FAILED (2/3 steps passed) in 9ms"));
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn test_pretty_fatal_and_skipped() {
        let report = RunReport::new(
            "down",
            None,
            None,
            vec![
                StepResult::new(
                    "connect",
                    StepOutcome::FatalError {
                        message: "Connection error: refused".to_string(),
                        detail: "attach tcp://localhost:3333".to_string(),
                    },
                    2,
                ),
                StepResult::skipped("tools/list", "connect failed"),
            ],
            2,
        );
        let text = ResultReporter::plain(OutputFormat::Pretty).render(&report).unwrap();
        assert!(text.contains("while trying to attach tcp://localhost:3333"));
        assert!(text.contains("- tools/list"));
        assert!(text.contains("skipped: connect failed"));
    }

    #[test]
    fn test_json_output_parses() {
        let reporter = ResultReporter::plain(OutputFormat::Json);
        let text = reporter.render(&failing_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["overall_outcome"], "some_failed");
        assert_eq!(reporter.exit_code(&failing_report()), 1);
    }
}
