//! mcp-conformance: run a conformance scenario against an MCP tool server.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use mcp_conformance::report::write_report;
use mcp_conformance::{ConformanceRunner, OutputFormat, ResultReporter, Scenario};

/// Exit status for configuration and other startup failures.
const STARTUP_ERROR: u8 = 2;

/// Protocol conformance harness for MCP tool servers
#[derive(Parser)]
#[command(name = "mcp-conformance")]
#[command(
    about = "Check that an MCP server lists and runs its tools correctly",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario and report per-step results
    ///
    /// Exits 0 when every step passed, 1 when any step failed and 2 when the
    /// run could not start.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Scenario file (TOML, or YAML/JSON by extension)
    #[arg(long, env = "MCP_CONFORMANCE_SCENARIO", default_value = "mcp-conformance.toml")]
    scenario: PathBuf,

    /// Output format for the report on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    /// Also write the JSON report to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Disable coloured output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(STARTUP_ERROR)
        },
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: RunArgs) -> Result<u8> {
    let scenario = Scenario::load(&args.scenario)
        .with_context(|| format!("cannot start run from {}", args.scenario.display()))?;
    let reporter = ResultReporter::new(args.format, args.no_color);
    let runner = ConformanceRunner::new(scenario);

    // Losing the race drops the run future, and with it any spawned server.
    let report = tokio::select! {
        report = runner.run() => report,
        signal = shutdown_signal() => {
            warn!(target: "mcp.conformance", signal, "Interrupted, abandoning run");
            return Ok(STARTUP_ERROR);
        }
    };

    println!("{}", reporter.render(&report)?);
    if let Some(path) = &args.output {
        write_report(&report, path)
            .with_context(|| format!("cannot write report to {}", path.display()))?;
    }
    Ok(reporter.exit_code(&report))
}

/// Resolves with the signal name on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(target: "mcp.conformance", "Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(target: "mcp.conformance", "Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => "interrupt",
        () = terminate => "terminate",
    }
}
