//! Drives the `mcp-conformance` binary end to end.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::NamedTempFile;

const CLI: &str = env!("CARGO_BIN_EXE_mcp-conformance");
const FIXTURE: &str = env!("CARGO_BIN_EXE_mcp-conformance-fixture");

fn scenario_file(extra_args: &str, calls: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
name = "cli"

[settings]
connect_timeout_ms = 2000

[connection]
type = "spawn"
command = '{FIXTURE}'
args = [{extra_args}]

[catalog]
expect_tools = ["EchoCapability"]

{calls}
"#
    )
    .unwrap();
    file
}

const ECHO_CALL: &str = r#"
[[call]]
tool = "EchoCapability"
arguments = { message = "ping" }
expect_text = "ping"
"#;

fn run_cli(args: &[&str]) -> Output {
    Command::new(CLI)
        .args(args)
        .env_remove("MCP_CONFORMANCE_SCENARIO")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn path(file: &NamedTempFile) -> &str {
    file.path().to_str().unwrap()
}

#[test]
fn test_passing_run_exits_zero() {
    let scenario = scenario_file("", ECHO_CALL);
    let output = run_cli(&["run", "--scenario", path(&scenario), "--no-color"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0), "stdout: {stdout}");
    assert!(stdout.contains("ALL PASSED"));
    assert!(stdout.contains("tools/call EchoCapability"));
}

#[test]
fn test_failing_step_exits_one() {
    let calls = format!("{ECHO_CALL}\n[[call]]\ntool = \"DoesNotExist\"\n");
    let scenario = scenario_file("", &calls);
    let output = run_cli(&["run", "--scenario", path(&scenario), "--no-color"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(1), "stdout: {stdout}");
    assert!(stdout.contains("Unknown tool: DoesNotExist"));
    assert!(stdout.contains("SOME FAILED"));
}

#[test]
fn test_connect_timeout_exits_one() {
    let scenario = scenario_file("\"--hang-on-initialize\"", ECHO_CALL);
    let output = run_cli(&["run", "--scenario", path(&scenario), "--format", "json"]);

    assert_eq!(output.status.code(), Some(1));
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["steps"][0]["step_name"], "connect");
    assert_eq!(report["steps"][0]["status"], "fatal_error");
    assert_eq!(report["steps"][1]["status"], "skipped");
}

#[test]
fn test_json_report_written_to_file() {
    let scenario = scenario_file("", ECHO_CALL);
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("out").join("report.json");
    let output = run_cli(&[
        "run",
        "--scenario",
        path(&scenario),
        "--output",
        report_path.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(0));
    let report: Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["scenario"], "cli");
    assert_eq!(report["overall_outcome"], "all_passed");
    assert_eq!(report["server"]["name"], "mcp-conformance-fixture");
}

#[test]
fn test_scenario_from_environment() {
    let scenario = scenario_file("", ECHO_CALL);
    let output = Command::new(CLI)
        .args(["run", "--no-color"])
        .env("MCP_CONFORMANCE_SCENARIO", scenario.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_missing_scenario_exits_two() {
    let output = run_cli(&["run", "--scenario", "/nonexistent/mcp-conformance.toml"]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot start run"), "stderr: {stderr}");
}

#[test]
fn test_invalid_scenario_exits_two() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(file, "[connection]\ntype = \"spawn\"\ncommand = \"\"\n").unwrap();
    let output = run_cli(&["run", "--scenario", path(&file)]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connection.command"), "stderr: {stderr}");
}

#[test]
fn test_unwritable_report_exits_two() {
    let scenario = scenario_file("", ECHO_CALL);
    let blocker = NamedTempFile::new().unwrap();
    let target = Path::new(path(&blocker)).join("report.json");
    let output = run_cli(&[
        "run",
        "--scenario",
        path(&scenario),
        "--output",
        target.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(2));
}

#[cfg(unix)]
#[test]
fn test_sigterm_abandons_run_and_exits_two() {
    let calls = "[[call]]\ntool = \"SlowCapability\"\narguments = { millis = 4000 }\n";
    let scenario = scenario_file("", calls);
    let child = Command::new(CLI)
        .args(["run", "--scenario", path(&scenario), "--no-color"])
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    // Land inside the slow call, after the signal handlers are installed.
    std::thread::sleep(Duration::from_millis(1500));
    let started = Instant::now();
    let status = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let output = child.wait_with_output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(2), "stderr: {stderr}");
    assert!(stderr.contains("Interrupted, abandoning run"), "stderr: {stderr}");
    assert!(stderr.contains("terminate"), "stderr: {stderr}");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(output.stdout.is_empty());
}
