//! Child-process transport: the server's stdin/stdout is the channel.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{LineChannel, RpcChannel};
use crate::error::HarnessError;

/// How to launch a server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Program to execute, resolved through `PATH`.
    pub command: String,
    /// Ordered arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; inherits the harness's when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables on top of the inherited environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Command line as a single display string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A spawned server and the line channel over its stdio.
///
/// The child is spawned with kill-on-drop, so dropping the channel (for
/// example when the harness is interrupted) never orphans the server.
pub struct ProcessChannel {
    channel: LineChannel<ChildStdout, ChildStdin>,
    child: Option<Child>,
    stderr_task: Option<JoinHandle<()>>,
    close_timeout: Duration,
    command: String,
}

impl std::fmt::Debug for ProcessChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessChannel")
            .field("command", &self.command)
            .field("running", &self.child.is_some())
            .finish()
    }
}

impl ProcessChannel {
    /// Spawn the server described by `spec`. Must be called inside a Tokio runtime.
    ///
    /// `close_timeout` bounds how long [`RpcChannel::shutdown`] waits for the
    /// process to exit after its stdin is closed before killing it.
    pub fn spawn(spec: &LaunchSpec, close_timeout: Duration) -> Result<Self, HarnessError> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            HarnessError::connection(format!("Failed to spawn '{}': {e}", spec.command_line()))
        })?;

        info!(
            target: "mcp.conformance",
            command = %spec.command_line(),
            pid = child.id().unwrap_or_default(),
            "Spawned server process"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::connection("Failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::connection("Failed to capture child stdout"))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "mcp.conformance.server", "{line}");
                }
            })
        });

        Ok(Self {
            channel: LineChannel::new(stdout, stdin, "stdio"),
            child: Some(child),
            stderr_task,
            close_timeout,
            command: spec.command_line(),
        })
    }
}

#[async_trait]
impl RpcChannel for ProcessChannel {
    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, HarnessError> {
        self.channel.request(method, params).await
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), HarnessError> {
        self.channel.notify(method, params).await
    }

    async fn shutdown(&mut self) -> Result<(), HarnessError> {
        self.channel.shutdown().await?;

        let mut outcome = Ok(());
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(self.close_timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(
                        target: "mcp.conformance",
                        command = %self.command,
                        %status,
                        "Server exited"
                    );
                },
                Ok(Err(e)) => {
                    outcome = Err(HarnessError::connection(format!(
                        "Failed to wait for server exit: {e}"
                    )));
                },
                Err(_) => {
                    warn!(
                        target: "mcp.conformance",
                        command = %self.command,
                        "Server still running {}ms after stdin closed; killing",
                        self.close_timeout.as_millis()
                    );
                    if let Err(e) = child.kill().await {
                        outcome = Err(HarnessError::connection(format!(
                            "Failed to kill server process: {e}"
                        )));
                    }
                },
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        outcome
    }

    fn transport_type(&self) -> &'static str {
        "stdio"
    }
}
