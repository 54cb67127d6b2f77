//! Coding-agent invocation.
//!
//! The agent is an opaque subprocess: it receives a prompt and a working
//! directory, edits files and commits as it sees fit, and emits
//! newline-delimited JSON records on stdout. Two things are recovered from
//! that stream after the run: the session identifier used to resume the
//! conversation later, and any decision-point lines the agent printed.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::subprocess;

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(1200);

/// One agent run against a workspace.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub workdir: PathBuf,
    /// Continuation token from an earlier run of the same conversation.
    pub resume: Option<String>,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            workdir: workdir.into(),
            resume: None,
        }
    }

    pub fn with_resume(mut self, token: impl Into<String>) -> Self {
        self.resume = Some(token.into());
        self
    }
}

/// What came back from a finished agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Continuation token found in the output records, if any.
    pub session: Option<String>,
}

impl AgentOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The agent's final prose: the `result` field of the last structured
    /// record carrying one, or the raw output when no record does.
    pub fn text(&self) -> String {
        extract_result_text(&self.stdout).unwrap_or_else(|| self.stdout.clone())
    }
}

/// Boundary to the external code-generation agent.
#[async_trait]
pub trait CodingAgent: Send + Sync {
    /// Run the agent to completion in the request's working directory.
    ///
    /// Cancelling the token kills the subprocess and fails the call. Spawn
    /// failures, timeouts, and cancellation are errors; a non-zero agent
    /// exit is reported through the outcome instead.
    async fn invoke(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome>;

    /// Cheap availability probe, used by `gaffer check`.
    async fn health_check(&self) -> Result<()>;
}

/// The Claude Code CLI driven in non-interactive mode.
pub struct ClaudeCli {
    pub command: String,
    pub allowed_tools: Vec<String>,
    pub timeout: Duration,
}

impl ClaudeCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            allowed_tools: Vec::new(),
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            request.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(token) = &request.resume {
            args.push("--resume".to_string());
            args.push(token.clone());
        }
        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }
        args
    }
}

#[async_trait]
impl CodingAgent for ClaudeCli {
    async fn invoke(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome> {
        let args = self.build_args(request);
        tracing::info!(
            agent = %self.command,
            workdir = %request.workdir.display(),
            resume = request.resume.is_some(),
            prompt_len = request.prompt.len(),
            "invoking agent"
        );

        let child = Command::new(&self.command)
            .args(&args)
            .current_dir(&request.workdir)
            // The CLI refuses to start inside one of its own sessions
            // unless this marker is cleared.
            .env_remove("CLAUDECODE")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(format!("failed to start agent: {}", self.command))?;

        // Dropping the output future kills the child, so both the timeout
        // and the cancellation branch tear the agent down.
        let output = tokio::select! {
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(output) => output.context("failed to collect agent output")?,
                Err(_) => bail!("agent timed out after {}s", self.timeout.as_secs()),
            },
            () = cancel.cancelled() => bail!("agent invocation cancelled"),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let session = extract_session_token(&stdout);
        let exit_code = output.status.code().unwrap_or(-1);
        tracing::info!(exit_code, session_found = session.is_some(), "agent finished");

        Ok(AgentOutcome {
            exit_code,
            stdout,
            stderr,
            session,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let output =
            subprocess::run(&self.command, &["--version"], None, Duration::from_secs(10)).await?;
        if output.success() {
            Ok(())
        } else {
            bail!("{} CLI not available", self.command)
        }
    }
}

/// Scan output lines backward for the most recent record naming a session.
///
/// Unparseable lines are skipped (a timed-out run can truncate the final
/// record mid-write) so an earlier valid record still wins.
pub fn extract_session_token(output: &str) -> Option<String> {
    for line in output.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if let Some(id) = value.get("session_id").and_then(|v| v.as_str()) {
            return Some(id.to_string());
        }
    }
    None
}

/// The `result` field of the last record carrying one.
pub fn extract_result_text(output: &str) -> Option<String> {
    for line in output.lines().rev() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
            continue;
        };
        if let Some(text) = value.get("result").and_then(|v| v.as_str()) {
            return Some(text.to_string());
        }
    }
    None
}

pub const DECISION_POINT_MARKER: &str = "[DECISION_POINT]";

/// A design choice the agent surfaced while working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionPoint {
    pub description: String,
    pub chosen: String,
    pub rejected: String,
}

/// Extract `[DECISION_POINT] <description> | <chosen> | <rejected>` lines
/// from agent output. Marker lines that do not split into exactly three
/// fields are ignored; surrounding whitespace is trimmed from each field.
pub fn extract_decision_points(output: &str) -> Vec<DecisionPoint> {
    let mut points = Vec::new();
    for line in output.lines() {
        let Some(rest) = line.trim_start().strip_prefix(DECISION_POINT_MARKER) else {
            continue;
        };
        let fields: Vec<&str> = rest.split('|').map(str::trim).collect();
        if let [description, chosen, rejected] = fields[..] {
            points.push(DecisionPoint {
                description: description.to_string(),
                chosen: chosen.to_string(),
                rejected: rejected.to_string(),
            });
        }
    }
    points
}
