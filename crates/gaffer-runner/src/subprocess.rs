//! Subprocess execution with captured output and timeouts.
//!
//! Every external program the orchestrator drives (`git`, `gh`, the agent
//! CLI) goes through here so spawning, timeouts, and error reporting stay
//! uniform. Programs are invoked directly with an argument vector rather
//! than through a shell; arguments like prompt text need no quoting.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Output from a finished (or timed-out) subprocess.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Run a program to completion, capturing stdout and stderr.
///
/// A timeout is reported through `timed_out` with exit code -1 rather than
/// as an error; failing to spawn at all (missing binary, bad cwd) is an
/// error.
pub async fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CmdOutput> {
    tracing::debug!(program, ?cwd, ?timeout, "spawning subprocess");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let child = command
        .spawn()
        .context(format!("failed to spawn: {program}"))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let result = CmdOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                timed_out: false,
            };
            tracing::debug!(
                exit_code = result.exit_code,
                stdout_len = result.stdout.len(),
                "subprocess completed"
            );
            Ok(result)
        }
        Ok(Err(e)) => Err(e).context(format!("subprocess failed: {program}")),
        Err(_) => {
            tracing::warn!(program, ?timeout, "subprocess timed out");
            Ok(CmdOutput {
                stdout: String::new(),
                stderr: format!("{program} timed out after {}s", timeout.as_secs()),
                exit_code: -1,
                timed_out: true,
            })
        }
    }
}

/// Run a program and require success; returns trimmed stdout.
pub async fn run_checked(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<String> {
    let output = run(program, args, cwd, timeout).await?;
    if !output.success() {
        let summary = args[..args.len().min(2)].join(" ");
        let cause = if output.timed_out {
            "timeout".to_string()
        } else {
            format!("exit {}", output.exit_code)
        };
        anyhow::bail!(
            "{program} {summary} failed ({cause}): {}",
            tail(&output.stderr, 400)
        );
    }
    Ok(output.stdout.trim().to_string())
}

/// Last `max_chars` of a string, trimmed. Keeps subprocess noise out of
/// error messages that end up in tracker comments.
pub(crate) fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(count - max_chars).collect()
    }
}
