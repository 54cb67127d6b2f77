//! Configuration for the orchestrator.
//!
//! One TOML file with sections for the tracker, workspaces, the agent CLI,
//! and the poller. Every field has a default so a minimal config only
//! needs the repository slug.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub poller: PollerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Repository slug, e.g. "acme/widgets".
    #[serde(default)]
    pub repo: String,
    /// Items carrying this label are picked up for implementation.
    #[serde(default = "default_trigger_label")]
    pub trigger_label: String,
    #[serde(default = "default_in_progress_label")]
    pub in_progress_label: String,
    #[serde(default = "default_failure_label")]
    pub failure_label: String,
    /// Login the orchestrator posts as. Feedback written by this author is
    /// ignored so our own comments are not re-ingested as review feedback.
    /// When unset, the login `gh` is authenticated as is used.
    #[serde(default)]
    pub bot_author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory under which per-task clones are created.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// Clone URL. Defaults to the GitHub HTTPS remote for `tracker.repo`.
    #[serde(default)]
    pub remote: Option<String>,
    /// Base branch for new change requests.
    #[serde(default = "default_trunk")]
    pub trunk: String,
    /// Repo-relative path of a task-list document included in implement
    /// prompts when the file exists in the workspace.
    #[serde(default = "default_tasklist_doc")]
    pub tasklist_doc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent CLI binary.
    #[serde(default = "default_agent_command")]
    pub command: String,
    /// Capability allow-list passed through to the agent. Empty means the
    /// agent's own defaults apply.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// Maximum tasks pending or running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// How long shutdown waits for in-flight tasks before cancelling them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_trigger_label() -> String {
    "gaffer".to_string()
}

fn default_in_progress_label() -> String {
    "gaffer-wip".to_string()
}

fn default_failure_label() -> String {
    "gaffer-failed".to_string()
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("workspaces")
}

fn default_trunk() -> String {
    "main".to_string()
}

fn default_tasklist_doc() -> Option<String> {
    Some("TASKS.md".to_string())
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    1200
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    2
}

fn default_shutdown_grace_secs() -> u64 {
    60
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            repo: String::new(),
            trigger_label: default_trigger_label(),
            in_progress_label: default_in_progress_label(),
            failure_label: default_failure_label(),
            bot_author: None,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            remote: None,
            trunk: default_trunk(),
            tasklist_doc: default_tasklist_doc(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            allowed_tools: Vec::new(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            max_concurrent: default_max_concurrent(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .context(format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        tracing::info!(config = %path.display(), repo = %config.tracker.repo, "loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracker.repo.is_empty() {
            bail!("tracker.repo is required (e.g. \"acme/widgets\")");
        }
        if !self.tracker.repo.contains('/') {
            bail!("tracker.repo must be an owner/name slug, got '{}'", self.tracker.repo);
        }
        if self.poller.max_concurrent == 0 {
            bail!("poller.max_concurrent must be at least 1");
        }
        if self.poller.interval_secs == 0 {
            bail!("poller.interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Clone URL for task workspaces.
    pub fn remote_url(&self) -> String {
        self.workspace
            .remote
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}.git", self.tracker.repo))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poller.interval_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.poller.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [tracker]
            repo = "acme/widgets"
            "#,
        )
        .unwrap();

        assert_eq!(config.tracker.repo, "acme/widgets");
        assert_eq!(config.tracker.trigger_label, "gaffer");
        assert_eq!(config.workspace.trunk, "main");
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.poller.max_concurrent, 2);
        assert_eq!(config.poller.interval_secs, 30);
        config.validate().unwrap();
    }

    #[test]
    fn full_config_round_trips() {
        let config: Config = toml::from_str(
            r#"
            [tracker]
            repo = "acme/widgets"
            trigger_label = "ready"
            in_progress_label = "working"
            failure_label = "broken"
            bot_author = "widget-bot"

            [workspace]
            root = "/tmp/gaffer"
            remote = "git@github.com:acme/widgets.git"
            trunk = "develop"
            tasklist_doc = "docs/PLAN.md"

            [agent]
            command = "claude"
            allowed_tools = ["Bash", "Edit"]
            timeout_secs = 600

            [poller]
            interval_secs = 15
            max_concurrent = 4
            shutdown_grace_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.tracker.bot_author.as_deref(), Some("widget-bot"));
        assert_eq!(config.workspace.tasklist_doc.as_deref(), Some("docs/PLAN.md"));
        assert_eq!(config.remote_url(), "git@github.com:acme/widgets.git");
        assert_eq!(config.agent.allowed_tools, vec!["Bash", "Edit"]);
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
    }

    #[test]
    fn remote_url_defaults_to_github_https() {
        let config: Config = toml::from_str("[tracker]\nrepo = \"acme/widgets\"\n").unwrap();
        assert_eq!(config.remote_url(), "https://github.com/acme/widgets.git");
    }

    #[test]
    fn validate_rejects_missing_repo() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_slug_and_zero_concurrency() {
        let mut config = Config::default();
        config.tracker.repo = "widgets".to_string();
        assert!(config.validate().is_err());

        config.tracker.repo = "acme/widgets".to_string();
        config.poller.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_a_file_and_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gaffer.toml");

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("gaffer.toml"));

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[tracker]\nrepo = \"acme/widgets\"").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tracker.repo, "acme/widgets");
    }
}
