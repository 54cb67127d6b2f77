//! Workspace lifecycle: disposable clones scoped to one task.
//!
//! Each task gets a fresh working copy on its own branch and loses it when
//! the task ends, whatever the outcome. Nothing outside the workspace root
//! is ever touched, so discarding is a plain directory removal.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::subprocess::run_checked;

const GIT_TIMEOUT: Duration = Duration::from_secs(600);

/// How the workspace branch is resolved at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchMode {
    /// Attach to the remote branch when it exists, otherwise start a new
    /// branch off trunk. Implement tasks resume interrupted work this way.
    CreateOrResume,
    /// The remote branch must already exist. Review rounds attach to the
    /// change request's branch and never invent one.
    Existing,
}

/// A materialized working copy checked out on its task's branch.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
}

/// Creates, publishes, and discards task workspaces.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    async fn create(&self, name: &str, branch: &str, mode: BranchMode) -> Result<Workspace>;

    /// Push the workspace's commits to its branch on the remote.
    async fn publish(&self, workspace: &Workspace) -> Result<()>;

    /// Remove the working copy. Callers treat failures as log-only.
    async fn discard(&self, workspace: Workspace) -> Result<()>;
}

/// Clone-per-task [`WorkspaceProvider`] over the git CLI.
pub struct GitWorkspaces {
    root: PathBuf,
    remote: String,
    trunk: String,
}

impl GitWorkspaces {
    pub fn new(root: impl Into<PathBuf>, remote: impl Into<String>, trunk: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            remote: remote.into(),
            trunk: trunk.into(),
        }
    }

    async fn remote_branch_exists(&self, branch: &str) -> Result<bool> {
        let stdout = run_checked(
            "git",
            &["ls-remote", "--heads", &self.remote, branch],
            None,
            GIT_TIMEOUT,
        )
        .await
        .context("failed to query remote branches")?;
        Ok(!stdout.is_empty())
    }
}

#[async_trait]
impl WorkspaceProvider for GitWorkspaces {
    async fn create(&self, name: &str, branch: &str, mode: BranchMode) -> Result<Workspace> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .context(format!("failed to create workspace root: {}", self.root.display()))?;

        let path = self.root.join(name);
        if path.exists() {
            // leftover from an interrupted run
            tokio::fs::remove_dir_all(&path)
                .await
                .context(format!("failed to clear stale workspace: {}", path.display()))?;
        }
        let path_arg = path
            .to_str()
            .context("workspace path is not valid UTF-8")?
            .to_string();

        let on_remote = self.remote_branch_exists(branch).await?;
        match mode {
            BranchMode::Existing => {
                if !on_remote {
                    bail!("remote branch '{branch}' not found");
                }
                run_checked(
                    "git",
                    &["clone", "--branch", branch, "--single-branch", &self.remote, &path_arg],
                    None,
                    GIT_TIMEOUT,
                )
                .await?;
            }
            BranchMode::CreateOrResume if on_remote => {
                run_checked(
                    "git",
                    &["clone", "--branch", branch, "--single-branch", &self.remote, &path_arg],
                    None,
                    GIT_TIMEOUT,
                )
                .await?;
                tracing::info!(branch, "resuming existing remote branch");
            }
            BranchMode::CreateOrResume => {
                run_checked(
                    "git",
                    &["clone", "--branch", &self.trunk, "--single-branch", &self.remote, &path_arg],
                    None,
                    GIT_TIMEOUT,
                )
                .await?;
                run_checked("git", &["switch", "-c", branch], Some(&path), GIT_TIMEOUT).await?;
            }
        }

        tracing::info!(workspace = %path.display(), branch, "workspace ready");
        Ok(Workspace {
            path,
            branch: branch.to_string(),
        })
    }

    async fn publish(&self, workspace: &Workspace) -> Result<()> {
        run_checked(
            "git",
            &["push", "--set-upstream", "origin", &workspace.branch],
            Some(&workspace.path),
            GIT_TIMEOUT,
        )
        .await?;
        tracing::info!(branch = %workspace.branch, "published workspace commits");
        Ok(())
    }

    async fn discard(&self, workspace: Workspace) -> Result<()> {
        match tokio::fs::remove_dir_all(&workspace.path).await {
            Ok(()) => {
                tracing::debug!(workspace = %workspace.path.display(), "workspace discarded");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(format!(
                "failed to remove workspace: {}",
                workspace.path.display()
            )),
        }
    }
}
