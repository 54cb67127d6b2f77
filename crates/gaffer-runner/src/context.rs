//! Shared dependencies handed to every task handler.

use gaffer_core::config::Config;
use gaffer_core::session::SessionStore;
use std::sync::Arc;

use crate::agent::CodingAgent;
use crate::tracker::Tracker;
use crate::workspace::{Workspace, WorkspaceProvider};

/// Label names the implement flow moves items through.
#[derive(Debug, Clone)]
pub struct Labels {
    pub trigger: String,
    pub in_progress: String,
    pub failure: String,
}

/// Everything a task pipeline needs, shared across all handlers.
///
/// Collaborators are trait objects so tests can substitute recording
/// fakes for the `gh`/`git`/agent implementations.
pub struct TaskContext {
    pub tracker: Arc<dyn Tracker>,
    pub agent: Arc<dyn CodingAgent>,
    pub workspaces: Arc<dyn WorkspaceProvider>,
    pub sessions: SessionStore,
    pub labels: Labels,
    /// Base branch for new change requests.
    pub trunk: String,
    /// Repo-relative task-list document rendered into implement prompts.
    pub tasklist_doc: Option<String>,
}

impl TaskContext {
    pub fn from_config(
        config: &Config,
        tracker: Arc<dyn Tracker>,
        agent: Arc<dyn CodingAgent>,
        workspaces: Arc<dyn WorkspaceProvider>,
    ) -> Self {
        Self {
            tracker,
            agent,
            workspaces,
            sessions: SessionStore::new(),
            labels: Labels {
                trigger: config.tracker.trigger_label.clone(),
                in_progress: config.tracker.in_progress_label.clone(),
                failure: config.tracker.failure_label.clone(),
            },
            trunk: config.workspace.trunk.clone(),
            tasklist_doc: config.workspace.tasklist_doc.clone(),
        }
    }

    /// Best-effort workspace teardown. Failures are logged, never
    /// escalated; a stray directory is cleared by the next run anyway.
    pub async fn discard_quietly(&self, workspace: Workspace) {
        let path = workspace.path.clone();
        if let Err(e) = self.workspaces.discard(workspace).await {
            tracing::warn!(workspace = %path.display(), "workspace discard failed: {e:#}");
        }
    }
}
