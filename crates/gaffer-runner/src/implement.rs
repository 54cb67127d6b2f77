//! Implement pipeline: turn a labeled work item into a change request.
//!
//! Stages: claim the item (label swap plus acknowledgement), materialize a
//! workspace on the item's branch, run the agent, publish the branch and
//! open the change request, then report back on the item. Any failure
//! lands in the compensation path, and the workspace is discarded on every
//! exit.

use anyhow::{Context, Result, bail};
use gaffer_core::item::{ItemId, WorkItem};
use gaffer_core::task::TaskKey;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRequest, extract_decision_points};
use crate::context::TaskContext;
use crate::prompt;
use crate::subprocess::tail;
use crate::tracker::NewChangeRequest;
use crate::workspace::{BranchMode, Workspace};

pub async fn run_implement(
    ctx: Arc<TaskContext>,
    item: WorkItem,
    cancel: CancellationToken,
) -> Result<()> {
    let item_id = item.id;
    let mut workspace = None;
    let result = implement_item(&ctx, &item, &cancel, &mut workspace).await;

    if let Err(err) = &result {
        tracing::error!(item = %item_id, "implement task failed: {err:#}");
        report_failure(&ctx, item_id, err).await;
    }
    if let Some(ws) = workspace.take() {
        ctx.discard_quietly(ws).await;
    }
    result
}

async fn implement_item(
    ctx: &TaskContext,
    item: &WorkItem,
    cancel: &CancellationToken,
    workspace: &mut Option<Workspace>,
) -> Result<()> {
    let branch = item.branch_name();

    // Claim the item first. If this fails there is nothing to clean up and
    // the trigger label keeps the item eligible for a later cycle.
    ctx.tracker
        .remove_label(item.id, &ctx.labels.trigger)
        .await
        .context("failed to remove trigger label")?;
    ctx.tracker
        .add_label(item.id, &ctx.labels.in_progress)
        .await
        .context("failed to add in-progress label")?;
    ctx.tracker
        .post_comment(item.id, &format!("Picking this up. Work happens on `{branch}`."))
        .await
        .context("failed to post acknowledgement")?;

    let dir = TaskKey::implement(item.id).dir_slug();
    let ws = workspace.insert(
        ctx.workspaces
            .create(&dir, &branch, BranchMode::CreateOrResume)
            .await
            .context("failed to create workspace")?,
    );

    let tasklist = read_tasklist(&ws.path, ctx.tasklist_doc.as_deref()).await;
    let request = AgentRequest::new(
        prompt::implement_prompt(item, tasklist.as_deref()),
        ws.path.clone(),
    );
    let outcome = ctx.agent.invoke(&request, cancel).await?;
    if !outcome.success() {
        bail!(
            "agent exited with status {}: {}",
            outcome.exit_code,
            tail(&outcome.stderr, 400)
        );
    }

    ctx.workspaces
        .publish(ws)
        .await
        .context("failed to publish branch")?;

    let decisions = extract_decision_points(&outcome.text());
    let created = ctx
        .tracker
        .create_change_request(NewChangeRequest {
            title: prompt::change_request_title(item),
            body: prompt::change_request_body(item, &decisions, outcome.session.as_deref()),
            head_branch: branch,
            base_branch: Some(ctx.trunk.clone()),
        })
        .await
        .context("failed to create change request")?;

    if let Some(token) = &outcome.session {
        ctx.sessions.set(created.id, token.clone());
    }

    ctx.tracker
        .post_comment(
            item.id,
            &format!("Opened change request {}: {}", created.id, created.url),
        )
        .await
        .context("failed to post change request link")?;
    ctx.tracker
        .remove_label(item.id, &ctx.labels.in_progress)
        .await
        .context("failed to remove in-progress label")?;

    tracing::info!(item = %item.id, request = %created.id, "implement task published");
    Ok(())
}

/// Compensation after a failed run. Each step is attempted even when an
/// earlier one fails; the item must not be left looking in-progress.
async fn report_failure(ctx: &TaskContext, item: ItemId, err: &anyhow::Error) {
    if let Err(e) = ctx.tracker.remove_label(item, &ctx.labels.in_progress).await {
        tracing::warn!(item = %item, "could not remove in-progress label: {e:#}");
    }
    if let Err(e) = ctx.tracker.add_label(item, &ctx.labels.failure).await {
        tracing::warn!(item = %item, "could not add failure label: {e:#}");
    }
    let comment = format!("Automated implementation failed: {err:#}");
    if let Err(e) = ctx.tracker.post_comment(item, &comment).await {
        tracing::warn!(item = %item, "could not post failure comment: {e:#}");
    }
}

/// Best-effort read of the repository's task-list document. A missing or
/// unreadable file just means the prompt goes out without it.
async fn read_tasklist(root: &Path, doc: Option<&str>) -> Option<String> {
    let doc = doc?;
    tokio::fs::read_to_string(root.join(doc)).await.ok()
}
