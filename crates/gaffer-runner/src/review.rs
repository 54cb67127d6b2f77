//! Review pipeline: route a feedback batch back through the agent on the
//! change request's existing branch.
//!
//! Unlike the implement flow this never invents a branch and never touches
//! labels; the change request stays open and the same branch is updated in
//! place. Failures surface as an error comment on the request.

use anyhow::{Context, Result, bail};
use gaffer_core::feedback::FeedbackBatch;
use gaffer_core::task::TaskKey;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentRequest;
use crate::context::TaskContext;
use crate::prompt;
use crate::subprocess::tail;
use crate::workspace::{BranchMode, Workspace};

pub async fn run_review(
    ctx: Arc<TaskContext>,
    batch: FeedbackBatch,
    cancel: CancellationToken,
) -> Result<()> {
    let request_id = batch.request;
    let mut workspace = None;
    let result = review_batch(&ctx, &batch, &cancel, &mut workspace).await;

    if let Err(err) = &result {
        tracing::error!(request = %request_id, "review task failed: {err:#}");
        let comment = format!("Automated feedback pass failed: {err:#}");
        if let Err(e) = ctx.tracker.post_comment(request_id.as_item(), &comment).await {
            tracing::warn!(request = %request_id, "could not post failure comment: {e:#}");
        }
    }
    if let Some(ws) = workspace.take() {
        ctx.discard_quietly(ws).await;
    }
    result
}

async fn review_batch(
    ctx: &TaskContext,
    batch: &FeedbackBatch,
    cancel: &CancellationToken,
    workspace: &mut Option<Workspace>,
) -> Result<()> {
    // The request's head branch drives both checkout and publish, so
    // updates land exactly where reviewers are looking.
    let branch = ctx
        .tracker
        .change_request_branch(batch.request)
        .await
        .context("failed to resolve change request branch")?;

    let dir = TaskKey::review(batch.request, batch.newest()).dir_slug();
    let ws = workspace.insert(
        ctx.workspaces
            .create(&dir, &branch, BranchMode::Existing)
            .await
            .context("failed to create workspace")?,
    );

    ctx.tracker
        .post_comment(
            batch.request.as_item(),
            &format!("Addressing {} feedback item(s).", batch.len()),
        )
        .await
        .context("failed to post acknowledgement")?;

    let mut request = AgentRequest::new(prompt::review_prompt(batch), ws.path.clone());
    if let Some(token) = ctx.sessions.get(batch.request) {
        request = request.with_resume(token);
    }
    let outcome = ctx.agent.invoke(&request, cancel).await?;
    if !outcome.success() {
        bail!(
            "agent exited with status {}: {}",
            outcome.exit_code,
            tail(&outcome.stderr, 400)
        );
    }
    // Only a successful run may replace the stored token; a failed one
    // must not wipe the session the next round will want to resume.
    if let Some(token) = &outcome.session {
        ctx.sessions.set(batch.request, token.clone());
    }

    ctx.workspaces
        .publish(ws)
        .await
        .context("failed to publish branch")?;
    ctx.tracker
        .post_comment(
            batch.request.as_item(),
            &format!("Pushed updates addressing {} feedback item(s).", batch.len()),
        )
        .await
        .context("failed to post completion comment")?;

    tracing::info!(request = %batch.request, branch = %branch, "review task published");
    Ok(())
}
