//! Issue-tracker boundary.
//!
//! [`Tracker`] names the handful of operations the orchestrator performs
//! against the tracker; [`GhTracker`] implements them over the `gh` CLI.
//! Feedback arrives over two feeds with different shapes (discussion
//! comments and inline review comments); both are normalized into
//! [`FeedbackEntry`] here so the rest of the system sees one
//! representation.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use gaffer_core::feedback::{FeedbackEntry, FeedbackKind, RequestId};
use gaffer_core::item::{ItemId, WorkItem};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::subprocess::run_checked;

const GH_TIMEOUT: Duration = Duration::from_secs(60);

/// Fields for opening a change request.
#[derive(Debug, Clone)]
pub struct NewChangeRequest {
    pub title: String,
    pub body: String,
    pub head_branch: String,
    /// Target branch; the tracker's default branch when `None`.
    pub base_branch: Option<String>,
}

/// A freshly created change request.
#[derive(Debug, Clone)]
pub struct CreatedRequest {
    pub id: RequestId,
    pub url: String,
}

/// Tracker operations the orchestrator needs.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Open items carrying `label`.
    async fn list_items_with_label(&self, label: &str) -> Result<Vec<WorkItem>>;

    /// Feedback on open change requests written strictly after `since`,
    /// normalized and ordered oldest first.
    async fn list_feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackEntry>>;

    async fn create_change_request(&self, request: NewChangeRequest) -> Result<CreatedRequest>;

    async fn post_comment(&self, item: ItemId, body: &str) -> Result<()>;

    async fn add_label(&self, item: ItemId, label: &str) -> Result<()>;

    /// Removing a label the item does not carry is not an error.
    async fn remove_label(&self, item: ItemId, label: &str) -> Result<()>;

    /// Head branch of an existing change request.
    async fn change_request_branch(&self, request: RequestId) -> Result<String>;

    /// Auth and connectivity probe, used by `gaffer check`.
    async fn health_check(&self) -> Result<()>;
}

/// [`Tracker`] over the `gh` CLI, scoped to one repository.
pub struct GhTracker {
    repo: String,
    /// Our own login; feedback from this author is dropped so the
    /// orchestrator's comments never come back as review feedback.
    bot_author: String,
}

impl GhTracker {
    pub fn new(repo: impl Into<String>, bot_author: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            bot_author: bot_author.into(),
        }
    }

    /// Login of the account `gh` is authenticated as. Callers without a
    /// configured bot author resolve this once at startup so the
    /// own-comment exclusion always has a concrete login to drop.
    pub async fn authenticated_login() -> Result<String> {
        let stdout = run_checked("gh", &["api", "user", "--jq", ".login"], None, GH_TIMEOUT)
            .await
            .context("failed to query the authenticated gh account")?;
        let login = stdout.trim().to_string();
        if login.is_empty() {
            bail!("gh reported an empty login");
        }
        Ok(login)
    }

    /// Run a repo-scoped `gh` subcommand.
    async fn gh(&self, args: &[&str]) -> Result<String> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 2);
        full.extend_from_slice(args);
        full.push("-R");
        full.push(&self.repo);
        run_checked("gh", &full, None, GH_TIMEOUT).await
    }

    /// Run a raw API request, following pagination. Paths carry the repo
    /// slug explicitly because `gh api` does not resolve `-R`.
    async fn gh_api(&self, path: &str) -> Result<String> {
        run_checked("gh", &["api", "--paginate", path], None, GH_TIMEOUT).await
    }

    async fn open_request_numbers(&self) -> Result<HashSet<RequestId>> {
        let stdout = self
            .gh(&["pr", "list", "--state", "open", "--json", "number", "--limit", "200"])
            .await?;
        let requests: Vec<RequestSummary> =
            serde_json::from_str(&stdout).context("failed to parse open change request list")?;
        Ok(requests.into_iter().map(|r| RequestId(r.number)).collect())
    }
}

#[async_trait]
impl Tracker for GhTracker {
    async fn list_items_with_label(&self, label: &str) -> Result<Vec<WorkItem>> {
        let stdout = self
            .gh(&[
                "issue",
                "list",
                "--label",
                label,
                "--state",
                "open",
                "--json",
                "number,title,body,labels",
                "--limit",
                "100",
            ])
            .await?;
        let issues: Vec<IssueSummary> =
            serde_json::from_str(&stdout).context("failed to parse item list")?;
        Ok(issues
            .into_iter()
            .map(|issue| WorkItem {
                id: ItemId(issue.number),
                title: issue.title,
                body: issue.body,
                labels: issue.labels.into_iter().map(|l| l.name).collect(),
            })
            .collect())
    }

    async fn list_feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackEntry>> {
        let open = self.open_request_numbers().await?;
        if open.is_empty() {
            return Ok(Vec::new());
        }

        // The API's `since` filters on update time, which is a superset of
        // what we want; creation time is re-checked below.
        let since_arg = since.to_rfc3339_opts(SecondsFormat::Secs, true);

        let discussion: Vec<DiscussionComment> = {
            let path = format!(
                "repos/{}/issues/comments?since={}&per_page=100",
                self.repo, since_arg
            );
            parse_paged(&self.gh_api(&path).await?)
                .context("failed to parse discussion comment feed")?
        };
        let inline: Vec<InlineComment> = {
            let path = format!(
                "repos/{}/pulls/comments?since={}&per_page=100",
                self.repo, since_arg
            );
            parse_paged(&self.gh_api(&path).await?)
                .context("failed to parse inline comment feed")?
        };

        let entries = collect_feedback(discussion, inline, since, &open, &self.bot_author);

        tracing::debug!(
            count = entries.len(),
            since = %since_arg,
            "collected feedback entries"
        );
        Ok(entries)
    }

    async fn create_change_request(&self, request: NewChangeRequest) -> Result<CreatedRequest> {
        let mut args = vec![
            "pr",
            "create",
            "--head",
            request.head_branch.as_str(),
            "--title",
            request.title.as_str(),
            "--body",
            request.body.as_str(),
        ];
        if let Some(base) = request.base_branch.as_deref() {
            args.push("--base");
            args.push(base);
        }
        let stdout = self.gh(&args).await?;
        let created = parse_created_request(&stdout)?;
        tracing::info!(request = %created.id, url = %created.url, "created change request");
        Ok(created)
    }

    async fn post_comment(&self, item: ItemId, body: &str) -> Result<()> {
        let number = item.0.to_string();
        self.gh(&["issue", "comment", &number, "--body", body]).await?;
        Ok(())
    }

    async fn add_label(&self, item: ItemId, label: &str) -> Result<()> {
        let number = item.0.to_string();
        self.gh(&["issue", "edit", &number, "--add-label", label]).await?;
        Ok(())
    }

    async fn remove_label(&self, item: ItemId, label: &str) -> Result<()> {
        let number = item.0.to_string();
        self.gh(&["issue", "edit", &number, "--remove-label", label]).await?;
        Ok(())
    }

    async fn change_request_branch(&self, request: RequestId) -> Result<String> {
        let number = request.0.to_string();
        let stdout = self
            .gh(&["pr", "view", &number, "--json", "headRefName"])
            .await?;
        let view: RequestView = serde_json::from_str(&stdout)
            .context(format!("failed to parse change request {request}"))?;
        Ok(view.head_ref_name)
    }

    async fn health_check(&self) -> Result<()> {
        run_checked("gh", &["auth", "status"], None, GH_TIMEOUT).await?;
        run_checked(
            "gh",
            &["repo", "view", &self.repo, "--json", "name"],
            None,
            GH_TIMEOUT,
        )
        .await?;
        Ok(())
    }
}

// ─── Wire formats ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IssueSummary {
    number: u64,
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    labels: Vec<LabelInfo>,
}

#[derive(Debug, Deserialize)]
struct LabelInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RequestSummary {
    number: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestView {
    head_ref_name: String,
}

/// Repo-level issue comment feed entry. Covers comments on plain items and
/// on change request discussion threads; the two are told apart by URL.
#[derive(Debug, Deserialize)]
struct DiscussionComment {
    id: u64,
    #[serde(default)]
    body: String,
    created_at: DateTime<Utc>,
    html_url: String,
    user: CommentAuthor,
}

/// Review comment feed entry, anchored to a file position.
#[derive(Debug, Deserialize)]
struct InlineComment {
    id: u64,
    #[serde(default)]
    body: String,
    created_at: DateTime<Utc>,
    path: String,
    line: Option<u32>,
    pull_request_url: String,
    user: CommentAuthor,
}

#[derive(Debug, Deserialize)]
struct CommentAuthor {
    login: String,
}

/// Request number from an `html_url` like
/// `https://github.com/acme/widgets/pull/42#issuecomment-9`. Comments on
/// plain items have an `/issues/` URL and yield `None`.
fn request_from_html_url(url: &str) -> Option<RequestId> {
    let rest = url.split_once("/pull/")?.1;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok().map(RequestId)
}

/// Request number from an API `pull_request_url` like
/// `https://api.github.com/repos/acme/widgets/pulls/42`.
fn request_from_api_url(url: &str) -> Option<RequestId> {
    url.rsplit('/').next()?.parse().ok().map(RequestId)
}

fn normalize_discussion_comment(comment: DiscussionComment) -> Option<FeedbackEntry> {
    let request = request_from_html_url(&comment.html_url)?;
    Some(FeedbackEntry {
        id: comment.id,
        request,
        author: comment.user.login,
        body: comment.body,
        kind: FeedbackKind::Discussion,
        created_at: comment.created_at,
    })
}

fn normalize_inline_comment(comment: InlineComment) -> Option<FeedbackEntry> {
    let request = request_from_api_url(&comment.pull_request_url)?;
    Some(FeedbackEntry {
        id: comment.id,
        request,
        author: comment.user.login,
        body: comment.body,
        kind: FeedbackKind::Inline {
            path: comment.path,
            line: comment.line,
        },
        created_at: comment.created_at,
    })
}

/// `gh api --paginate` concatenates page bodies, so an array endpoint
/// prints one JSON array per page, back to back. Deserialize every page
/// and merge, so a window spanning several pages loses nothing.
fn parse_paged<T: serde::de::DeserializeOwned>(stdout: &str) -> serde_json::Result<Vec<T>> {
    let mut merged = Vec::new();
    for page in serde_json::Deserializer::from_str(stdout).into_iter::<Vec<T>>() {
        merged.extend(page?);
    }
    Ok(merged)
}

/// Merge both feeds into ordered feedback, keeping entries created
/// strictly after `since` on requests that are still open. Anything
/// written by `bot_author` is dropped so the orchestrator's own
/// acknowledgement and completion comments never come back as fresh
/// feedback.
fn collect_feedback(
    discussion: Vec<DiscussionComment>,
    inline: Vec<InlineComment>,
    since: DateTime<Utc>,
    open: &HashSet<RequestId>,
    bot_author: &str,
) -> Vec<FeedbackEntry> {
    let mut entries: Vec<FeedbackEntry> = discussion
        .into_iter()
        .filter_map(normalize_discussion_comment)
        .chain(inline.into_iter().filter_map(normalize_inline_comment))
        .filter(|entry| entry.created_at > since)
        .filter(|entry| open.contains(&entry.request))
        .filter(|entry| entry.author != bot_author)
        .collect();
    entries.sort_by_key(|entry| (entry.created_at, entry.id));
    entries
}

/// `gh pr create` prints the new request's URL on its final stdout line.
fn parse_created_request(stdout: &str) -> Result<CreatedRequest> {
    let url = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.contains("/pull/"))
        .context("no change request URL in gh output")?;
    let id = request_from_html_url(url).context("malformed change request URL")?;
    Ok(CreatedRequest {
        id,
        url: url.to_string(),
    })
}
