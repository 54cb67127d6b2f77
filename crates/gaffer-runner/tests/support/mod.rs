//! Shared test doubles for the task pipelines.
//!
//! All fakes append to one ordered [`CallLog`] so tests can assert the
//! relative order of calls across the tracker, the agent, and the
//! workspace provider, not just per-collaborator counts.

#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use gaffer_core::feedback::{FeedbackEntry, FeedbackKind, RequestId};
use gaffer_core::item::{ItemId, WorkItem};
use gaffer_core::session::SessionStore;
use gaffer_runner::agent::{AgentOutcome, AgentRequest, CodingAgent};
use gaffer_runner::context::{Labels, TaskContext};
use gaffer_runner::tracker::{CreatedRequest, NewChangeRequest, Tracker};
use gaffer_runner::workspace::{BranchMode, Workspace, WorkspaceProvider};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

// ─── Call log ───────────────────────────────────────────────────────────────

/// Ordered record of collaborator calls across all fakes.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_exact(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Assert the calls matching each prefix occur in the given relative
    /// order. Later prefixes are searched only after the previous match,
    /// so a repeated prefix can anchor two different positions.
    pub fn assert_order(&self, sequence: &[&str]) {
        let calls = self.calls();
        let mut start = 0;
        for expected in sequence {
            match calls[start..].iter().position(|c| c.starts_with(expected)) {
                Some(offset) => start += offset + 1,
                None => panic!(
                    "expected a call starting with '{expected}' after position {start};\nlog: {calls:#?}"
                ),
            }
        }
    }
}

// ─── Tracker fake ───────────────────────────────────────────────────────────

pub struct RecordingTracker {
    log: CallLog,
    pub items: Mutex<Vec<WorkItem>>,
    pub feedback: Mutex<Vec<FeedbackEntry>>,
    pub branches: Mutex<HashMap<RequestId, String>>,
    /// Every posted comment, as (item number, body).
    pub comments: Mutex<Vec<(u64, String)>>,
    /// Every change request passed to `create_change_request`.
    pub created: Mutex<Vec<NewChangeRequest>>,
    next_request: AtomicU64,
    fail_once: Mutex<Option<&'static str>>,
}

impl RecordingTracker {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            items: Mutex::new(Vec::new()),
            feedback: Mutex::new(Vec::new()),
            branches: Mutex::new(HashMap::new()),
            comments: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            next_request: AtomicU64::new(100),
            fail_once: Mutex::new(None),
        }
    }

    /// Make the next call to the named method fail once.
    pub fn fail_next(&self, method: &'static str) {
        *self.fail_once.lock().unwrap() = Some(method);
    }

    fn should_fail(&self, method: &str) -> bool {
        let mut slot = self.fail_once.lock().unwrap();
        if *slot == Some(method) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn add_item(&self, item: WorkItem) {
        self.items.lock().unwrap().push(item);
    }

    pub fn add_feedback(&self, entry: FeedbackEntry) {
        self.feedback.lock().unwrap().push(entry);
    }

    pub fn set_branch(&self, request: RequestId, branch: &str) {
        self.branches.lock().unwrap().insert(request, branch.to_string());
    }

    pub fn comments_on(&self, number: u64) -> Vec<String> {
        self.comments
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == number)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl Tracker for RecordingTracker {
    async fn list_items_with_label(&self, label: &str) -> Result<Vec<WorkItem>> {
        self.log.push("list_items");
        if self.should_fail("list_items") {
            bail!("tracker offline");
        }
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.labels.iter().any(|l| l == label))
            .cloned()
            .collect())
    }

    async fn list_feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackEntry>> {
        self.log.push("list_feedback");
        if self.should_fail("list_feedback") {
            bail!("tracker offline");
        }
        let mut entries: Vec<FeedbackEntry> = self
            .feedback
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.created_at > since)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.created_at, entry.id));
        Ok(entries)
    }

    async fn create_change_request(&self, request: NewChangeRequest) -> Result<CreatedRequest> {
        self.log.push(format!("create_request:{}", request.head_branch));
        if self.should_fail("create_request") {
            bail!("tracker offline");
        }
        let id = self.next_request.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push(request);
        Ok(CreatedRequest {
            id: RequestId(id),
            url: format!("https://example.test/acme/widgets/pull/{id}"),
        })
    }

    async fn post_comment(&self, item: ItemId, body: &str) -> Result<()> {
        self.log.push(format!("comment:{}", item.0));
        if self.should_fail("post_comment") {
            bail!("tracker offline");
        }
        self.comments.lock().unwrap().push((item.0, body.to_string()));
        Ok(())
    }

    async fn add_label(&self, item: ItemId, label: &str) -> Result<()> {
        self.log.push(format!("add_label:{}:{label}", item.0));
        if self.should_fail("add_label") {
            bail!("tracker offline");
        }
        for stored in self.items.lock().unwrap().iter_mut() {
            if stored.id == item && !stored.labels.iter().any(|l| l == label) {
                stored.labels.push(label.to_string());
            }
        }
        Ok(())
    }

    async fn remove_label(&self, item: ItemId, label: &str) -> Result<()> {
        self.log.push(format!("remove_label:{}:{label}", item.0));
        if self.should_fail("remove_label") {
            bail!("tracker offline");
        }
        for stored in self.items.lock().unwrap().iter_mut() {
            if stored.id == item {
                stored.labels.retain(|l| l != label);
            }
        }
        Ok(())
    }

    async fn change_request_branch(&self, request: RequestId) -> Result<String> {
        self.log.push(format!("request_branch:{}", request.0));
        if self.should_fail("request_branch") {
            bail!("tracker offline");
        }
        match self.branches.lock().unwrap().get(&request) {
            Some(branch) => Ok(branch.clone()),
            None => bail!("no change request {request}"),
        }
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ─── Agent fake ─────────────────────────────────────────────────────────────

pub struct ScriptedAgent {
    log: CallLog,
    outcomes: Mutex<VecDeque<AgentOutcome>>,
    /// Every request the agent was invoked with.
    pub requests: Mutex<Vec<AgentRequest>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedAgent {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            outcomes: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    pub fn push_outcome(&self, outcome: AgentOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Block each subsequent invocation until a permit is added to the
    /// returned semaphore. Keeps tasks active across poll cycles.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn resume_tokens(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.resume.clone())
            .collect()
    }
}

#[async_trait]
impl CodingAgent for ScriptedAgent {
    async fn invoke(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome> {
        self.log.push("agent_invoke");
        self.requests.lock().unwrap().push(request.clone());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            tokio::select! {
                permit = gate.acquire() => permit.unwrap().forget(),
                () = cancel.cancelled() => bail!("agent invocation cancelled"),
            }
        }
        if cancel.is_cancelled() {
            bail!("agent invocation cancelled");
        }

        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| agent_success(None, "")))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

pub fn agent_success(session: Option<&str>, stdout: &str) -> AgentOutcome {
    AgentOutcome {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
        session: session.map(str::to_string),
    }
}

pub fn agent_failure(exit_code: i32, stderr: &str) -> AgentOutcome {
    AgentOutcome {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
        session: None,
    }
}

// ─── Workspace fake ─────────────────────────────────────────────────────────

/// In-memory workspace provider; paths are never touched on disk.
pub struct FakeWorkspaces {
    log: CallLog,
    root: PathBuf,
}

impl FakeWorkspaces {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            root: PathBuf::from("/fake/workspaces"),
        }
    }
}

#[async_trait]
impl WorkspaceProvider for FakeWorkspaces {
    async fn create(&self, name: &str, branch: &str, mode: BranchMode) -> Result<Workspace> {
        self.log.push(format!("workspace_create:{branch}:{mode:?}"));
        Ok(Workspace {
            path: self.root.join(name),
            branch: branch.to_string(),
        })
    }

    async fn publish(&self, workspace: &Workspace) -> Result<()> {
        self.log.push(format!("publish:{}", workspace.branch));
        Ok(())
    }

    async fn discard(&self, workspace: Workspace) -> Result<()> {
        self.log.push(format!("discard:{}", workspace.branch));
        Ok(())
    }
}

// ─── Fixture ────────────────────────────────────────────────────────────────

pub struct Fixture {
    pub log: CallLog,
    pub tracker: Arc<RecordingTracker>,
    pub agent: Arc<ScriptedAgent>,
    pub workspaces: Arc<FakeWorkspaces>,
    pub ctx: Arc<TaskContext>,
}

pub fn fixture() -> Fixture {
    let log = CallLog::default();
    let tracker = Arc::new(RecordingTracker::new(log.clone()));
    let agent = Arc::new(ScriptedAgent::new(log.clone()));
    let workspaces = Arc::new(FakeWorkspaces::new(log.clone()));
    let ctx = Arc::new(TaskContext {
        tracker: tracker.clone(),
        agent: agent.clone(),
        workspaces: workspaces.clone(),
        sessions: SessionStore::new(),
        labels: Labels {
            trigger: "gaffer".to_string(),
            in_progress: "gaffer-wip".to_string(),
            failure: "gaffer-failed".to_string(),
        },
        trunk: "main".to_string(),
        tasklist_doc: None,
    });
    Fixture {
        log,
        tracker,
        agent,
        workspaces,
        ctx,
    }
}

pub fn work_item(number: u64) -> WorkItem {
    WorkItem {
        id: ItemId(number),
        title: format!("Fix bug {number}"),
        body: "Something is broken.".to_string(),
        labels: vec!["gaffer".to_string()],
    }
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

pub fn discussion_entry(
    id: u64,
    request: u64,
    created_at: DateTime<Utc>,
    author: &str,
    body: &str,
) -> FeedbackEntry {
    FeedbackEntry {
        id,
        request: RequestId(request),
        author: author.to_string(),
        body: body.to_string(),
        kind: FeedbackKind::Discussion,
        created_at,
    }
}

pub fn inline_entry(
    id: u64,
    request: u64,
    created_at: DateTime<Utc>,
    author: &str,
    path: &str,
    line: Option<u32>,
    body: &str,
) -> FeedbackEntry {
    FeedbackEntry {
        id,
        request: RequestId(request),
        author: author.to_string(),
        body: body.to_string(),
        kind: FeedbackKind::Inline {
            path: path.to_string(),
            line,
        },
        created_at,
    }
}
