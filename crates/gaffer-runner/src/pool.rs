//! Concurrency-bounded registry of in-flight tasks.
//!
//! The pool is the engine's only dispatch gate. It enforces the
//! parallelism cap, guarantees at most one active task per idempotency
//! key, and keeps every entry (finished ones included) so the registry
//! doubles as a run history. Handlers are spawned fire-and-forget; their
//! completion is visible only through entry status, never through a
//! return channel.

use chrono::{DateTime, Utc};
use gaffer_core::task::{TaskKey, TaskKind, TaskStatus};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often `wait_for_all` re-checks the registry.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One registered task.
#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub kind: TaskKind,
    /// Work item or change request number the task is about.
    pub target: u64,
    pub status: TaskStatus,
    pub cancel: CancellationToken,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub struct WorkerPool {
    max_active: usize,
    // Held only for short synchronous sections, never across an await.
    tasks: Mutex<HashMap<TaskKey, TaskEntry>>,
}

impl WorkerPool {
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<TaskKey, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active_in(map: &HashMap<TaskKey, TaskEntry>) -> usize {
        map.values().filter(|entry| entry.status.is_active()).count()
    }

    /// Whether a new task fits under the concurrency cap.
    pub fn can_accept(&self) -> bool {
        Self::active_in(&self.map()) < self.max_active
    }

    /// Duplicate guard: is a task with this key pending or in progress?
    pub fn has(&self, key: &TaskKey) -> bool {
        self.map().get(key).is_some_and(|entry| entry.status.is_active())
    }

    /// Whether the registry holds any entry under this key, finished ones
    /// included. Entries are never evicted, so this answers "was this key
    /// ever dispatched".
    pub fn contains(&self, key: &TaskKey) -> bool {
        self.map().contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        Self::active_in(&self.map())
    }

    /// Register and launch a task.
    ///
    /// A no-op when the pool is at capacity (the poller sees the same work
    /// again next cycle) or when the key already has an active task. The
    /// handler receives a cancellation token and runs detached; its result
    /// moves the entry to completed or failed.
    pub fn submit<F, Fut>(self: &Arc<Self>, key: TaskKey, kind: TaskKind, target: u64, handler: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        {
            let mut map = self.map();
            if Self::active_in(&map) >= self.max_active {
                tracing::info!(key = %key, "pool at capacity, not accepting task");
                return;
            }
            if map.get(&key).is_some_and(|entry| entry.status.is_active()) {
                tracing::debug!(key = %key, "task already active, skipping");
                return;
            }
            map.insert(
                key.clone(),
                TaskEntry {
                    kind,
                    target,
                    status: TaskStatus::Pending,
                    cancel: cancel.clone(),
                    submitted_at: Utc::now(),
                    finished_at: None,
                },
            );
        }
        tracing::info!(key = %key, kind = kind.label(), "task submitted");

        let future = handler(cancel);
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            if !pool.mark_started(&key) {
                // cancelled before it ever ran
                return;
            }
            let result = future.await;
            pool.finish(&key, result);
        });
    }

    /// Pending to in-progress. False when shutdown already failed the entry.
    fn mark_started(&self, key: &TaskKey) -> bool {
        let mut map = self.map();
        match map.get_mut(key) {
            Some(entry) if entry.status == TaskStatus::Pending => {
                entry.status = TaskStatus::InProgress;
                true
            }
            _ => false,
        }
    }

    /// Record a handler result. Only active entries transition; an entry
    /// already failed by `cancel_all` keeps that verdict.
    fn finish(&self, key: &TaskKey, result: anyhow::Result<()>) {
        let mut map = self.map();
        let Some(entry) = map.get_mut(key) else {
            return;
        };
        if !entry.status.is_active() {
            return;
        }
        entry.finished_at = Some(Utc::now());
        entry.status = match result {
            Ok(()) => {
                tracing::info!(key = %key, "task completed");
                TaskStatus::Completed
            }
            Err(e) => {
                tracing::error!(key = %key, "task failed: {e:#}");
                TaskStatus::Failed {
                    error: format!("{e:#}"),
                }
            }
        };
    }

    /// Cancel every active task and mark it failed. Shutdown only; there is
    /// no per-task cancel.
    pub fn cancel_all(&self) {
        let mut map = self.map();
        let mut cancelled = 0usize;
        for (key, entry) in map.iter_mut() {
            if entry.status.is_active() {
                entry.cancel.cancel();
                entry.status = TaskStatus::Failed {
                    error: "cancelled during shutdown".to_string(),
                };
                entry.finished_at = Some(Utc::now());
                tracing::warn!(key = %key, "cancelled task");
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::warn!(cancelled, "cancelled remaining active tasks");
        }
    }

    /// Wait until no task is active or the timeout elapses. On timeout the
    /// stragglers are cancelled; returns whether everything drained on its
    /// own.
    pub async fn wait_for_all(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.active_count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    remaining = self.active_count(),
                    "shutdown grace elapsed, cancelling stragglers"
                );
                self.cancel_all();
                return false;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Entry count per status label, for cycle summaries and the shutdown
    /// report.
    pub fn status_counts(&self) -> HashMap<&'static str, usize> {
        let map = self.map();
        let mut counts = HashMap::new();
        for entry in map.values() {
            *counts.entry(entry.status.label()).or_insert(0) += 1;
        }
        counts
    }

    /// Snapshot of one entry.
    pub fn get(&self, key: &TaskKey) -> Option<TaskEntry> {
        self.map().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
