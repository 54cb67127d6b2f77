//! Task registry types: idempotency keys, task kinds, and lifecycle status.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::feedback::RequestId;
use crate::item::ItemId;

/// Idempotency key identifying one logical unit of work.
///
/// At most one task per key is ever pending or in progress; the worker
/// pool enforces this when tasks are submitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey(String);

impl TaskKey {
    /// Key for implementing a work item. Stable across poll cycles, so an
    /// item still carrying its trigger label is not dispatched twice while
    /// its task runs.
    pub fn implement(item: ItemId) -> Self {
        Self(format!("implement:{}", item.0))
    }

    /// Key for one review round over a feedback batch, qualified by the
    /// newest entry in the batch. Fresh feedback on the same request forms
    /// a new key; an unchanged batch seen again keeps the old one.
    pub fn review(request: RequestId, newest: DateTime<Utc>) -> Self {
        Self(format!("review:{}:{}", request.0, newest.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form, used to name the task's workspace directory.
    pub fn dir_slug(&self) -> String {
        self.0.replace([':', '/'], "-")
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Implement,
    Review,
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Implement => "implement",
            TaskKind::Review => "review",
        }
    }
}

/// Lifecycle status of a registered task.
///
/// Entries move `Pending -> InProgress -> Completed | Failed` and stay in
/// the registry after finishing; terminal entries are history, not load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed { error: String },
}

impl TaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed { .. } => "failed",
        }
    }

    /// Active tasks count toward the concurrency cap and the duplicate
    /// guard; terminal ones do not.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}
