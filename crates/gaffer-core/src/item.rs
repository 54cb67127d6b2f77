//! Work items: snapshots of tracker issues that carry the trigger label.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a tracker work item (issue number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable snapshot of a tracker item, taken at poll time.
///
/// The poller works from this snapshot for the whole task; edits made to
/// the item after dispatch are not picked up until a later run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

impl WorkItem {
    /// Branch the change for this item is developed on.
    ///
    /// Deterministic per item so an interrupted run resumes on top of the
    /// commits an earlier attempt already pushed.
    pub fn branch_name(&self) -> String {
        format!("auto/issue-{}", self.id.0)
    }
}
