//! Reviewer feedback on open change requests.
//!
//! The tracker delivers feedback over two feeds with different shapes:
//! discussion comments on the request thread and inline comments anchored
//! to a file position. Both are normalized into [`FeedbackEntry`] at the
//! tracker boundary; this module groups entries per change request so each
//! batch can be handled as a single unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::item::ItemId;

/// Identifier of a change request (pull request number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Change requests share the item number space on the tracker, so
    /// comment and label operations address them through the same id type.
    pub fn as_item(self) -> ItemId {
        ItemId(self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a feedback entry was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackKind {
    /// A comment on the request's discussion thread.
    Discussion,
    /// A review comment anchored to a file, and to a line when the comment
    /// targets a single line rather than a range or the whole file.
    Inline { path: String, line: Option<u32> },
}

/// One normalized feedback entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: u64,
    pub request: RequestId,
    pub author: String,
    pub body: String,
    pub kind: FeedbackKind,
    pub created_at: DateTime<Utc>,
}

/// All pending feedback for one change request, oldest entry first.
///
/// Built through [`FeedbackBatch::group`]; never empty.
#[derive(Debug, Clone)]
pub struct FeedbackBatch {
    pub request: RequestId,
    entries: Vec<FeedbackEntry>,
}

impl FeedbackBatch {
    /// Group a poll window's entries by change request.
    ///
    /// Entries within a batch are ordered by creation time (entry id as the
    /// tiebreak); batches are ordered by their oldest entry so feedback
    /// that arrived first is dispatched first.
    pub fn group(entries: Vec<FeedbackEntry>) -> Vec<FeedbackBatch> {
        let mut by_request: BTreeMap<RequestId, Vec<FeedbackEntry>> = BTreeMap::new();
        for entry in entries {
            by_request.entry(entry.request).or_default().push(entry);
        }
        let mut batches: Vec<FeedbackBatch> = by_request
            .into_iter()
            .map(|(request, mut entries)| {
                entries.sort_by_key(|e| (e.created_at, e.id));
                FeedbackBatch { request, entries }
            })
            .collect();
        batches.sort_by_key(Self::oldest);
        batches
    }

    /// Build a batch directly. Returns `None` for an empty entry list.
    pub fn new(request: RequestId, mut entries: Vec<FeedbackEntry>) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }
        entries.sort_by_key(|e| (e.created_at, e.id));
        Some(Self { request, entries })
    }

    pub fn entries(&self) -> &[FeedbackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Creation time of the oldest entry.
    pub fn oldest(&self) -> DateTime<Utc> {
        self.entries.first().map_or_else(Utc::now, |e| e.created_at)
    }

    /// Creation time of the newest entry. Qualifies the review task key so
    /// a batch with fresh feedback counts as new work while a re-fetched
    /// unchanged batch does not.
    pub fn newest(&self) -> DateTime<Utc> {
        self.entries.last().map_or_else(Utc::now, |e| e.created_at)
    }
}
