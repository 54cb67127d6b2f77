//! Continuation-token store for agent session continuity.
//!
//! When an implement run produces a change request, the agent session that
//! wrote the code is remembered here; review rounds resume it so the agent
//! keeps its context. The store is injected into the task machinery rather
//! than reached as a global, and it lives for the process lifetime only.
//! Losing it on restart costs the agent its accumulated context, nothing
//! more, since the next review round simply starts a fresh session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::feedback::RequestId;

/// Last-write-wins map from change request to continuation token.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<RequestId, String>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<RequestId, String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token from the request's most recent successful agent run, if any.
    pub fn get(&self, request: RequestId) -> Option<String> {
        self.map().get(&request).cloned()
    }

    /// Record the token from a successful run, replacing any earlier one.
    pub fn set(&self, request: RequestId, token: impl Into<String>) {
        self.map().insert(request, token.into());
    }
}
