// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session table: handle-keyed primary map with a session-id secondary
//! index. Admission (bound check plus eviction candidate selection) happens
//! under the table lock so concurrent opens cannot both claim the last
//! slot.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::session::SessionEntry;
use crate::uci::{SessionHandle, SessionId, SessionType};

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum AdmitOutcome {
    Inserted,
    /// Inserted, but the returned resident must be deinitialized to honor
    /// the protocol's session bound.
    InsertedWithEviction(Arc<SessionEntry>),
    RejectedMaxSessions,
    DuplicateSessionId,
    DuplicateHandle,
}

#[derive(Default)]
struct Inner {
    /// Insertion-ordered so eviction tie-breaks pick the oldest resident.
    by_handle: IndexMap<SessionHandle, Arc<SessionEntry>>,
    by_id: HashMap<SessionId, SessionHandle>,
}

#[derive(Default)]
pub struct SessionTable {
    inner: RwLock<Inner>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new session under the given per-protocol bound.
    ///
    /// When the bound is reached, a resident of the same protocol with
    /// strictly lower priority is selected for eviction — the lowest
    /// priority present, oldest first among equals. With no such resident
    /// the new session is rejected.
    pub async fn admit_and_insert(
        &self,
        entry: Arc<SessionEntry>,
        bound: usize,
    ) -> AdmitOutcome {
        let mut inner = self.inner.write().await;
        if inner.by_id.contains_key(&entry.session_id) {
            return AdmitOutcome::DuplicateSessionId;
        }
        if inner.by_handle.contains_key(&entry.handle) {
            return AdmitOutcome::DuplicateHandle;
        }

        let session_type = entry.session_type;
        let resident_count =
            inner.by_handle.values().filter(|e| e.session_type == session_type).count();

        let victim = if resident_count >= bound {
            let new_priority = entry.priority();
            let mut lowest: Option<Arc<SessionEntry>> = None;
            for resident in inner.by_handle.values() {
                if resident.session_type != session_type {
                    continue;
                }
                let priority = resident.priority();
                if priority >= new_priority {
                    continue;
                }
                // Strict < keeps the first-seen (oldest) resident on ties.
                if lowest.as_ref().is_none_or(|l| priority < l.priority()) {
                    lowest = Some(Arc::clone(resident));
                }
            }
            match lowest {
                Some(victim) => Some(victim),
                None => return AdmitOutcome::RejectedMaxSessions,
            }
        } else {
            None
        };

        inner.by_id.insert(entry.session_id, entry.handle);
        inner.by_handle.insert(entry.handle, entry);
        match victim {
            Some(victim) => AdmitOutcome::InsertedWithEviction(victim),
            None => AdmitOutcome::Inserted,
        }
    }

    pub async fn get(&self, handle: SessionHandle) -> Option<Arc<SessionEntry>> {
        self.inner.read().await.by_handle.get(&handle).map(Arc::clone)
    }

    pub async fn get_by_id(&self, session_id: SessionId) -> Option<Arc<SessionEntry>> {
        let inner = self.inner.read().await;
        let handle = inner.by_id.get(&session_id)?;
        inner.by_handle.get(handle).map(Arc::clone)
    }

    /// Remove a session. Uses the order-preserving removal so later
    /// eviction tie-breaks still see insertion order.
    pub async fn remove(&self, handle: SessionHandle) -> Option<Arc<SessionEntry>> {
        let mut inner = self.inner.write().await;
        let entry = inner.by_handle.shift_remove(&handle)?;
        inner.by_id.remove(&entry.session_id);
        Some(entry)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_handle.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_handle.is_empty()
    }

    /// Snapshot of all resident sessions in insertion order.
    pub async fn sessions(&self) -> Vec<Arc<SessionEntry>> {
        self.inner.read().await.by_handle.values().map(Arc::clone).collect()
    }

    pub async fn count_of_type(&self, session_type: SessionType) -> usize {
        self.inner
            .read()
            .await
            .by_handle
            .values()
            .filter(|e| e.session_type == session_type)
            .count()
    }
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod tests;
