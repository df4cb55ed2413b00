// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session record.
//!
//! A [`SessionEntry`] is created at init, owned by the table for its
//! lifetime, and torn down exactly once. State is published through a
//! `watch` channel so the dispatcher can await an expected transition while
//! the router applies driver notifications.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};

use crate::alarm::AlarmHandle;
use crate::callbacks::SessionCallbacks;
use crate::datapath::{InboundDataQueue, OutboundTracker};
use crate::params::AppConfigParams;
use crate::policy::{AttributionSource, SessionPriority};
use crate::uci::{
    Controlee, MacAddress, MulticastListUpdateStatus, SessionHandle, SessionId, SessionState,
    SessionType,
};

pub struct SessionEntry {
    pub session_id: SessionId,
    pub handle: SessionHandle,
    pub session_type: SessionType,
    pub chip_id: String,
    pub attribution: Vec<AttributionSource>,
    pub callbacks: Arc<dyn SessionCallbacks>,

    state_tx: watch::Sender<SessionState>,

    pub priority: parking_lot::Mutex<SessionPriority>,
    pub params: parking_lot::Mutex<Option<AppConfigParams>>,
    pub controlees: parking_lot::Mutex<Vec<Controlee>>,
    /// Remote addresses observed in range data notifications.
    pub remote_addresses: parking_lot::Mutex<BTreeSet<MacAddress>>,

    /// Latest multicast update notification, consumed by the dispatcher.
    pub multicast_status: parking_lot::Mutex<Option<MulticastListUpdateStatus>>,
    pub multicast_ntf: Notify,

    pub inbound: parking_lot::Mutex<InboundDataQueue>,
    pub outbound: parking_lot::Mutex<OutboundTracker>,

    pub error_streak_alarm: parking_lot::Mutex<Option<AlarmHandle>>,
    pub background_alarm: parking_lot::Mutex<Option<AlarmHandle>>,
    /// Set while a dispatcher-driven deinit is in flight so the router does
    /// not double-finalize on the DEINIT notification.
    deinit_in_progress: AtomicBool,
    /// Range notifications were disabled by background policy and should be
    /// restored when the app returns to the foreground.
    ntf_suppressed: AtomicBool,
}

impl SessionEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        handle: SessionHandle,
        session_type: SessionType,
        chip_id: String,
        attribution: Vec<AttributionSource>,
        priority: SessionPriority,
        params: AppConfigParams,
        rx_queue_depth: usize,
        callbacks: Arc<dyn SessionCallbacks>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Init);
        Arc::new(Self {
            session_id,
            handle,
            session_type,
            chip_id,
            attribution,
            callbacks,
            state_tx,
            priority: parking_lot::Mutex::new(priority),
            params: parking_lot::Mutex::new(Some(params)),
            controlees: parking_lot::Mutex::new(Vec::new()),
            remote_addresses: parking_lot::Mutex::new(BTreeSet::new()),
            multicast_status: parking_lot::Mutex::new(None),
            multicast_ntf: Notify::new(),
            inbound: parking_lot::Mutex::new(InboundDataQueue::new(rx_queue_depth)),
            outbound: parking_lot::Mutex::new(OutboundTracker::default()),
            error_streak_alarm: parking_lot::Mutex::new(None),
            background_alarm: parking_lot::Mutex::new(None),
            deinit_in_progress: AtomicBool::new(false),
            ntf_suppressed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state changes; the receiver observes the current value
    /// immediately.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Apply a state transition if it is legal. Returns whether the state
    /// changed; illegal transitions leave the session untouched.
    pub fn transition_to(&self, next: SessionState) -> bool {
        let mut changed = false;
        self.state_tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                changed = true;
                true
            } else {
                false
            }
        });
        changed
    }

    pub fn priority(&self) -> SessionPriority {
        *self.priority.lock()
    }

    pub fn set_priority(&self, priority: SessionPriority) {
        *self.priority.lock() = priority;
    }

    /// Snapshot of the cached open params.
    pub fn params_snapshot(&self) -> Option<AppConfigParams> {
        self.params.lock().clone()
    }

    pub fn attributed_to_uid(&self, uid: u32) -> bool {
        self.attribution.iter().any(|source| source.uid == uid)
    }

    pub fn deinit_in_progress(&self) -> bool {
        self.deinit_in_progress.load(Ordering::Acquire)
    }

    pub fn mark_deinit_in_progress(&self) {
        self.deinit_in_progress.store(true, Ordering::Release);
    }

    pub fn ntf_suppressed(&self) -> bool {
        self.ntf_suppressed.load(Ordering::Acquire)
    }

    pub fn set_ntf_suppressed(&self, suppressed: bool) {
        self.ntf_suppressed.store(suppressed, Ordering::Release);
    }

    /// Reconcile the controlee list after a multicast update round-trip.
    pub fn apply_controlee_update(&self, added: &[Controlee], removed: &[MacAddress]) {
        let mut controlees = self.controlees.lock();
        controlees.retain(|c| !removed.contains(&c.address));
        for controlee in added {
            if !controlees.iter().any(|c| c.address == controlee.address) {
                controlees.push(*controlee);
            }
        }
    }
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("session_id", &self.session_id)
            .field("handle", &self.handle)
            .field("session_type", &self.session_type)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
