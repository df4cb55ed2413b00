// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::params::{AppConfigParams, FiraOpenSessionParams};
use crate::policy::SessionPriority;
use crate::test_support::{app_attribution, RecordingCallbacks};
use crate::uci::{Controlee, MacAddress, SessionHandle, SessionState, SessionType};

fn entry() -> Arc<SessionEntry> {
    SessionEntry::new(
        42,
        SessionHandle(1),
        SessionType::FiraRanging,
        "default".to_owned(),
        app_attribution(10_001),
        SessionPriority::Foreground,
        AppConfigParams::Fira(FiraOpenSessionParams::default()),
        10,
        RecordingCallbacks::new(),
    )
}

#[test]
fn starts_in_init() {
    let entry = entry();
    assert_eq!(entry.state(), SessionState::Init);
    assert!(!entry.deinit_in_progress());
}

#[test]
fn legal_transitions_apply() {
    let entry = entry();
    assert!(entry.transition_to(SessionState::Idle));
    assert!(entry.transition_to(SessionState::Active));
    assert!(entry.transition_to(SessionState::Idle));
    assert!(entry.transition_to(SessionState::Deinit));
    assert_eq!(entry.state(), SessionState::Deinit);
}

#[test]
fn illegal_transitions_are_ignored() {
    let entry = entry();
    assert!(!entry.transition_to(SessionState::Active));
    assert_eq!(entry.state(), SessionState::Init);

    assert!(entry.transition_to(SessionState::Deinit));
    assert!(!entry.transition_to(SessionState::Idle));
    assert!(!entry.transition_to(SessionState::Error));
    assert_eq!(entry.state(), SessionState::Deinit);
}

#[tokio::test]
async fn watchers_observe_transitions() -> anyhow::Result<()> {
    let entry = entry();
    let mut rx = entry.subscribe_state();
    assert_eq!(*rx.borrow(), SessionState::Init);

    entry.transition_to(SessionState::Idle);
    rx.changed().await?;
    assert_eq!(*rx.borrow(), SessionState::Idle);
    Ok(())
}

#[test]
fn priority_reassignment() {
    let entry = entry();
    assert_eq!(entry.priority(), SessionPriority::Foreground);
    entry.set_priority(SessionPriority::Background);
    assert_eq!(entry.priority(), SessionPriority::Background);
}

#[test]
fn controlee_reconciliation() {
    let entry = entry();
    let a = Controlee { address: MacAddress::Short(0x0a), sub_session_id: 1 };
    let b = Controlee { address: MacAddress::Short(0x0b), sub_session_id: 2 };

    entry.apply_controlee_update(&[a, b], &[]);
    assert_eq!(entry.controlees.lock().len(), 2);

    // Re-adding an existing address is a no-op.
    entry.apply_controlee_update(&[a], &[]);
    assert_eq!(entry.controlees.lock().len(), 2);

    entry.apply_controlee_update(&[], &[MacAddress::Short(0x0a)]);
    let remaining = entry.controlees.lock().clone();
    assert_eq!(remaining, vec![b]);
}

#[test]
fn ntf_suppression_flag() {
    let entry = entry();
    assert!(!entry.ntf_suppressed());
    entry.set_ntf_suppressed(true);
    assert!(entry.ntf_suppressed());
}
