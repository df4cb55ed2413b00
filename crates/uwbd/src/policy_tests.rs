// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::uci::SessionType;

fn chain(uid: u32) -> Vec<AttributionSource> {
    vec![AttributionSource { uid, package_name: "com.example.app".to_owned() }]
}

#[test]
fn system_uid_outranks_everything() {
    let priority = assign_priority(SessionType::FiraRanging, &chain(SYSTEM_UID), |_| {
        UidImportance::Background
    });
    assert_eq!(priority, SessionPriority::System);
}

#[test]
fn ccc_sessions_are_privileged() {
    let priority =
        assign_priority(SessionType::Ccc, &chain(10_042), |_| UidImportance::Background);
    assert_eq!(priority, SessionPriority::Ccc);
}

#[test]
fn third_party_rank_follows_importance() {
    let fg = assign_priority(SessionType::FiraRanging, &chain(10_042), |_| {
        UidImportance::Foreground
    });
    assert_eq!(fg, SessionPriority::Foreground);

    let bg = assign_priority(SessionType::FiraRanging, &chain(10_042), |_| {
        UidImportance::Background
    });
    assert_eq!(bg, SessionPriority::Background);
}

#[test]
fn any_background_uid_in_chain_demotes() {
    let attribution = vec![
        AttributionSource { uid: 10_042, package_name: "com.example.app".to_owned() },
        AttributionSource { uid: 10_043, package_name: "com.example.helper".to_owned() },
    ];
    let priority = assign_priority(SessionType::FiraRanging, &attribution, |uid| {
        if uid == 10_043 {
            UidImportance::Background
        } else {
            UidImportance::Foreground
        }
    });
    assert_eq!(priority, SessionPriority::Background);
}

#[test]
fn ladder_is_totally_ordered() {
    assert!(SessionPriority::System > SessionPriority::Ccc);
    assert!(SessionPriority::Ccc > SessionPriority::Foreground);
    assert!(SessionPriority::Foreground > SessionPriority::Background);
    assert!(SessionPriority::System.rank() > SessionPriority::Background.rank());
}

#[test]
fn streak_duration_uses_multiplier_without_stride() {
    assert_eq!(error_streak_duration(200, 0, 2), Duration::from_millis(400));
    assert_eq!(error_streak_duration(200, 0, 5), Duration::from_millis(1000));
}

#[test]
fn streak_duration_stretches_for_block_stride() {
    // interval * 2 * (stride + 1)
    assert_eq!(error_streak_duration(200, 3, 2), Duration::from_millis(1600));
    assert_eq!(error_streak_duration(100, 1, 9), Duration::from_millis(400));
}

#[test]
fn streak_duration_never_zero() {
    assert!(error_streak_duration(0, 0, 0) > Duration::ZERO);
}
