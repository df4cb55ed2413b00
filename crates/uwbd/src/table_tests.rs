// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::params::{AppConfigParams, CccOpenRangingParams, FiraOpenSessionParams};
use crate::policy::SessionPriority;
use crate::test_support::{app_attribution, RecordingCallbacks};
use crate::uci::{SessionHandle, SessionType};

fn entry(
    session_id: u32,
    handle: u64,
    session_type: SessionType,
    priority: SessionPriority,
) -> Arc<SessionEntry> {
    let params = match session_type {
        SessionType::Ccc => AppConfigParams::Ccc(CccOpenRangingParams::default()),
        _ => AppConfigParams::Fira(FiraOpenSessionParams::default()),
    };
    SessionEntry::new(
        session_id,
        SessionHandle(handle),
        session_type,
        "default".to_owned(),
        app_attribution(10_001),
        priority,
        params,
        10,
        RecordingCallbacks::new(),
    )
}

fn fira(session_id: u32, handle: u64, priority: SessionPriority) -> Arc<SessionEntry> {
    entry(session_id, handle, SessionType::FiraRanging, priority)
}

#[tokio::test]
async fn insert_and_lookup_both_keys() -> anyhow::Result<()> {
    let table = SessionTable::new();
    let admitted = table.admit_and_insert(fira(1, 100, SessionPriority::Foreground), 5).await;
    assert!(matches!(admitted, AdmitOutcome::Inserted));

    let by_handle = table.get(SessionHandle(100)).await.ok_or_else(|| anyhow::anyhow!("handle"))?;
    assert_eq!(by_handle.session_id, 1);
    let by_id = table.get_by_id(1).await.ok_or_else(|| anyhow::anyhow!("id"))?;
    assert_eq!(by_id.handle, SessionHandle(100));
    assert_eq!(table.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_session_id_rejected() {
    let table = SessionTable::new();
    assert!(matches!(
        table.admit_and_insert(fira(1, 100, SessionPriority::Foreground), 5).await,
        AdmitOutcome::Inserted
    ));
    assert!(matches!(
        table.admit_and_insert(fira(1, 101, SessionPriority::Foreground), 5).await,
        AdmitOutcome::DuplicateSessionId
    ));
    assert!(matches!(
        table.admit_and_insert(fira(2, 100, SessionPriority::Foreground), 5).await,
        AdmitOutcome::DuplicateHandle
    ));
}

#[tokio::test]
async fn bound_rejects_without_lower_priority_resident() {
    let table = SessionTable::new();
    assert!(matches!(
        table.admit_and_insert(fira(1, 100, SessionPriority::Foreground), 1).await,
        AdmitOutcome::Inserted
    ));
    // Same priority: no eviction.
    assert!(matches!(
        table.admit_and_insert(fira(2, 101, SessionPriority::Foreground), 1).await,
        AdmitOutcome::RejectedMaxSessions
    ));
    // Lower priority than the resident: no eviction either.
    assert!(matches!(
        table.admit_and_insert(fira(3, 102, SessionPriority::Background), 1).await,
        AdmitOutcome::RejectedMaxSessions
    ));
}

#[tokio::test]
async fn higher_priority_evicts_lowest() -> anyhow::Result<()> {
    let table = SessionTable::new();
    table.admit_and_insert(fira(1, 100, SessionPriority::Foreground), 5).await;
    match table.admit_and_insert(fira(2, 101, SessionPriority::System), 1).await {
        AdmitOutcome::InsertedWithEviction(victim) => {
            assert_eq!(victim.session_id, 1);
            Ok(())
        }
        other => anyhow::bail!("expected eviction, got {other:?}"),
    }
}

#[tokio::test]
async fn eviction_picks_lowest_priority_then_oldest() -> anyhow::Result<()> {
    let table = SessionTable::new();
    table.admit_and_insert(fira(1, 100, SessionPriority::Foreground), 5).await;
    table.admit_and_insert(fira(2, 101, SessionPriority::Background), 5).await;
    table.admit_and_insert(fira(3, 102, SessionPriority::Background), 5).await;

    match table.admit_and_insert(fira(4, 103, SessionPriority::System), 3).await {
        AdmitOutcome::InsertedWithEviction(victim) => {
            // Both background sessions rank below foreground; the older one
            // (session 2) goes first.
            assert_eq!(victim.session_id, 2);
            Ok(())
        }
        other => anyhow::bail!("expected eviction, got {other:?}"),
    }
}

#[tokio::test]
async fn bounds_are_per_protocol() {
    let table = SessionTable::new();
    table.admit_and_insert(fira(1, 100, SessionPriority::Foreground), 1).await;
    // A CCC session does not count against the FiRa bound.
    assert!(matches!(
        table
            .admit_and_insert(entry(2, 101, SessionType::Ccc, SessionPriority::Ccc), 1)
            .await,
        AdmitOutcome::Inserted
    ));
    assert_eq!(table.count_of_type(SessionType::FiraRanging).await, 1);
    assert_eq!(table.count_of_type(SessionType::Ccc).await, 1);
}

#[tokio::test]
async fn remove_clears_both_indexes() -> anyhow::Result<()> {
    let table = SessionTable::new();
    table.admit_and_insert(fira(1, 100, SessionPriority::Foreground), 5).await;
    let removed = table.remove(SessionHandle(100)).await.ok_or_else(|| anyhow::anyhow!("gone"))?;
    assert_eq!(removed.session_id, 1);
    assert!(table.get(SessionHandle(100)).await.is_none());
    assert!(table.get_by_id(1).await.is_none());
    assert!(table.is_empty().await);
    Ok(())
}
