// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::*;
use crate::alarm::NON_PRIVILEGED_BG_APP_TIMER_TAG;
use crate::callbacks::SessionCallbacks;
use crate::error::FailureReason;
use crate::params::{AppConfigParams, FiraOpenSessionParams};
use crate::policy::UidImportance;
use crate::test_support::{
    app_attribution, test_config, CallbackEvent, DriverCall, RecordingCallbacks, TestHarness,
};
use crate::uci::{
    Controlee, MacAddress, MulticastUpdateAction, RangeDataNtfConfig, SessionHandle, SessionType,
    StatusCode,
};

const PEER: MacAddress = MacAddress::Extended(0xaabb);

fn reconfigure_ntf_configs(harness: &TestHarness) -> Vec<Option<RangeDataNtfConfig>> {
    harness
        .driver
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::Reconfigure { params, .. } => Some(params.range_data_ntf_config),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn background_caller_is_rejected_when_background_ranging_is_off() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    harness.service.on_uid_importance_changed(10_001, UidImportance::Background).await;

    let callbacks = RecordingCallbacks::new();
    harness
        .service
        .init_session(
            SessionHandle(1),
            100,
            SessionType::FiraRanging,
            AppConfigParams::Fira(FiraOpenSessionParams::default()),
            app_attribution(10_001),
            Arc::clone(&callbacks) as Arc<dyn SessionCallbacks>,
        )
        .await;

    let events = callbacks.wait_for_count(1).await?;
    assert_eq!(events, vec![CallbackEvent::OpenFailed(FailureReason::SystemPolicy)]);
    assert!(!harness
        .driver
        .calls()
        .iter()
        .any(|call| matches!(call, DriverCall::InitSession { .. })));
    Ok(())
}

#[tokio::test]
async fn params_type_mismatch_is_bad_parameters() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    let callbacks = RecordingCallbacks::new();
    harness
        .service
        .init_session(
            SessionHandle(1),
            100,
            SessionType::Ccc,
            AppConfigParams::Fira(FiraOpenSessionParams::default()),
            app_attribution(10_001),
            Arc::clone(&callbacks) as Arc<dyn SessionCallbacks>,
        )
        .await;
    let events = callbacks.wait_for_count(1).await?;
    assert_eq!(events, vec![CallbackEvent::OpenFailed(FailureReason::BadParameters)]);
    Ok(())
}

#[tokio::test]
async fn duplicate_session_id_is_bad_parameters() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    harness.open_fira(1, 100, FiraOpenSessionParams::default()).await?;

    let callbacks = RecordingCallbacks::new();
    harness
        .service
        .init_session(
            SessionHandle(2),
            100,
            SessionType::FiraRanging,
            AppConfigParams::Fira(FiraOpenSessionParams::default()),
            app_attribution(10_001),
            Arc::clone(&callbacks) as Arc<dyn SessionCallbacks>,
        )
        .await;
    let events = callbacks.wait_for_count(1).await?;
    assert_eq!(events, vec![CallbackEvent::OpenFailed(FailureReason::BadParameters)]);
    assert_eq!(harness.service.session_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn background_transition_reconfigures_and_arms_the_timer() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    harness.open_and_start_fira(1, 100, FiraOpenSessionParams::default()).await?;

    harness.service.on_uid_importance_changed(10_001, UidImportance::Background).await;
    harness
        .driver
        .wait_for_call(|call| {
            matches!(
                call,
                DriverCall::Reconfigure { params, .. }
                    if params.range_data_ntf_config == Some(RangeDataNtfConfig::Disable)
            )
        })
        .await?;

    assert_eq!(harness.alarms.armed_tags(), vec![NON_PRIVILEGED_BG_APP_TIMER_TAG]);
    assert_eq!(
        harness.alarms.armed_delay(NON_PRIVILEGED_BG_APP_TIMER_TAG),
        Some(Duration::from_millis(200))
    );
    Ok(())
}

#[tokio::test]
async fn foreground_return_cancels_the_timer_and_restores_notifications() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    harness.open_and_start_fira(1, 100, FiraOpenSessionParams::default()).await?;

    harness.service.on_uid_importance_changed(10_001, UidImportance::Background).await;
    harness
        .driver
        .wait_for_call(|call| {
            matches!(
                call,
                DriverCall::Reconfigure { params, .. }
                    if params.range_data_ntf_config == Some(RangeDataNtfConfig::Disable)
            )
        })
        .await?;

    harness.service.on_uid_importance_changed(10_001, UidImportance::Foreground).await;
    harness
        .driver
        .wait_for_call(|call| {
            matches!(
                call,
                DriverCall::Reconfigure { params, .. }
                    if params.range_data_ntf_config == Some(RangeDataNtfConfig::Enable)
            )
        })
        .await?;

    assert_eq!(harness.alarms.armed_count(), 0);
    assert_eq!(
        reconfigure_ntf_configs(&harness),
        vec![Some(RangeDataNtfConfig::Disable), Some(RangeDataNtfConfig::Enable)]
    );
    Ok(())
}

#[tokio::test]
async fn background_ranging_enabled_skips_the_timer() -> anyhow::Result<()> {
    let mut config = test_config();
    config.background_ranging_enabled = true;
    let harness = TestHarness::with_config(config)?;
    harness.open_and_start_fira(1, 100, FiraOpenSessionParams::default()).await?;

    harness.service.on_uid_importance_changed(10_001, UidImportance::Background).await;
    harness
        .driver
        .wait_for_call(|call| {
            matches!(
                call,
                DriverCall::Reconfigure { params, .. }
                    if params.range_data_ntf_config == Some(RangeDataNtfConfig::Disable)
            )
        })
        .await?;
    assert_eq!(harness.alarms.armed_count(), 0);
    Ok(())
}

#[tokio::test]
async fn importance_changes_leave_unrelated_sessions_alone() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    harness.open_and_start_fira(1, 100, FiraOpenSessionParams::default()).await?;

    harness.service.on_uid_importance_changed(20_777, UidImportance::Background).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(reconfigure_ntf_configs(&harness).is_empty());
    assert_eq!(harness.alarms.armed_count(), 0);
    Ok(())
}

#[tokio::test]
async fn client_death_closes_without_callbacks() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    let callbacks = harness.open_fira(1, 100, FiraOpenSessionParams::default()).await?;

    harness.service.on_client_death(SessionHandle(1)).await;
    harness
        .driver
        .wait_for_call(|call| matches!(call, DriverCall::DeinitSession { session_id: 100 }))
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.service.session_count().await, 0);
    assert_eq!(callbacks.events(), vec![CallbackEvent::Opened]);
    Ok(())
}

#[tokio::test]
async fn multicast_partial_keys_rejected_synchronously() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    harness.open_fira(1, 100, FiraOpenSessionParams::default()).await?;

    let status = harness
        .service
        .update_controller_multicast_list(
            SessionHandle(1),
            MulticastUpdateAction::Add,
            vec![Controlee { address: PEER, sub_session_id: 1 }],
            Some(Bytes::from_static(&[0u8; 16])),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::Rejected);
    assert!(!harness
        .driver
        .calls()
        .iter()
        .any(|call| matches!(call, DriverCall::MulticastListUpdate { .. })));
    Ok(())
}

#[tokio::test]
async fn multicast_joint_keys_are_forwarded() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    let callbacks = harness.open_fira(1, 100, FiraOpenSessionParams::default()).await?;

    let status = harness
        .service
        .update_controller_multicast_list(
            SessionHandle(1),
            MulticastUpdateAction::Add,
            vec![Controlee { address: PEER, sub_session_id: 1 }],
            Some(Bytes::from_static(&[0u8; 16])),
            Some(vec![Bytes::from_static(&[1u8; 16])]),
        )
        .await;
    assert_eq!(status, StatusCode::Ok);
    callbacks.wait_for(|events| events.contains(&CallbackEvent::Reconfigured)).await?;
    assert!(harness
        .driver
        .calls()
        .iter()
        .any(|call| matches!(call, DriverCall::MulticastListUpdate { with_keys: true, .. })));
    Ok(())
}

#[tokio::test]
async fn send_data_with_empty_payload_is_invalid() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    let callbacks = harness.open_and_start_fira(1, 100, FiraOpenSessionParams::default()).await?;

    harness
        .service
        .send_data(SessionHandle(1), PEER, serde_json::Value::Null, Bytes::new())
        .await;
    callbacks
        .wait_for(|events| {
            events.contains(&CallbackEvent::DataSendFailed(PEER, FailureReason::InvalidParam))
        })
        .await?;
    assert!(!harness.driver.calls().iter().any(|call| matches!(call, DriverCall::SendData { .. })));
    Ok(())
}

#[tokio::test]
async fn subsystem_cap_rejects_regardless_of_priority() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    harness.driver.set_max_session_number(1);
    harness.open_fira(1, 100, FiraOpenSessionParams::default()).await?;

    let callbacks = RecordingCallbacks::new();
    harness
        .service
        .init_session(
            SessionHandle(2),
            200,
            SessionType::FiraRanging,
            AppConfigParams::Fira(FiraOpenSessionParams::default()),
            vec![crate::policy::AttributionSource {
                uid: crate::policy::SYSTEM_UID,
                package_name: "android".to_owned(),
            }],
            Arc::clone(&callbacks) as Arc<dyn SessionCallbacks>,
        )
        .await;
    let events = callbacks.wait_for_count(1).await?;
    assert_eq!(events, vec![CallbackEvent::OpenFailed(FailureReason::MaxSessionsReached)]);
    Ok(())
}

#[tokio::test]
async fn shutdown_drains_all_sessions_quietly() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;
    let first = harness.open_fira(1, 100, FiraOpenSessionParams::default()).await?;
    let second = harness.open_fira(2, 101, FiraOpenSessionParams::default()).await?;

    harness.service.shutdown().await;

    assert_eq!(harness.service.session_count().await, 0);
    assert_eq!(harness.alarms.armed_count(), 0);
    assert_eq!(first.events(), vec![CallbackEvent::Opened]);
    assert_eq!(second.events(), vec![CallbackEvent::Opened]);
    let deinits = harness
        .driver
        .calls()
        .iter()
        .filter(|call| matches!(call, DriverCall::DeinitSession { .. }))
        .count();
    assert_eq!(deinits, 2);
    Ok(())
}
