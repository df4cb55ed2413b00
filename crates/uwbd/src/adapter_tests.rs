// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::params::{
    AppConfigParams, CccOpenRangingParams, CccStartRangingParams, FiraOpenSessionParams,
    RangingReconfigureParams, SessionTimeBase,
};
use crate::policy::SessionPriority;
use crate::test_support::{test_config, DriverCall, MockDriver};
use crate::uci::{ProtocolVersion, SessionType};

fn fira(version: ProtocolVersion) -> FiraOpenSessionParams {
    FiraOpenSessionParams { protocol_version: version, ..Default::default() }
}

fn queried_timestamp(driver: &MockDriver) -> bool {
    driver.calls().iter().any(|call| *call == DriverCall::QueryTimestamp)
}

#[tokio::test]
async fn fira_priority_is_injected() -> anyhow::Result<()> {
    let driver = MockDriver::new();
    let config = test_config();
    let mut params = AppConfigParams::Fira(FiraOpenSessionParams {
        session_priority: 1,
        ..fira(ProtocolVersion::new(1, 1))
    });

    prepare_open_params(&mut params, SessionPriority::System, &driver, &config, "default")
        .await?;
    let AppConfigParams::Fira(rewritten) = params else {
        anyhow::bail!("params changed variant");
    };
    assert_eq!(rewritten.session_priority, SessionPriority::System.rank());
    Ok(())
}

#[tokio::test]
async fn fira_2_0_relative_time_becomes_absolute() -> anyhow::Result<()> {
    let driver = MockDriver::new();
    driver.set_timestamp_micros(5_000_000);
    let config = test_config();
    let mut params = AppConfigParams::Fira(FiraOpenSessionParams {
        initiation_time_ms: 200,
        ..fira(ProtocolVersion::new(2, 0))
    });

    prepare_open_params(&mut params, SessionPriority::Foreground, &driver, &config, "default")
        .await?;
    let AppConfigParams::Fira(rewritten) = params else {
        anyhow::bail!("params changed variant");
    };
    assert_eq!(rewritten.absolute_initiation_time_us, Some(5_000_000 + 200 * 1000));
    assert!(queried_timestamp(&driver));
    Ok(())
}

#[tokio::test]
async fn fira_1_x_never_queries_the_clock() -> anyhow::Result<()> {
    let driver = MockDriver::new();
    let config = test_config();
    let mut params = AppConfigParams::Fira(FiraOpenSessionParams {
        initiation_time_ms: 200,
        ..fira(ProtocolVersion::new(1, 3))
    });

    prepare_open_params(&mut params, SessionPriority::Foreground, &driver, &config, "default")
        .await?;
    let AppConfigParams::Fira(rewritten) = params else {
        anyhow::bail!("params changed variant");
    };
    assert_eq!(rewritten.absolute_initiation_time_us, None);
    assert!(!queried_timestamp(&driver));
    Ok(())
}

async fn assert_no_query(absolute: Option<u64>, relative_ms: u32) -> anyhow::Result<()> {
    let driver = MockDriver::new();
    let config = test_config();
    let mut params = AppConfigParams::Fira(FiraOpenSessionParams {
        initiation_time_ms: relative_ms,
        absolute_initiation_time_us: absolute,
        ..fira(ProtocolVersion::new(2, 0))
    });

    prepare_open_params(&mut params, SessionPriority::Foreground, &driver, &config, "default")
        .await?;
    let AppConfigParams::Fira(rewritten) = params else {
        anyhow::bail!("params changed variant");
    };
    assert_eq!(rewritten.absolute_initiation_time_us, absolute);
    assert!(!queried_timestamp(&driver));
    Ok(())
}

#[tokio::test]
async fn fira_2_0_client_absolute_time_is_never_recomputed() -> anyhow::Result<()> {
    assert_no_query(Some(42), 200).await
}

#[tokio::test]
async fn fira_2_0_without_relative_time_skips_the_query() -> anyhow::Result<()> {
    assert_no_query(None, 0).await
}

#[tokio::test]
async fn uci_1_x_subsystem_blocks_the_rewrite() -> anyhow::Result<()> {
    let driver = MockDriver::new();
    driver.set_device_info(crate::uci::DeviceInfo {
        uci_version: ProtocolVersion::new(1, 1),
        mac_version: ProtocolVersion::new(1, 1),
        phy_version: ProtocolVersion::new(1, 1),
    });
    let config = test_config();
    let mut params = AppConfigParams::Fira(FiraOpenSessionParams {
        initiation_time_ms: 200,
        ..fira(ProtocolVersion::new(2, 0))
    });

    prepare_open_params(&mut params, SessionPriority::Foreground, &driver, &config, "default")
        .await?;
    let AppConfigParams::Fira(rewritten) = params else {
        anyhow::bail!("params changed variant");
    };
    assert_eq!(rewritten.absolute_initiation_time_us, None);
    assert!(!queried_timestamp(&driver));
    Ok(())
}

#[tokio::test]
async fn time_base_reference_is_resolved_to_a_token() -> anyhow::Result<()> {
    let driver = MockDriver::new();
    driver.set_session_token(9, 0xbeef);
    let config = test_config();
    let mut params = AppConfigParams::Fira(FiraOpenSessionParams {
        session_time_base: Some(SessionTimeBase {
            base_session_id: 9,
            base_session_token: None,
            offset_ms: 10,
        }),
        ..fira(ProtocolVersion::new(2, 0))
    });

    prepare_open_params(&mut params, SessionPriority::Foreground, &driver, &config, "default")
        .await?;
    let AppConfigParams::Fira(rewritten) = params else {
        anyhow::bail!("params changed variant");
    };
    let time_base = rewritten.session_time_base.ok_or_else(|| anyhow::anyhow!("no time base"))?;
    assert_eq!(time_base.base_session_token, Some(0xbeef));
    assert!(driver.calls().iter().any(|call| *call == DriverCall::SessionToken { session_id: 9 }));
    Ok(())
}

#[tokio::test]
async fn ccc_rewrite_is_gated_on_the_feature_flag() -> anyhow::Result<()> {
    let driver = MockDriver::new();
    let mut config = test_config();
    let ccc = CccOpenRangingParams {
        protocol_version: ProtocolVersion::new(2, 0),
        initiation_time_ms: 100,
        ..Default::default()
    };

    // Flag off: untouched.
    let mut params = AppConfigParams::Ccc(ccc.clone());
    prepare_open_params(&mut params, SessionPriority::Ccc, &driver, &config, "default").await?;
    let AppConfigParams::Ccc(rewritten) = &params else {
        anyhow::bail!("params changed variant");
    };
    assert_eq!(rewritten.absolute_initiation_time_us, None);
    assert!(!queried_timestamp(&driver));

    // Flag on: rewritten.
    config.ccc_absolute_initiation_time_enabled = true;
    let mut params = AppConfigParams::Ccc(ccc);
    prepare_open_params(&mut params, SessionPriority::Ccc, &driver, &config, "default").await?;
    let AppConfigParams::Ccc(rewritten) = &params else {
        anyhow::bail!("params changed variant");
    };
    assert_eq!(rewritten.absolute_initiation_time_us, Some(1_000_000 + 100 * 1000));
    Ok(())
}

#[tokio::test]
async fn ccc_1_x_is_never_rewritten() -> anyhow::Result<()> {
    let driver = MockDriver::new();
    let mut config = test_config();
    config.ccc_absolute_initiation_time_enabled = true;
    let mut params = AppConfigParams::Ccc(CccOpenRangingParams {
        protocol_version: ProtocolVersion::new(1, 0),
        initiation_time_ms: 100,
        ..Default::default()
    });

    prepare_open_params(&mut params, SessionPriority::Ccc, &driver, &config, "default").await?;
    let AppConfigParams::Ccc(rewritten) = &params else {
        anyhow::bail!("params changed variant");
    };
    assert_eq!(rewritten.absolute_initiation_time_us, None);
    Ok(())
}

#[tokio::test]
async fn ccc_start_merge_overrides_ran_multiplier() -> anyhow::Result<()> {
    let driver = MockDriver::new();
    let config = test_config();
    let mut cached = AppConfigParams::Ccc(CccOpenRangingParams {
        ran_multiplier: 4,
        ..Default::default()
    });

    // No start params: the cached multiplier stands.
    prepare_start_params(&mut cached, None, &driver, &config, "default").await?;
    let AppConfigParams::Ccc(merged) = &cached else {
        anyhow::bail!("params changed variant");
    };
    assert_eq!(merged.ran_multiplier, 4);

    let start = CccStartRangingParams { ran_multiplier: Some(7), ..Default::default() };
    prepare_start_params(&mut cached, Some(&start), &driver, &config, "default").await?;
    let AppConfigParams::Ccc(merged) = &cached else {
        anyhow::bail!("params changed variant");
    };
    assert_eq!(merged.ran_multiplier, 7);
    Ok(())
}

#[tokio::test]
async fn start_params_are_ignored_for_fira() -> anyhow::Result<()> {
    let driver = MockDriver::new();
    let config = test_config();
    let mut cached = AppConfigParams::Fira(fira(ProtocolVersion::new(1, 1)));
    let start = CccStartRangingParams { ran_multiplier: Some(7), ..Default::default() };
    prepare_start_params(&mut cached, Some(&start), &driver, &config, "default").await?;
    assert!(matches!(cached, AppConfigParams::Fira(_)));
    Ok(())
}

#[test]
fn reconfigure_priority_injection_is_fira_only() {
    let mut params = RangingReconfigureParams::default();
    prepare_reconfigure_params(&mut params, SessionType::FiraRanging, SessionPriority::Ccc);
    assert_eq!(params.session_priority, Some(SessionPriority::Ccc.rank()));

    let mut params = RangingReconfigureParams::default();
    prepare_reconfigure_params(&mut params, SessionType::Ccc, SessionPriority::Ccc);
    assert_eq!(params.session_priority, None);
}
