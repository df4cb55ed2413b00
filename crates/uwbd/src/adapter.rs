// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol adapter: parameter rewriting applied on the dispatcher before
//! params reach the driver.
//!
//! Three rewrites exist: stack-priority injection (FiRa), relative-to-
//! absolute initiation time conversion (FiRa 2.0+ always, CCC 2.0+ behind a
//! feature flag), and session-time-base token substitution (FiRa 2.0+).
//! A client-supplied absolute time is never recomputed, and no rewrite is
//! attempted on a subsystem older than UCI 2.0.

use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::params::{AppConfigParams, CccStartRangingParams, RangingReconfigureParams};
use crate::policy::SessionPriority;
use crate::uci::{ProtocolVersion, SessionType, UwbDriver};

const FIRA_2_0: ProtocolVersion = ProtocolVersion::new(2, 0);
const CCC_2_0: ProtocolVersion = ProtocolVersion::new(2, 0);
const UCI_2_0: ProtocolVersion = ProtocolVersion::new(2, 0);

/// Rewrite open params in place before `init_session`.
pub(crate) async fn prepare_open_params<D: UwbDriver>(
    params: &mut AppConfigParams,
    priority: SessionPriority,
    driver: &D,
    config: &Config,
    chip_id: &str,
) -> Result<()> {
    match params {
        AppConfigParams::Fira(fira) => {
            fira.session_priority = priority.rank();
            if fira.protocol_version < FIRA_2_0 {
                return Ok(());
            }
            let wants_absolute_time =
                fira.absolute_initiation_time_us.is_none() && fira.initiation_time_ms > 0;
            let wants_time_base = fira
                .session_time_base
                .as_ref()
                .is_some_and(|time_base| time_base.base_session_token.is_none());
            if !wants_absolute_time && !wants_time_base {
                return Ok(());
            }
            if !uwbs_is_uci_2_0(driver, chip_id).await? {
                return Ok(());
            }
            if wants_absolute_time {
                let now_us = driver.query_uwbs_timestamp_micros().await?;
                let absolute = now_us + u64::from(fira.initiation_time_ms) * 1000;
                debug!(absolute, "computed absolute initiation time");
                fira.absolute_initiation_time_us = Some(absolute);
            }
            if wants_time_base {
                if let Some(time_base) = fira.session_time_base.as_mut() {
                    let token = driver.session_token(time_base.base_session_id, chip_id).await?;
                    time_base.base_session_token = Some(token);
                }
            }
        }
        AppConfigParams::Ccc(ccc) => {
            rewrite_ccc_initiation_time(
                ccc.protocol_version,
                &mut ccc.absolute_initiation_time_us,
                ccc.initiation_time_ms,
                driver,
                config,
                chip_id,
            )
            .await?;
        }
        AppConfigParams::Radar(_) => {}
    }
    Ok(())
}

/// Merge start params into the cached open params before `start_ranging`.
///
/// Only CCC sessions carry start params: a supplied RAN multiplier
/// overrides the cached one, and the absolute-initiation-time rule is
/// re-applied for the (possibly new) relative time.
pub(crate) async fn prepare_start_params<D: UwbDriver>(
    cached: &mut AppConfigParams,
    start: Option<&CccStartRangingParams>,
    driver: &D,
    config: &Config,
    chip_id: &str,
) -> Result<()> {
    let AppConfigParams::Ccc(ccc) = cached else {
        return Ok(());
    };
    if let Some(start) = start {
        if let Some(ran_multiplier) = start.ran_multiplier {
            ccc.ran_multiplier = ran_multiplier;
        }
        if let Some(initiation_time_ms) = start.initiation_time_ms {
            ccc.initiation_time_ms = initiation_time_ms;
            ccc.absolute_initiation_time_us = None;
        }
        if let Some(absolute) = start.absolute_initiation_time_us {
            ccc.absolute_initiation_time_us = Some(absolute);
        }
    }
    rewrite_ccc_initiation_time(
        ccc.protocol_version,
        &mut ccc.absolute_initiation_time_us,
        ccc.initiation_time_ms,
        driver,
        config,
        chip_id,
    )
    .await
}

/// Inject the stack priority into a reconfigure for FiRa sessions.
pub(crate) fn prepare_reconfigure_params(
    params: &mut RangingReconfigureParams,
    session_type: SessionType,
    priority: SessionPriority,
) {
    if session_type == SessionType::FiraRanging {
        params.session_priority = Some(priority.rank());
    }
}

async fn rewrite_ccc_initiation_time<D: UwbDriver>(
    version: ProtocolVersion,
    absolute_us: &mut Option<u64>,
    initiation_time_ms: u32,
    driver: &D,
    config: &Config,
    chip_id: &str,
) -> Result<()> {
    if !config.ccc_absolute_initiation_time_enabled {
        return Ok(());
    }
    if version < CCC_2_0 || absolute_us.is_some() || initiation_time_ms == 0 {
        return Ok(());
    }
    if !uwbs_is_uci_2_0(driver, chip_id).await? {
        return Ok(());
    }
    let now_us = driver.query_uwbs_timestamp_micros().await?;
    *absolute_us = Some(now_us + u64::from(initiation_time_ms) * 1000);
    Ok(())
}

/// Whether the subsystem speaks UCI 2.0+, per its cached device info.
async fn uwbs_is_uci_2_0<D: UwbDriver>(driver: &D, chip_id: &str) -> Result<bool> {
    Ok(driver.device_info(chip_id).await?.uci_version >= UCI_2_0)
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
