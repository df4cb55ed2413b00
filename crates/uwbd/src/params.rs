// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol-specific session parameters.
//!
//! Open parameters are a tagged sum over the three session flavours; the
//! adapter rewrites them in place before they reach the driver, so every
//! field the rewrites touch lives here in structured form. TLV encoding is
//! the driver's problem.

use crate::uci::{
    DeviceRole, MacAddress, ProtocolVersion, RangeDataNtfConfig, RangingRoundUsage, SessionId,
    SessionType,
};

/// Base CCC hopping period in milliseconds; the RAN multiplier scales it.
const CCC_RAN_PERIOD_MS: u32 = 96;

/// Session open parameters, tagged by protocol.
#[derive(Debug, Clone)]
pub enum AppConfigParams {
    Fira(FiraOpenSessionParams),
    Ccc(CccOpenRangingParams),
    Radar(RadarOpenSessionParams),
}

impl AppConfigParams {
    pub fn session_type(&self) -> SessionType {
        match self {
            Self::Fira(_) => SessionType::FiraRanging,
            Self::Ccc(_) => SessionType::Ccc,
            Self::Radar(_) => SessionType::Radar,
        }
    }

    /// Effective ranging interval, used to scale the error-streak alarm.
    pub fn ranging_interval_ms(&self) -> u32 {
        match self {
            Self::Fira(p) => p.ranging_interval_ms,
            Self::Ccc(p) => p.ran_multiplier.saturating_mul(CCC_RAN_PERIOD_MS),
            Self::Radar(_) => 0,
        }
    }

    pub fn block_stride_length(&self) -> u8 {
        match self {
            Self::Fira(p) => p.block_stride_length,
            Self::Ccc(_) | Self::Radar(_) => 0,
        }
    }

    pub fn ranging_round_usage(&self) -> Option<RangingRoundUsage> {
        match self {
            Self::Fira(p) => Some(p.ranging_round_usage),
            Self::Ccc(_) | Self::Radar(_) => None,
        }
    }

    pub fn device_role(&self) -> Option<DeviceRole> {
        match self {
            Self::Fira(p) => Some(p.device_role),
            Self::Ccc(_) | Self::Radar(_) => None,
        }
    }

    pub fn data_repetition_count(&self) -> u8 {
        match self {
            Self::Fira(p) => p.data_repetition_count,
            Self::Ccc(_) | Self::Radar(_) => 0,
        }
    }
}

/// Reference to another session used as the time base of this one.
///
/// The client supplies the base session id; the adapter resolves the
/// driver-side token before the params are handed down.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeBase {
    pub base_session_id: SessionId,
    pub base_session_token: Option<u32>,
    pub offset_ms: u32,
}

/// FiRa open parameters.
#[derive(Debug, Clone)]
pub struct FiraOpenSessionParams {
    pub protocol_version: ProtocolVersion,
    pub device_role: DeviceRole,
    pub ranging_round_usage: RangingRoundUsage,
    /// Priority handed to the subsystem scheduler (1..=100). Overwritten
    /// with the stack-assigned priority at open and reconfigure.
    pub session_priority: u8,
    pub ranging_interval_ms: u32,
    pub block_stride_length: u8,
    pub range_data_ntf_config: RangeDataNtfConfig,
    pub dst_mac_addresses: Vec<MacAddress>,
    /// Initiation time relative to when the command is processed, in ms.
    pub initiation_time_ms: u32,
    /// UWBS-clock-absolute initiation time in microseconds, when known.
    pub absolute_initiation_time_us: Option<u64>,
    pub session_time_base: Option<SessionTimeBase>,
    pub data_repetition_count: u8,
}

impl Default for FiraOpenSessionParams {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::new(1, 1),
            device_role: DeviceRole::Initiator,
            ranging_round_usage: RangingRoundUsage::DsTwrDeferred,
            session_priority: 50,
            ranging_interval_ms: 200,
            block_stride_length: 0,
            range_data_ntf_config: RangeDataNtfConfig::Enable,
            dst_mac_addresses: Vec::new(),
            initiation_time_ms: 0,
            absolute_initiation_time_us: None,
            session_time_base: None,
            data_repetition_count: 0,
        }
    }
}

/// CCC open parameters.
#[derive(Debug, Clone)]
pub struct CccOpenRangingParams {
    pub protocol_version: ProtocolVersion,
    pub ran_multiplier: u32,
    pub initiation_time_ms: u32,
    pub absolute_initiation_time_us: Option<u64>,
}

impl Default for CccOpenRangingParams {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::new(1, 0),
            ran_multiplier: 4,
            initiation_time_ms: 0,
            absolute_initiation_time_us: None,
        }
    }
}

/// CCC start parameters; unset fields fall back to the cached open params.
#[derive(Debug, Clone, Copy, Default)]
pub struct CccStartRangingParams {
    pub ran_multiplier: Option<u32>,
    pub initiation_time_ms: Option<u32>,
    pub absolute_initiation_time_us: Option<u64>,
}

/// Radar open parameters.
#[derive(Debug, Clone)]
pub struct RadarOpenSessionParams {
    pub radar_data_type: u8,
    pub burst_period_ms: u16,
    pub sweeps_per_burst: u16,
    pub samples_per_sweep: u8,
}

impl Default for RadarOpenSessionParams {
    fn default() -> Self {
        Self { radar_data_type: 0, burst_period_ms: 100, sweeps_per_burst: 16, samples_per_sweep: 64 }
    }
}

/// In-place ranging reconfiguration. Unset fields are left untouched at the
/// subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangingReconfigureParams {
    pub range_data_ntf_config: Option<RangeDataNtfConfig>,
    pub block_stride_length: Option<u8>,
    pub session_priority: Option<u8>,
}

#[cfg(test)]
#[path = "params_tests.rs"]
mod tests;
