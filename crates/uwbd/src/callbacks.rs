// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session client callback sink.
//!
//! One sink is registered per open session. The service guarantees exactly
//! one terminal callback per accepted client request; sinks must not block,
//! as they are invoked from the dispatcher and router tasks.

use bytes::Bytes;

use crate::error::{ChangeReason, FailureReason};
use crate::params::AppConfigParams;
use crate::uci::{MacAddress, RadarDataNtf, ReasonCode, SessionRangeData, StatusCode};

pub trait SessionCallbacks: Send + Sync {
    fn on_ranging_opened(&self);
    fn on_ranging_open_failed(&self, reason: FailureReason);

    /// Ranging started; carries the effective params (CCC start merges may
    /// differ from what the client opened with).
    fn on_ranging_started(&self, params: &AppConfigParams);
    fn on_ranging_start_failed(&self, reason: FailureReason);

    fn on_ranging_stopped(&self, reason: ChangeReason);
    fn on_ranging_stop_failed(&self, reason: FailureReason);
    fn on_ranging_stopped_with_uci_reason(&self, reason: ReasonCode);
    fn on_ranging_stopped_with_api_reason(&self, reason: ChangeReason);

    fn on_ranging_reconfigured(&self);
    fn on_ranging_reconfigure_failed(&self, reason: FailureReason);

    fn on_controlee_added(&self, address: MacAddress);
    fn on_controlee_add_failed(&self, address: MacAddress, status: StatusCode);
    fn on_controlee_removed(&self, address: MacAddress);
    fn on_controlee_remove_failed(&self, address: MacAddress, status: StatusCode);

    fn on_ranging_result(&self, data: &SessionRangeData);

    fn on_data_received(&self, address: MacAddress, params: &serde_json::Value, payload: &Bytes);
    fn on_data_sent(&self, address: MacAddress, bundle: &serde_json::Value);
    fn on_data_send_failed(
        &self,
        address: MacAddress,
        reason: FailureReason,
        bundle: &serde_json::Value,
    );

    fn on_ranging_closed(&self, status: StatusCode);
    fn on_ranging_closed_with_reason(&self, reason: ChangeReason);

    fn on_radar_data_received(&self, data: &RadarDataNtf);
}

/// Vendor extension hook consulted before delivering queued one-way AoA data.
pub trait OemExtensionCallback: Send + Sync {
    /// Return `false` to veto delivery for the given peer's measurement.
    fn on_check_pointed_target(&self, data: &SessionRangeData) -> bool;
}
