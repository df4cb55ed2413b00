// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advertise-target registry contract.
//!
//! During one-way AoA flows the router feeds every observer measurement to
//! the registry, and queued inbound data is only released once the registry
//! reports the transmitter as the pointed target. The registry itself (AoA
//! filtering, pointing geometry) lives outside this crate.

use crate::uci::{MacAddress, RangingMeasurement, SessionId};

pub trait AdvertiseManager: Send + Sync {
    /// Record the latest observer measurement for a candidate transmitter.
    fn update_advertise_target(&self, session_id: SessionId, measurement: &RangingMeasurement);

    /// Whether the device is currently pointed at the given transmitter.
    fn is_pointed_target(&self, address: MacAddress) -> bool;

    /// Drop a transmitter from the registry after its data was delivered.
    fn remove_advertise_target(&self, address: MacAddress);
}
