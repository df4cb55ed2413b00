// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UCI-level vocabulary shared across the service: identifiers, states,
//! status/reason codes, notification payloads, and the native driver
//! contract.

use std::fmt;
use std::future::Future;

use bytes::Bytes;

use crate::error::Result;
use crate::params::{AppConfigParams, RangingReconfigureParams};

/// UCI session identifier, unique across the whole subsystem.
pub type SessionId = u32;

/// Opaque client-scoped token identifying one open session.
///
/// Handles are allocated by the client transport layer; the service never
/// derives meaning from the value beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// The kind of session opened at the subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionType {
    FiraRanging,
    Ccc,
    Radar,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FiraRanging => "fira",
            Self::Ccc => "ccc",
            Self::Radar => "radar",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle state as tracked by the service.
///
/// `Deinit` is terminal: once a session reaches it the record is removed
/// from the table and the id is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Idle,
    Active,
    Error,
    Deinit,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`.
    ///
    /// `Error` and `Deinit` may be entered from anywhere; `Error` is only
    /// left through `Deinit`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        if self == next {
            return false;
        }
        match next {
            SessionState::Deinit => self != SessionState::Deinit,
            SessionState::Error => !matches!(self, SessionState::Error | SessionState::Deinit),
            SessionState::Idle => matches!(self, SessionState::Init | SessionState::Active),
            SessionState::Active => self == SessionState::Idle,
            SessionState::Init => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Idle => "IDLE",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
            Self::Deinit => "DEINIT",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status byte returned by every synchronous driver command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Rejected,
    Failed,
    InvalidParam,
    SessionNotExist,
    SessionDuplicate,
    SessionActive,
    MaxSessionsExceeded,
    DataTransferError,
}

impl StatusCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
            Self::InvalidParam => "INVALID_PARAM",
            Self::SessionNotExist => "SESSION_NOT_EXIST",
            Self::SessionDuplicate => "SESSION_DUPLICATE",
            Self::SessionActive => "SESSION_ACTIVE",
            Self::MaxSessionsExceeded => "MAX_SESSIONS_EXCEEDED",
            Self::DataTransferError => "DATA_TRANSFER_ERROR",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason delivered alongside a session state notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    StateChangeWithSessionManagementCommands,
    MaxRangingRoundRetryCountReached,
    MaxNumberOfMeasurementsReached,
    SessionSuspended,
    SessionResumed,
    ErrorInsufficientSlots,
    Other(u8),
}

/// A UWB device address in either UCI addressing mode.
///
/// Short addresses are two bytes on the wire, extended addresses eight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MacAddress {
    Short(u16),
    Extended(u64),
}

impl MacAddress {
    /// Widen to a u64 for map keys and logs.
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Short(v) => u64::from(*v),
            Self::Extended(v) => *v,
        }
    }

    pub fn into_le_bytes(self) -> Vec<u8> {
        match self {
            Self::Short(v) => v.to_le_bytes().into(),
            Self::Extended(v) => v.to_le_bytes().into(),
        }
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short(v) => write!(f, "{v:04x}"),
            Self::Extended(v) => write!(f, "{v:016x}"),
        }
    }
}

/// Measurement type tag of a range data notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangingMeasurementType {
    TwoWay,
    OwrAoa,
    DlTdoa,
}

/// Ranging round usage configured at session open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangingRoundUsage {
    SsTwrDeferred,
    DsTwrDeferred,
    OwrAoaMeasurement,
    DlTdoa,
}

/// Role the local device plays in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Initiator,
    Responder,
    Observer,
    Advertiser,
}

/// Range data notification delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeDataNtfConfig {
    Enable,
    Disable,
    EnableProximity,
}

/// One peer's measurement inside a range data notification.
#[derive(Debug, Clone)]
pub struct RangingMeasurement {
    pub mac_address: MacAddress,
    pub status: StatusCode,
    pub nlos: u8,
    pub distance_cm: u16,
    pub aoa_azimuth: i16,
    pub aoa_azimuth_fom: u8,
    pub aoa_elevation: i16,
    pub aoa_elevation_fom: u8,
    pub rssi: u8,
}

/// Asynchronous report of the latest ranging measurements for a session.
#[derive(Debug, Clone)]
pub struct SessionRangeData {
    pub session_id: SessionId,
    pub measurement_type: RangingMeasurementType,
    pub sequence_number: u32,
    pub current_ranging_interval_ms: u32,
    pub measurements: Vec<RangingMeasurement>,
}

impl SessionRangeData {
    /// A notification counts as successful when at least one peer measured OK.
    pub fn is_ok(&self) -> bool {
        self.measurements.iter().any(|m| m.status.is_ok())
    }
}

/// Session state change reported by the subsystem.
#[derive(Debug, Clone, Copy)]
pub struct SessionStatusNtf {
    pub session_id: SessionId,
    pub state: SessionState,
    pub reason: ReasonCode,
}

/// One controlee of a multicast ranging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controlee {
    pub address: MacAddress,
    pub sub_session_id: u32,
}

/// Direction of a controller multicast list update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulticastUpdateAction {
    Add,
    Remove,
}

/// Per-controlee status inside a multicast list update notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulticastUpdateStatusCode {
    Ok,
    ListFull,
    KeyFetchFail,
    SubSessionIdNotFound,
    AddressNotFound,
    AddressAlreadyPresent,
}

impl MulticastUpdateStatusCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Collapse onto the shared status vocabulary for client callbacks.
    pub fn to_status_code(self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::Ok,
            Self::ListFull => StatusCode::MaxSessionsExceeded,
            Self::KeyFetchFail => StatusCode::Failed,
            Self::SubSessionIdNotFound | Self::AddressNotFound => StatusCode::InvalidParam,
            Self::AddressAlreadyPresent => StatusCode::Rejected,
        }
    }
}

/// Per-controlee outcome reported after a multicast list update command.
#[derive(Debug, Clone, Copy)]
pub struct ControleeStatus {
    pub address: MacAddress,
    pub sub_session_id: u32,
    pub status: MulticastUpdateStatusCode,
}

/// Multicast list update notification.
#[derive(Debug, Clone)]
pub struct MulticastListUpdateStatus {
    pub session_id: SessionId,
    pub remaining_list_size: usize,
    pub statuses: Vec<ControleeStatus>,
}

/// Session and sub-session keys for provisioned-STS controlee additions.
#[derive(Debug, Clone)]
pub struct MulticastKeys {
    pub session_key: Bytes,
    pub sub_session_key_list: Vec<Bytes>,
}

/// Inbound application data packet.
#[derive(Debug, Clone)]
pub struct DataRcvNtf {
    pub session_id: SessionId,
    pub status: StatusCode,
    pub uci_sequence_number: u16,
    pub source_address: MacAddress,
    pub payload: Bytes,
}

/// Terminal or interim status of an outbound data transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTransferStatus {
    Ok,
    RepetitionOk,
    ErrorDataTransfer,
    ErrorNoCreditAvailable,
    ErrorRejected,
    ErrorOngoing,
}

impl DataTransferStatus {
    pub fn is_terminal_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Data transfer status notification correlating an earlier send.
#[derive(Debug, Clone, Copy)]
pub struct DataTransferStatusNtf {
    pub session_id: SessionId,
    pub uci_sequence_number: u16,
    pub status: DataTransferStatus,
    pub tx_count: u8,
}

/// One radar sweep inside a radar data message.
#[derive(Debug, Clone)]
pub struct RadarSweepData {
    pub sequence_number: u32,
    pub timestamp: u32,
    pub sample_data: Bytes,
}

/// Radar data message from a radar-type session.
#[derive(Debug, Clone)]
pub struct RadarDataNtf {
    pub session_id: SessionId,
    pub radar_data_type: u8,
    pub sweeps: Vec<RadarSweepData>,
}

/// Dotted protocol version, ordered lexicographically (major, then minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Cached device info response from the subsystem.
#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    pub uci_version: ProtocolVersion,
    pub mac_version: ProtocolVersion,
    pub phy_version: ProtocolVersion,
}

/// Status record of a DT-TAG ranging round update.
#[derive(Debug, Clone)]
pub struct RangingRoundsUpdateStatus {
    pub status: StatusCode,
    pub ranging_round_indices: Vec<u8>,
}

/// One phase of a hybrid session schedule.
#[derive(Debug, Clone, Copy)]
pub struct HybridPhase {
    pub session_token: u32,
    pub start_slot_index: u16,
    pub end_slot_index: u16,
}

/// Hybrid session configuration handed to the controller.
#[derive(Debug, Clone)]
pub struct HybridSessionConfig {
    pub update_time: [u8; 8],
    pub phases: Vec<HybridPhase>,
}

/// Asynchronous events from the native driver.
///
/// The HAL glue feeds these into the sender returned by
/// [`UwbSessionService::notification_sender`](crate::service::UwbSessionService::notification_sender);
/// the router task consumes them in driver order.
#[derive(Debug, Clone)]
pub enum DriverNotification {
    SessionStatus(SessionStatusNtf),
    RangeData(SessionRangeData),
    MulticastListUpdate(MulticastListUpdateStatus),
    DataReceived(DataRcvNtf),
    DataTransferStatus(DataTransferStatusNtf),
    RadarData(RadarDataNtf),
}

/// Contract of the native UWB driver.
///
/// Commands are issued one at a time by the dispatcher; implementations may
/// block internally but must not assume any particular calling thread.
/// Status-byte commands report transport failure as [`StatusCode::Failed`].
pub trait UwbDriver: Send + Sync + 'static {
    fn init_session(
        &self,
        session_id: SessionId,
        session_type: SessionType,
        params: &AppConfigParams,
        chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send;

    fn deinit_session(
        &self,
        session_id: SessionId,
        chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send;

    fn start_ranging(
        &self,
        session_id: SessionId,
        chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send;

    fn stop_ranging(
        &self,
        session_id: SessionId,
        chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send;

    fn reconfigure(
        &self,
        session_id: SessionId,
        params: &RangingReconfigureParams,
        chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send;

    fn send_data(
        &self,
        session_id: SessionId,
        address: MacAddress,
        uci_sequence_number: u16,
        payload: &[u8],
        chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send;

    fn multicast_list_update(
        &self,
        session_id: SessionId,
        action: MulticastUpdateAction,
        controlees: &[Controlee],
        keys: Option<&MulticastKeys>,
        chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send;

    fn query_max_data_size_bytes(
        &self,
        session_id: SessionId,
        chip_id: &str,
    ) -> impl Future<Output = Result<u16>> + Send;

    fn query_uwbs_timestamp_micros(&self) -> impl Future<Output = Result<u64>> + Send;

    fn session_token(
        &self,
        session_id: SessionId,
        chip_id: &str,
    ) -> impl Future<Output = Result<u32>> + Send;

    fn update_dt_tag_ranging_rounds(
        &self,
        session_id: SessionId,
        ranging_round_indices: &[u8],
        chip_id: &str,
    ) -> impl Future<Output = Result<RangingRoundsUpdateStatus>> + Send;

    fn set_hybrid_session_configuration(
        &self,
        session_id: SessionId,
        config: &HybridSessionConfig,
        chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send;

    fn max_session_number(&self) -> impl Future<Output = Result<usize>> + Send;

    fn device_info(&self, chip_id: &str) -> impl Future<Output = Result<DeviceInfo>> + Send;
}

#[cfg(test)]
#[path = "uci_tests.rs"]
mod tests;
