// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scriptable driver, a recording callback
//! sink, a manually-fired alarm manager, and an advertise registry stub.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::{ready, Future};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::advertise::AdvertiseManager;
use crate::alarm::{AlarmCallback, AlarmHandle, AlarmManager};
use crate::callbacks::SessionCallbacks;
use crate::config::Config;
use crate::error::{ChangeReason, Error, FailureReason, Result};
use crate::params::{AppConfigParams, FiraOpenSessionParams, RangingReconfigureParams};
use crate::policy::AttributionSource;
use crate::service::UwbSessionService;
use crate::uci::{
    Controlee, ControleeStatus, DeviceInfo, DriverNotification, HybridSessionConfig, MacAddress,
    MulticastKeys, MulticastListUpdateStatus, MulticastUpdateAction, MulticastUpdateStatusCode,
    ProtocolVersion, RadarDataNtf, RangingMeasurement, RangingRoundsUpdateStatus, ReasonCode,
    SessionHandle, SessionId, SessionRangeData, SessionState, SessionStatusNtf, SessionType,
    StatusCode, UwbDriver,
};

/// Config with short waits so timeout paths finish quickly in tests.
pub fn test_config() -> Config {
    Config {
        state_wait_timeout_ms: 200,
        ccc_state_wait_timeout_ms: 200,
        background_app_timeout_ms: 200,
        ..Config::default()
    }
}

/// Record of one driver command, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    InitSession { session_id: SessionId, session_type: SessionType },
    DeinitSession { session_id: SessionId },
    StartRanging { session_id: SessionId },
    StopRanging { session_id: SessionId },
    Reconfigure { session_id: SessionId, params: RangingReconfigureParams },
    SendData { session_id: SessionId, address: MacAddress, uci_sequence_number: u16 },
    MulticastListUpdate {
        session_id: SessionId,
        action: MulticastUpdateAction,
        controlee_count: usize,
        with_keys: bool,
    },
    QueryMaxDataSize { session_id: SessionId },
    QueryTimestamp,
    SessionToken { session_id: SessionId },
    UpdateDtTagRounds { session_id: SessionId },
    SetHybridConfig { session_id: SessionId },
    DeviceInfo,
}

#[derive(Default)]
struct MockDriverState {
    scripted: HashMap<&'static str, VecDeque<StatusCode>>,
    scripted_multicast: VecDeque<MulticastListUpdateStatus>,
    session_tokens: HashMap<SessionId, u32>,
    init_params: Vec<AppConfigParams>,
    calls: Vec<DriverCall>,
}

/// Scriptable in-memory driver.
///
/// Every status command answers `Ok` unless a status was scripted for its
/// op name. With auto-acknowledge enabled (the default) the expected
/// session state notification is emitted straight back through the
/// service's notification channel, so happy paths complete without any
/// manual event injection.
pub struct MockDriver {
    state: parking_lot::Mutex<MockDriverState>,
    ntf_tx: parking_lot::Mutex<Option<mpsc::Sender<DriverNotification>>>,
    auto_ack: AtomicBool,
    timestamp_micros: AtomicU64,
    max_data_size: AtomicU64,
    max_sessions: AtomicUsize,
    device_info: parking_lot::Mutex<DeviceInfo>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(MockDriverState::default()),
            ntf_tx: parking_lot::Mutex::new(None),
            auto_ack: AtomicBool::new(true),
            timestamp_micros: AtomicU64::new(1_000_000),
            max_data_size: AtomicU64::new(1024),
            max_sessions: AtomicUsize::new(8),
            device_info: parking_lot::Mutex::new(DeviceInfo {
                uci_version: ProtocolVersion::new(2, 0),
                mac_version: ProtocolVersion::new(1, 1),
                phy_version: ProtocolVersion::new(1, 1),
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Wire the driver's notification side to a service.
    pub fn connect(&self, ntf_tx: mpsc::Sender<DriverNotification>) {
        *self.ntf_tx.lock() = Some(ntf_tx);
    }

    /// Disable automatic session state notifications.
    pub fn manual_ack(&self) {
        self.auto_ack.store(false, Ordering::Release);
    }

    /// Script the next status for an op name (`"init_session"`,
    /// `"start_ranging"`, `"stop_ranging"`, `"deinit_session"`,
    /// `"reconfigure"`, `"send_data"`, `"multicast_list_update"`,
    /// `"set_hybrid_session_configuration"`).
    pub fn script_status(&self, op: &'static str, status: StatusCode) {
        self.state.lock().scripted.entry(op).or_default().push_back(status);
    }

    pub fn set_timestamp_micros(&self, value: u64) {
        self.timestamp_micros.store(value, Ordering::Release);
    }

    pub fn set_max_session_number(&self, value: usize) {
        self.max_sessions.store(value, Ordering::Release);
    }

    pub fn set_session_token(&self, session_id: SessionId, token: u32) {
        self.state.lock().session_tokens.insert(session_id, token);
    }

    pub fn set_device_info(&self, info: DeviceInfo) {
        *self.device_info.lock() = info;
    }

    /// Script the notification emitted after the next accepted multicast
    /// update; without a script every controlee is acknowledged OK.
    pub fn script_multicast_status(&self, status: MulticastListUpdateStatus) {
        self.state.lock().scripted_multicast.push_back(status);
    }

    /// Poll until a recorded call matches the predicate.
    pub async fn wait_for_call(
        &self,
        predicate: impl Fn(&DriverCall) -> bool,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if self.state.lock().calls.iter().any(&predicate) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("timed out waiting for driver call, got {:?}", self.calls());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// All recorded calls so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().calls.clone()
    }

    /// Open params as received by `init_session`, in order.
    pub fn init_params(&self) -> Vec<AppConfigParams> {
        self.state.lock().init_params.clone()
    }

    /// Highest number of concurrently executing driver commands observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    /// Emit a notification as if the subsystem produced it.
    pub fn emit(&self, ntf: DriverNotification) {
        if let Some(tx) = self.ntf_tx.lock().as_ref() {
            let _ = tx.try_send(ntf);
        }
    }

    fn next_status(&self, op: &'static str) -> StatusCode {
        self.state
            .lock()
            .scripted
            .get_mut(op)
            .and_then(VecDeque::pop_front)
            .unwrap_or(StatusCode::Ok)
    }

    fn record(&self, call: DriverCall) {
        self.state.lock().calls.push(call);
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn ack_state(&self, session_id: SessionId, state: SessionState) {
        if self.auto_ack.load(Ordering::Acquire) {
            self.emit(DriverNotification::SessionStatus(SessionStatusNtf {
                session_id,
                state,
                reason: ReasonCode::StateChangeWithSessionManagementCommands,
            }));
        }
    }

    fn status_command(
        &self,
        op: &'static str,
        call: DriverCall,
        session_id: SessionId,
        ack: Option<SessionState>,
    ) -> StatusCode {
        self.enter();
        self.record(call);
        let status = self.next_status(op);
        if status.is_ok() {
            if let Some(state) = ack {
                self.ack_state(session_id, state);
            }
        }
        self.exit();
        status
    }
}

impl UwbDriver for MockDriver {
    fn init_session(
        &self,
        session_id: SessionId,
        session_type: SessionType,
        params: &AppConfigParams,
        _chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send {
        self.state.lock().init_params.push(params.clone());
        ready(self.status_command(
            "init_session",
            DriverCall::InitSession { session_id, session_type },
            session_id,
            Some(SessionState::Idle),
        ))
    }

    fn deinit_session(
        &self,
        session_id: SessionId,
        _chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send {
        ready(self.status_command(
            "deinit_session",
            DriverCall::DeinitSession { session_id },
            session_id,
            Some(SessionState::Deinit),
        ))
    }

    fn start_ranging(
        &self,
        session_id: SessionId,
        _chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send {
        ready(self.status_command(
            "start_ranging",
            DriverCall::StartRanging { session_id },
            session_id,
            Some(SessionState::Active),
        ))
    }

    fn stop_ranging(
        &self,
        session_id: SessionId,
        _chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send {
        ready(self.status_command(
            "stop_ranging",
            DriverCall::StopRanging { session_id },
            session_id,
            Some(SessionState::Idle),
        ))
    }

    fn reconfigure(
        &self,
        session_id: SessionId,
        params: &RangingReconfigureParams,
        _chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send {
        ready(self.status_command(
            "reconfigure",
            DriverCall::Reconfigure { session_id, params: *params },
            session_id,
            None,
        ))
    }

    fn send_data(
        &self,
        session_id: SessionId,
        address: MacAddress,
        uci_sequence_number: u16,
        _payload: &[u8],
        _chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send {
        ready(self.status_command(
            "send_data",
            DriverCall::SendData { session_id, address, uci_sequence_number },
            session_id,
            None,
        ))
    }

    fn multicast_list_update(
        &self,
        session_id: SessionId,
        action: MulticastUpdateAction,
        controlees: &[Controlee],
        keys: Option<&MulticastKeys>,
        _chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send {
        let status = self.status_command(
            "multicast_list_update",
            DriverCall::MulticastListUpdate {
                session_id,
                action,
                controlee_count: controlees.len(),
                with_keys: keys.is_some(),
            },
            session_id,
            None,
        );
        if status.is_ok() && self.auto_ack.load(Ordering::Acquire) {
            let scripted = self.state.lock().scripted_multicast.pop_front();
            let update = scripted.unwrap_or_else(|| MulticastListUpdateStatus {
                session_id,
                remaining_list_size: controlees.len(),
                statuses: controlees
                    .iter()
                    .map(|controlee| ControleeStatus {
                        address: controlee.address,
                        sub_session_id: controlee.sub_session_id,
                        status: MulticastUpdateStatusCode::Ok,
                    })
                    .collect(),
            });
            self.emit(DriverNotification::MulticastListUpdate(update));
        }
        ready(status)
    }

    fn query_max_data_size_bytes(
        &self,
        session_id: SessionId,
        _chip_id: &str,
    ) -> impl Future<Output = Result<u16>> + Send {
        self.enter();
        self.record(DriverCall::QueryMaxDataSize { session_id });
        self.exit();
        ready(Ok(self.max_data_size.load(Ordering::Acquire) as u16))
    }

    fn query_uwbs_timestamp_micros(&self) -> impl Future<Output = Result<u64>> + Send {
        self.enter();
        self.record(DriverCall::QueryTimestamp);
        self.exit();
        ready(Ok(self.timestamp_micros.load(Ordering::Acquire)))
    }

    fn session_token(
        &self,
        session_id: SessionId,
        _chip_id: &str,
    ) -> impl Future<Output = Result<u32>> + Send {
        self.enter();
        self.record(DriverCall::SessionToken { session_id });
        self.exit();
        let token = self.state.lock().session_tokens.get(&session_id).copied();
        ready(match token {
            Some(token) => Ok(token),
            None => Err(Error::Driver(StatusCode::SessionNotExist)),
        })
    }

    fn update_dt_tag_ranging_rounds(
        &self,
        session_id: SessionId,
        ranging_round_indices: &[u8],
        _chip_id: &str,
    ) -> impl Future<Output = Result<RangingRoundsUpdateStatus>> + Send {
        self.enter();
        self.record(DriverCall::UpdateDtTagRounds { session_id });
        self.exit();
        ready(Ok(RangingRoundsUpdateStatus {
            status: StatusCode::Ok,
            ranging_round_indices: ranging_round_indices.to_vec(),
        }))
    }

    fn set_hybrid_session_configuration(
        &self,
        session_id: SessionId,
        _config: &HybridSessionConfig,
        _chip_id: &str,
    ) -> impl Future<Output = StatusCode> + Send {
        ready(self.status_command(
            "set_hybrid_session_configuration",
            DriverCall::SetHybridConfig { session_id },
            session_id,
            None,
        ))
    }

    fn max_session_number(&self) -> impl Future<Output = Result<usize>> + Send {
        ready(Ok(self.max_sessions.load(Ordering::Acquire)))
    }

    fn device_info(&self, _chip_id: &str) -> impl Future<Output = Result<DeviceInfo>> + Send {
        self.record(DriverCall::DeviceInfo);
        ready(Ok(*self.device_info.lock()))
    }
}

/// Every client callback, recorded in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    Opened,
    OpenFailed(FailureReason),
    Started,
    StartFailed(FailureReason),
    Stopped(ChangeReason),
    StopFailed(FailureReason),
    StoppedWithUciReason(ReasonCode),
    StoppedWithApiReason(ChangeReason),
    Reconfigured,
    ReconfigureFailed(FailureReason),
    ControleeAdded(MacAddress),
    ControleeAddFailed(MacAddress, StatusCode),
    ControleeRemoved(MacAddress),
    ControleeRemoveFailed(MacAddress, StatusCode),
    RangingResult { session_id: SessionId, ok: bool },
    DataReceived { address: MacAddress, sequence_number: u64, payload: Bytes },
    DataSent(MacAddress),
    DataSendFailed(MacAddress, FailureReason),
    Closed(StatusCode),
    ClosedWithReason(ChangeReason),
    RadarData { session_id: SessionId, sweeps: usize },
}

/// Callback sink that appends every delivery to a shared log.
#[derive(Default)]
pub struct RecordingCallbacks {
    events: parking_lot::Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallbacks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().clone()
    }

    /// Poll until the predicate holds over the recorded events.
    pub async fn wait_for(
        &self,
        predicate: impl Fn(&[CallbackEvent]) -> bool,
    ) -> anyhow::Result<Vec<CallbackEvent>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let snapshot = self.events();
            if predicate(&snapshot) {
                return Ok(snapshot);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("timed out waiting for callback, got {snapshot:?}");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until at least `count` events were recorded.
    pub async fn wait_for_count(&self, count: usize) -> anyhow::Result<Vec<CallbackEvent>> {
        self.wait_for(|events| events.len() >= count).await
    }

    fn push(&self, event: CallbackEvent) {
        self.events.lock().push(event);
    }
}

impl SessionCallbacks for RecordingCallbacks {
    fn on_ranging_opened(&self) {
        self.push(CallbackEvent::Opened);
    }
    fn on_ranging_open_failed(&self, reason: FailureReason) {
        self.push(CallbackEvent::OpenFailed(reason));
    }
    fn on_ranging_started(&self, _params: &AppConfigParams) {
        self.push(CallbackEvent::Started);
    }
    fn on_ranging_start_failed(&self, reason: FailureReason) {
        self.push(CallbackEvent::StartFailed(reason));
    }
    fn on_ranging_stopped(&self, reason: ChangeReason) {
        self.push(CallbackEvent::Stopped(reason));
    }
    fn on_ranging_stop_failed(&self, reason: FailureReason) {
        self.push(CallbackEvent::StopFailed(reason));
    }
    fn on_ranging_stopped_with_uci_reason(&self, reason: ReasonCode) {
        self.push(CallbackEvent::StoppedWithUciReason(reason));
    }
    fn on_ranging_stopped_with_api_reason(&self, reason: ChangeReason) {
        self.push(CallbackEvent::StoppedWithApiReason(reason));
    }
    fn on_ranging_reconfigured(&self) {
        self.push(CallbackEvent::Reconfigured);
    }
    fn on_ranging_reconfigure_failed(&self, reason: FailureReason) {
        self.push(CallbackEvent::ReconfigureFailed(reason));
    }
    fn on_controlee_added(&self, address: MacAddress) {
        self.push(CallbackEvent::ControleeAdded(address));
    }
    fn on_controlee_add_failed(&self, address: MacAddress, status: StatusCode) {
        self.push(CallbackEvent::ControleeAddFailed(address, status));
    }
    fn on_controlee_removed(&self, address: MacAddress) {
        self.push(CallbackEvent::ControleeRemoved(address));
    }
    fn on_controlee_remove_failed(&self, address: MacAddress, status: StatusCode) {
        self.push(CallbackEvent::ControleeRemoveFailed(address, status));
    }
    fn on_ranging_result(&self, data: &SessionRangeData) {
        self.push(CallbackEvent::RangingResult { session_id: data.session_id, ok: data.is_ok() });
    }
    fn on_data_received(&self, address: MacAddress, params: &serde_json::Value, payload: &Bytes) {
        let sequence_number = params
            .get("uci_sequence_number")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_default();
        self.push(CallbackEvent::DataReceived {
            address,
            sequence_number,
            payload: payload.clone(),
        });
    }
    fn on_data_sent(&self, address: MacAddress, _bundle: &serde_json::Value) {
        self.push(CallbackEvent::DataSent(address));
    }
    fn on_data_send_failed(
        &self,
        address: MacAddress,
        reason: FailureReason,
        _bundle: &serde_json::Value,
    ) {
        self.push(CallbackEvent::DataSendFailed(address, reason));
    }
    fn on_ranging_closed(&self, status: StatusCode) {
        self.push(CallbackEvent::Closed(status));
    }
    fn on_ranging_closed_with_reason(&self, reason: ChangeReason) {
        self.push(CallbackEvent::ClosedWithReason(reason));
    }
    fn on_radar_data_received(&self, data: &RadarDataNtf) {
        self.push(CallbackEvent::RadarData {
            session_id: data.session_id,
            sweeps: data.sweeps.len(),
        });
    }
}

struct FakeAlarm {
    tag: &'static str,
    delay: Duration,
    callback: AlarmCallback,
}

/// Alarm manager that never fires on its own; tests fire by tag.
#[derive(Default)]
pub struct FakeAlarmManager {
    next_id: AtomicU64,
    armed: parking_lot::Mutex<HashMap<u64, FakeAlarm>>,
}

impl FakeAlarmManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn armed_count(&self) -> usize {
        self.armed.lock().len()
    }

    pub fn armed_tags(&self) -> Vec<&'static str> {
        self.armed.lock().values().map(|alarm| alarm.tag).collect()
    }

    pub fn armed_delay(&self, tag: &'static str) -> Option<Duration> {
        self.armed.lock().values().find(|alarm| alarm.tag == tag).map(|alarm| alarm.delay)
    }

    /// Fire the first armed alarm with the given tag. Returns whether one
    /// was armed.
    pub fn fire(&self, tag: &'static str) -> bool {
        let alarm = {
            let mut armed = self.armed.lock();
            let id = armed.iter().find(|(_, alarm)| alarm.tag == tag).map(|(id, _)| *id);
            id.and_then(|id| armed.remove(&id))
        };
        match alarm {
            Some(alarm) => {
                (alarm.callback)();
                true
            }
            None => false,
        }
    }
}

impl AlarmManager for FakeAlarmManager {
    fn set_exact(&self, tag: &'static str, delay: Duration, on_fire: AlarmCallback) -> AlarmHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.armed.lock().insert(id, FakeAlarm { tag, delay, callback: on_fire });
        AlarmHandle(id)
    }

    fn cancel(&self, handle: AlarmHandle) {
        self.armed.lock().remove(&handle.0);
    }
}

/// Advertise registry stub with an explicit pointed set.
#[derive(Default)]
pub struct StubAdvertiseManager {
    pointed: parking_lot::Mutex<HashSet<MacAddress>>,
    updates: AtomicUsize,
    removed: parking_lot::Mutex<Vec<MacAddress>>,
}

impl StubAdvertiseManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_pointed(&self, address: MacAddress) {
        self.pointed.lock().insert(address);
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::Acquire)
    }

    pub fn removed_targets(&self) -> Vec<MacAddress> {
        self.removed.lock().clone()
    }
}

impl AdvertiseManager for StubAdvertiseManager {
    fn update_advertise_target(&self, _session_id: SessionId, _measurement: &RangingMeasurement) {
        self.updates.fetch_add(1, Ordering::AcqRel);
    }

    fn is_pointed_target(&self, address: MacAddress) -> bool {
        self.pointed.lock().contains(&address)
    }

    fn remove_advertise_target(&self, address: MacAddress) {
        self.pointed.lock().remove(&address);
        self.removed.lock().push(address);
    }
}

/// A measurement with sane defaults for range data notifications.
pub fn measurement(address: MacAddress, status: StatusCode) -> RangingMeasurement {
    RangingMeasurement {
        mac_address: address,
        status,
        nlos: 0,
        distance_cm: 150,
        aoa_azimuth: 0,
        aoa_azimuth_fom: 100,
        aoa_elevation: 0,
        aoa_elevation_fom: 100,
        rssi: 60,
    }
}

/// Third-party attribution chain with a single source.
pub fn app_attribution(uid: u32) -> Vec<AttributionSource> {
    vec![AttributionSource { uid, package_name: "com.example.ranging".to_owned() }]
}

/// A fully wired service over the mock driver, fake alarms, and stub
/// advertise registry.
pub struct TestHarness {
    pub driver: Arc<MockDriver>,
    pub alarms: Arc<FakeAlarmManager>,
    pub advertise: Arc<StubAdvertiseManager>,
    pub service: Arc<UwbSessionService<MockDriver>>,
}

impl TestHarness {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> anyhow::Result<Self> {
        let driver = Arc::new(MockDriver::new());
        let alarms = FakeAlarmManager::new();
        let advertise = StubAdvertiseManager::new();
        let service = UwbSessionService::builder(Arc::clone(&driver))
            .with_config(config)
            .with_advertise_manager(Arc::clone(&advertise) as Arc<dyn AdvertiseManager>)
            .with_alarm_manager(Arc::clone(&alarms) as Arc<dyn AlarmManager>)
            .build()?;
        driver.connect(service.notification_sender());
        Ok(Self { driver, alarms, advertise, service })
    }

    /// Open a FiRa session with default params and wait for the open
    /// callback.
    pub async fn open_fira(
        &self,
        handle: u64,
        session_id: SessionId,
        params: FiraOpenSessionParams,
    ) -> anyhow::Result<Arc<RecordingCallbacks>> {
        let callbacks = RecordingCallbacks::new();
        self.service
            .init_session(
                SessionHandle(handle),
                session_id,
                SessionType::FiraRanging,
                AppConfigParams::Fira(params),
                app_attribution(10_001),
                Arc::clone(&callbacks) as Arc<dyn SessionCallbacks>,
            )
            .await;
        callbacks.wait_for(|events| events.contains(&CallbackEvent::Opened)).await?;
        Ok(callbacks)
    }

    /// Open and immediately start a default FiRa session.
    pub async fn open_and_start_fira(
        &self,
        handle: u64,
        session_id: SessionId,
        params: FiraOpenSessionParams,
    ) -> anyhow::Result<Arc<RecordingCallbacks>> {
        let callbacks = self.open_fira(handle, session_id, params).await?;
        self.service.start_ranging(SessionHandle(handle), None).await;
        callbacks.wait_for(|events| events.contains(&CallbackEvent::Started)).await?;
        Ok(callbacks)
    }
}
