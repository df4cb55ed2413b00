// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service facade: owns the session table, dispatcher, and notification
//! router, and exposes the client entry points.
//!
//! Entry points perform synchronous precondition checks against the table,
//! then enqueue a command and return — results are delivered through the
//! session's callback sink. Only query-style operations await a reply.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::advertise::AdvertiseManager;
use crate::alarm::{AlarmManager, TokioAlarmManager};
use crate::callbacks::{OemExtensionCallback, SessionCallbacks};
use crate::config::Config;
use crate::dispatch::{self, Command, DeinitMode, Dispatcher, StopTrigger};
use crate::error::{Error, FailureReason, Result};
use crate::params::{AppConfigParams, CccStartRangingParams, RangingReconfigureParams};
use crate::policy::{self, AttributionSource, SessionPriority, UidImportance};
use crate::router::{self, NotificationRouter};
use crate::session::SessionEntry;
use crate::table::{AdmitOutcome, SessionTable};
use crate::uci::{
    Controlee, DriverNotification, HybridSessionConfig, MacAddress, MulticastKeys,
    MulticastUpdateAction, RangingRoundsUpdateStatus, SessionHandle, SessionId, SessionState,
    SessionType, StatusCode, UwbDriver,
};

const COMMAND_QUEUE_DEPTH: usize = 64;
const NOTIFICATION_QUEUE_DEPTH: usize = 256;

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Builder for [`UwbSessionService`].
pub struct UwbSessionServiceBuilder<D: UwbDriver> {
    driver: Arc<D>,
    config: Config,
    advertise: Option<Arc<dyn AdvertiseManager>>,
    oem_extension: Option<Arc<dyn OemExtensionCallback>>,
    alarms: Option<Arc<dyn AlarmManager>>,
}

impl<D: UwbDriver> UwbSessionServiceBuilder<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            config: Config::default(),
            advertise: None,
            oem_extension: None,
            alarms: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_advertise_manager(mut self, advertise: Arc<dyn AdvertiseManager>) -> Self {
        self.advertise = Some(advertise);
        self
    }

    pub fn with_oem_extension(mut self, oem: Arc<dyn OemExtensionCallback>) -> Self {
        self.oem_extension = Some(oem);
        self
    }

    pub fn with_alarm_manager(mut self, alarms: Arc<dyn AlarmManager>) -> Self {
        self.alarms = Some(alarms);
        self
    }

    /// Validate the config and spawn the dispatcher and router tasks.
    pub fn build(self) -> anyhow::Result<Arc<UwbSessionService<D>>> {
        self.config.validate()?;
        let advertise = self
            .advertise
            .ok_or_else(|| anyhow::anyhow!("an advertise manager is required"))?;

        let shutdown = CancellationToken::new();
        let alarms = self
            .alarms
            .unwrap_or_else(|| Arc::new(TokioAlarmManager::new(shutdown.clone())));
        let config = Arc::new(self.config);
        let table = Arc::new(SessionTable::new());

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (ntf_tx, ntf_rx) = mpsc::channel(NOTIFICATION_QUEUE_DEPTH);

        let dispatcher_task = dispatch::spawn(
            Dispatcher {
                driver: Arc::clone(&self.driver),
                table: Arc::clone(&table),
                config: Arc::clone(&config),
                alarms: Arc::clone(&alarms),
                cmd_tx: cmd_tx.clone(),
                shutdown: shutdown.clone(),
            },
            cmd_rx,
        );
        let router_task = router::spawn(
            NotificationRouter {
                table: Arc::clone(&table),
                config: Arc::clone(&config),
                alarms: Arc::clone(&alarms),
                cmd_tx: cmd_tx.clone(),
                advertise,
                oem_extension: self.oem_extension,
                shutdown: shutdown.clone(),
            },
            ntf_rx,
        );

        info!(chip_id = %config.chip_id, "uwb session service started");
        Ok(Arc::new(UwbSessionService {
            driver: self.driver,
            config,
            table,
            alarms,
            cmd_tx,
            ntf_tx,
            uid_importance: parking_lot::Mutex::new(HashMap::new()),
            shutdown,
            tasks: parking_lot::Mutex::new(vec![dispatcher_task, router_task]),
        }))
    }
}

/// The UWB session manager.
pub struct UwbSessionService<D: UwbDriver> {
    driver: Arc<D>,
    config: Arc<Config>,
    table: Arc<SessionTable>,
    alarms: Arc<dyn AlarmManager>,
    cmd_tx: mpsc::Sender<Command>,
    ntf_tx: mpsc::Sender<DriverNotification>,
    uid_importance: parking_lot::Mutex<HashMap<u32, UidImportance>>,
    shutdown: CancellationToken,
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<D: UwbDriver> UwbSessionService<D> {
    pub fn builder(driver: Arc<D>) -> UwbSessionServiceBuilder<D> {
        UwbSessionServiceBuilder::new(driver)
    }

    /// Sender the HAL glue feeds driver notifications into.
    pub fn notification_sender(&self) -> mpsc::Sender<DriverNotification> {
        self.ntf_tx.clone()
    }

    /// Open a new session. The outcome arrives on the callback sink:
    /// `on_ranging_opened` or exactly one `on_ranging_open_failed`.
    pub async fn init_session(
        &self,
        handle: SessionHandle,
        session_id: SessionId,
        session_type: SessionType,
        params: AppConfigParams,
        attribution: Vec<AttributionSource>,
        callbacks: Arc<dyn SessionCallbacks>,
    ) {
        if params.session_type() != session_type {
            callbacks.on_ranging_open_failed(FailureReason::BadParameters);
            return;
        }

        let priority = policy::assign_priority(session_type, &attribution, |uid| {
            self.importance_of(uid)
        });
        if priority == SessionPriority::Background && !self.config.background_ranging_enabled {
            callbacks.on_ranging_open_failed(FailureReason::SystemPolicy);
            return;
        }

        // Subsystem-wide cap, on top of the per-protocol bounds. No
        // eviction here: the cap is a hardware limit, not a policy knob.
        if let Ok(max_sessions) = self.driver.max_session_number().await {
            if self.table.len().await >= max_sessions {
                warn!(session_id, max_sessions, "subsystem session cap reached, open rejected");
                callbacks.on_ranging_open_failed(FailureReason::MaxSessionsReached);
                return;
            }
        }

        let entry = SessionEntry::new(
            session_id,
            handle,
            session_type,
            self.config.chip_id.clone(),
            attribution,
            priority,
            params,
            self.config.rx_queue_depth,
            Arc::clone(&callbacks),
        );
        let bound = self.config.max_sessions(session_type);
        match self.table.admit_and_insert(entry, bound).await {
            AdmitOutcome::Inserted => {
                self.enqueue_open(handle, &callbacks).await;
            }
            AdmitOutcome::InsertedWithEviction(victim) => {
                info!(
                    session_id = victim.session_id,
                    priority = victim.priority().as_str(),
                    "evicting lowest-priority session to admit a new one"
                );
                if !self
                    .enqueue(Command::Deinit { handle: victim.handle, mode: DeinitMode::Eviction })
                    .await
                {
                    self.table.remove(handle).await;
                    callbacks.on_ranging_open_failed(FailureReason::Failed);
                    return;
                }
                self.enqueue_open(handle, &callbacks).await;
            }
            AdmitOutcome::RejectedMaxSessions => {
                warn!(session_id, session_type = %session_type, "session bound reached, open rejected");
                callbacks.on_ranging_open_failed(FailureReason::MaxSessionsReached);
            }
            AdmitOutcome::DuplicateSessionId | AdmitOutcome::DuplicateHandle => {
                callbacks.on_ranging_open_failed(FailureReason::BadParameters);
            }
        }
    }

    async fn enqueue_open(&self, handle: SessionHandle, callbacks: &Arc<dyn SessionCallbacks>) {
        if !self.enqueue(Command::Open { handle }).await {
            self.table.remove(handle).await;
            callbacks.on_ranging_open_failed(FailureReason::Failed);
        }
    }

    /// Start ranging on an open session.
    pub async fn start_ranging(
        &self,
        handle: SessionHandle,
        start_params: Option<CccStartRangingParams>,
    ) {
        if self.table.get(handle).await.is_none() {
            warn!(%handle, "start ranging for unknown session");
            return;
        }
        self.enqueue(Command::Start { handle, start_params }).await;
    }

    /// Stop ranging on an active session.
    pub async fn stop_ranging(&self, handle: SessionHandle) {
        if self.table.get(handle).await.is_none() {
            warn!(%handle, "stop ranging for unknown session");
            return;
        }
        self.enqueue(Command::Stop { handle, trigger: StopTrigger::Client }).await;
    }

    /// Reconfigure an open session. Returns the synchronous status; callback
    /// delivery follows for accepted requests.
    pub async fn reconfigure(
        &self,
        handle: SessionHandle,
        params: RangingReconfigureParams,
    ) -> StatusCode {
        if self.table.get(handle).await.is_none() {
            return StatusCode::SessionNotExist;
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self
            .enqueue(Command::Reconfigure {
                handle,
                params,
                notify_client: true,
                reply: Some(reply_tx),
            })
            .await
        {
            return StatusCode::Failed;
        }
        reply_rx.await.unwrap_or(StatusCode::Failed)
    }

    /// Add or remove controlees. Key material for provisioned STS must be
    /// jointly present or absent; partial presence is rejected up front.
    pub async fn update_controller_multicast_list(
        &self,
        handle: SessionHandle,
        action: MulticastUpdateAction,
        controlees: Vec<Controlee>,
        session_key: Option<Bytes>,
        sub_session_key_list: Option<Vec<Bytes>>,
    ) -> StatusCode {
        if self.table.get(handle).await.is_none() {
            return StatusCode::SessionNotExist;
        }
        let keys = match (session_key, sub_session_key_list) {
            (Some(session_key), Some(sub_session_key_list)) => {
                Some(MulticastKeys { session_key, sub_session_key_list })
            }
            (None, None) => None,
            _ => return StatusCode::Rejected,
        };
        if self.enqueue(Command::MulticastUpdate { handle, action, controlees, keys }).await {
            StatusCode::Ok
        } else {
            StatusCode::Failed
        }
    }

    /// Send an application data packet over an active session.
    pub async fn send_data(
        &self,
        handle: SessionHandle,
        address: MacAddress,
        bundle: serde_json::Value,
        payload: Bytes,
    ) {
        let Some(entry) = self.table.get(handle).await else {
            warn!(%handle, "send data for unknown session");
            return;
        };
        if payload.is_empty() {
            entry.callbacks.on_data_send_failed(address, FailureReason::InvalidParam, &bundle);
            return;
        }
        self.enqueue(Command::SendData { handle, address, bundle, payload }).await;
    }

    /// Close a session. A deinit already in flight makes this a no-op.
    pub async fn deinit_session(&self, handle: SessionHandle) {
        if self.table.get(handle).await.is_none() {
            return;
        }
        self.enqueue(Command::Deinit { handle, mode: DeinitMode::Client }).await;
    }

    /// The owning client died: tear the session down without callbacks.
    pub async fn on_client_death(&self, handle: SessionHandle) {
        if self.table.get(handle).await.is_none() {
            return;
        }
        self.enqueue(Command::Deinit { handle, mode: DeinitMode::ClientDeath }).await;
    }

    /// Importance transition from the platform's UID observer.
    pub async fn on_uid_importance_changed(&self, uid: u32, importance: UidImportance) {
        self.uid_importance.lock().insert(uid, importance);
        self.enqueue(Command::ImportanceChanged { uid, importance }).await;
    }

    pub async fn query_max_data_size(&self, handle: SessionHandle) -> Result<u16> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.enqueue(Command::QueryMaxDataSize { handle, reply: reply_tx }).await {
            return Err(Error::ShuttingDown);
        }
        reply_rx.await.map_err(|_| Error::ShuttingDown)?
    }

    pub async fn update_ranging_rounds_dt_tag(
        &self,
        handle: SessionHandle,
        ranging_round_indices: Vec<u8>,
    ) -> Result<RangingRoundsUpdateStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self
            .enqueue(Command::UpdateDtTagRounds { handle, ranging_round_indices, reply: reply_tx })
            .await
        {
            return Err(Error::ShuttingDown);
        }
        reply_rx.await.map_err(|_| Error::ShuttingDown)?
    }

    pub async fn set_hybrid_session_configuration(
        &self,
        handle: SessionHandle,
        config: HybridSessionConfig,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.enqueue(Command::SetHybridConfig { handle, config, reply: reply_tx }).await {
            return Err(Error::ShuttingDown);
        }
        reply_rx.await.map_err(|_| Error::ShuttingDown)?
    }

    pub async fn session_count(&self) -> usize {
        self.table.len().await
    }

    pub async fn session_state(&self, handle: SessionHandle) -> Option<SessionState> {
        Some(self.table.get(handle).await?.state())
    }

    /// Stop the service: cancel the worker tasks and deinitialize every
    /// remaining session at the subsystem, without client callbacks.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        for entry in self.table.sessions().await {
            let _ = self.driver.deinit_session(entry.session_id, &entry.chip_id).await;
            entry.transition_to(SessionState::Deinit);
            if let Some(alarm) = entry.error_streak_alarm.lock().take() {
                self.alarms.cancel(alarm);
            }
            if let Some(alarm) = entry.background_alarm.lock().take() {
                self.alarms.cancel(alarm);
            }
            entry.outbound.lock().clear();
            self.table.remove(entry.handle).await;
        }
        info!("uwb session service stopped");
    }

    fn importance_of(&self, uid: u32) -> UidImportance {
        self.uid_importance.lock().get(&uid).copied().unwrap_or(UidImportance::Foreground)
    }

    /// Post a command; `false` means the service is shutting down.
    async fn enqueue(&self, cmd: Command) -> bool {
        if self.cmd_tx.send(cmd).await.is_err() {
            warn!("command queue closed, dropping command");
            return false;
        }
        true
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
