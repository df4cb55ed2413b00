// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serialized command execution.
//!
//! All radio-directed work funnels through one mpsc queue drained by a
//! single task, so at most one driver command is in flight service-wide and
//! commands for one session execute in acceptance order. A command that
//! needs a state change blocks only this task — on the session's `watch`
//! channel, bounded by a per-protocol timeout — while later commands queue
//! behind it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter;
use crate::alarm::{AlarmManager, NON_PRIVILEGED_BG_APP_TIMER_TAG};
use crate::config::Config;
use crate::error::{ChangeReason, Error, FailureReason, Result};
use crate::params::{AppConfigParams, CccStartRangingParams, RangingReconfigureParams};
use crate::policy::{SessionPriority, UidImportance};
use crate::session::SessionEntry;
use crate::table::SessionTable;
use crate::uci::{
    Controlee, HybridSessionConfig, MacAddress, MulticastKeys, MulticastUpdateAction,
    RangeDataNtfConfig, RangingRoundsUpdateStatus, SessionHandle, SessionState, SessionType,
    StatusCode, UwbDriver,
};

/// What initiated a stop, deciding which callback surfaces the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopTrigger {
    Client,
    ErrorStreak,
    BackgroundPolicy,
}

/// What initiated a deinit, deciding the close callback (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeinitMode {
    Client,
    Eviction,
    ClientDeath,
}

/// One unit of work for the dispatcher.
pub(crate) enum Command {
    Open {
        handle: SessionHandle,
    },
    Start {
        handle: SessionHandle,
        start_params: Option<CccStartRangingParams>,
    },
    Stop {
        handle: SessionHandle,
        trigger: StopTrigger,
    },
    Reconfigure {
        handle: SessionHandle,
        params: RangingReconfigureParams,
        notify_client: bool,
        reply: Option<oneshot::Sender<StatusCode>>,
    },
    MulticastUpdate {
        handle: SessionHandle,
        action: MulticastUpdateAction,
        controlees: Vec<Controlee>,
        keys: Option<MulticastKeys>,
    },
    SendData {
        handle: SessionHandle,
        address: MacAddress,
        bundle: serde_json::Value,
        payload: Bytes,
    },
    Deinit {
        handle: SessionHandle,
        mode: DeinitMode,
    },
    QueryMaxDataSize {
        handle: SessionHandle,
        reply: oneshot::Sender<Result<u16>>,
    },
    UpdateDtTagRounds {
        handle: SessionHandle,
        ranging_round_indices: Vec<u8>,
        reply: oneshot::Sender<Result<RangingRoundsUpdateStatus>>,
    },
    SetHybridConfig {
        handle: SessionHandle,
        config: HybridSessionConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    ImportanceChanged {
        uid: u32,
        importance: UidImportance,
    },
}

pub(crate) struct Dispatcher<D: UwbDriver> {
    pub driver: Arc<D>,
    pub table: Arc<SessionTable>,
    pub config: Arc<Config>,
    pub alarms: Arc<dyn AlarmManager>,
    /// Used by policy paths to re-post follow-up commands (alarm firings).
    pub cmd_tx: mpsc::Sender<Command>,
    pub shutdown: CancellationToken,
}

/// Drain the command queue until shutdown or all senders drop.
pub(crate) fn spawn<D: UwbDriver>(
    dispatcher: Dispatcher<D>,
    mut rx: mpsc::Receiver<Command>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = dispatcher.shutdown.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => dispatcher.handle(cmd).await,
                    None => break,
                },
            }
        }
        debug!("dispatcher stopped");
    })
}

impl<D: UwbDriver> Dispatcher<D> {
    async fn handle(&self, cmd: Command) {
        match cmd {
            Command::Open { handle } => self.handle_open(handle).await,
            Command::Start { handle, start_params } => {
                self.handle_start(handle, start_params).await;
            }
            Command::Stop { handle, trigger } => self.handle_stop(handle, trigger).await,
            Command::Reconfigure { handle, params, notify_client, reply } => {
                let status = self.handle_reconfigure(handle, params, notify_client).await;
                if let Some(reply) = reply {
                    let _ = reply.send(status);
                }
            }
            Command::MulticastUpdate { handle, action, controlees, keys } => {
                self.handle_multicast_update(handle, action, controlees, keys).await;
            }
            Command::SendData { handle, address, bundle, payload } => {
                self.handle_send_data(handle, address, bundle, payload).await;
            }
            Command::Deinit { handle, mode } => self.handle_deinit(handle, mode).await,
            Command::QueryMaxDataSize { handle, reply } => {
                let _ = reply.send(self.handle_query_max_data_size(handle).await);
            }
            Command::UpdateDtTagRounds { handle, ranging_round_indices, reply } => {
                let _ =
                    reply.send(self.handle_update_dt_tag_rounds(handle, ranging_round_indices).await);
            }
            Command::SetHybridConfig { handle, config, reply } => {
                let _ = reply.send(self.handle_set_hybrid_config(handle, config).await);
            }
            Command::ImportanceChanged { uid, importance } => {
                self.handle_importance_changed(uid, importance).await;
            }
        }
    }

    async fn handle_open(&self, handle: SessionHandle) {
        let Some(entry) = self.table.get(handle).await else {
            warn!(%handle, "open: session vanished before dispatch");
            return;
        };
        let Some(mut params) = entry.params_snapshot() else {
            self.abandon_open(&entry, FailureReason::BadParameters).await;
            return;
        };

        if let Err(e) = adapter::prepare_open_params(
            &mut params,
            entry.priority(),
            self.driver.as_ref(),
            &self.config,
            &entry.chip_id,
        )
        .await
        {
            warn!(session_id = entry.session_id, err = %e, "open: param rewrite failed");
            self.abandon_open(&entry, FailureReason::Failed).await;
            return;
        }
        *entry.params.lock() = Some(params.clone());

        let status = self
            .driver
            .init_session(entry.session_id, entry.session_type, &params, &entry.chip_id)
            .await;
        if !status.is_ok() {
            warn!(session_id = entry.session_id, %status, "open: driver rejected init");
            self.abandon_open(&entry, status.into()).await;
            return;
        }

        let timeout = self.config.state_wait_timeout(entry.session_type);
        match wait_for_state(&entry, SessionState::Idle, timeout).await {
            Ok(SessionState::Idle) => {
                info!(session_id = entry.session_id, session_type = %entry.session_type, "session opened");
                entry.callbacks.on_ranging_opened();
            }
            Ok(_) | Err(_) => {
                // The session is half-open at the subsystem; tear it down
                // before reporting failure.
                entry.mark_deinit_in_progress();
                let _ = self.driver.deinit_session(entry.session_id, &entry.chip_id).await;
                self.abandon_open(&entry, FailureReason::Failed).await;
            }
        }
    }

    /// Remove a session that never finished opening.
    async fn abandon_open(&self, entry: &Arc<SessionEntry>, reason: FailureReason) {
        entry.transition_to(SessionState::Deinit);
        self.table.remove(entry.handle).await;
        entry.callbacks.on_ranging_open_failed(reason);
    }

    async fn handle_start(
        &self,
        handle: SessionHandle,
        start_params: Option<CccStartRangingParams>,
    ) {
        let Some(entry) = self.table.get(handle).await else {
            warn!(%handle, "start: unknown session");
            return;
        };
        if entry.session_type == SessionType::Radar {
            entry.callbacks.on_ranging_start_failed(FailureReason::Rejected);
            return;
        }
        match entry.state() {
            SessionState::Idle => {}
            SessionState::Active => {
                entry.callbacks.on_ranging_start_failed(FailureReason::Rejected);
                return;
            }
            _ => {
                entry.callbacks.on_ranging_start_failed(FailureReason::Failed);
                return;
            }
        }

        let Some(mut params) = entry.params_snapshot() else {
            entry.callbacks.on_ranging_start_failed(FailureReason::Failed);
            return;
        };
        if let Err(e) = adapter::prepare_start_params(
            &mut params,
            start_params.as_ref(),
            self.driver.as_ref(),
            &self.config,
            &entry.chip_id,
        )
        .await
        {
            warn!(session_id = entry.session_id, err = %e, "start: param rewrite failed");
            entry.callbacks.on_ranging_start_failed(FailureReason::Failed);
            return;
        }
        *entry.params.lock() = Some(params.clone());

        let status = self.driver.start_ranging(entry.session_id, &entry.chip_id).await;
        if !status.is_ok() {
            entry.callbacks.on_ranging_start_failed(status.into());
            return;
        }

        let timeout = self.config.state_wait_timeout(entry.session_type);
        match wait_for_state(&entry, SessionState::Active, timeout).await {
            Ok(SessionState::Active) => {
                info!(session_id = entry.session_id, "ranging started");
                entry.callbacks.on_ranging_started(&params);
            }
            Ok(_) | Err(_) => entry.callbacks.on_ranging_start_failed(FailureReason::Failed),
        }
    }

    async fn handle_stop(&self, handle: SessionHandle, trigger: StopTrigger) {
        let Some(entry) = self.table.get(handle).await else {
            warn!(%handle, "stop: unknown session");
            return;
        };
        match entry.state() {
            SessionState::Active => {}
            SessionState::Idle => {
                // Already stopped. Policy-initiated stops have nothing to
                // report; a client call is answered as a stop.
                if trigger == StopTrigger::Client {
                    entry.callbacks.on_ranging_stopped(ChangeReason::LocalApi);
                }
                return;
            }
            SessionState::Error => {
                entry.callbacks.on_ranging_stop_failed(FailureReason::Rejected);
                return;
            }
            _ => {
                entry.callbacks.on_ranging_stop_failed(FailureReason::Failed);
                return;
            }
        }

        let status = self.driver.stop_ranging(entry.session_id, &entry.chip_id).await;
        if !status.is_ok() {
            entry.callbacks.on_ranging_stop_failed(status.into());
            return;
        }

        let timeout = self.config.state_wait_timeout(entry.session_type);
        match wait_for_state(&entry, SessionState::Idle, timeout).await {
            Ok(SessionState::Idle) => {
                self.cancel_error_streak_alarm(&entry);
                info!(session_id = entry.session_id, trigger = ?trigger, "ranging stopped");
                match trigger {
                    StopTrigger::Client => {
                        entry.callbacks.on_ranging_stopped(ChangeReason::LocalApi);
                    }
                    StopTrigger::ErrorStreak | StopTrigger::BackgroundPolicy => {
                        entry
                            .callbacks
                            .on_ranging_stopped_with_api_reason(ChangeReason::SystemPolicy);
                    }
                }
            }
            Ok(_) | Err(_) => entry.callbacks.on_ranging_stop_failed(FailureReason::Failed),
        }
    }

    async fn handle_reconfigure(
        &self,
        handle: SessionHandle,
        mut params: RangingReconfigureParams,
        notify_client: bool,
    ) -> StatusCode {
        let Some(entry) = self.table.get(handle).await else {
            return StatusCode::SessionNotExist;
        };
        if !matches!(entry.state(), SessionState::Idle | SessionState::Active) {
            return StatusCode::SessionNotExist;
        }

        adapter::prepare_reconfigure_params(&mut params, entry.session_type, entry.priority());
        let status = self.driver.reconfigure(entry.session_id, &params, &entry.chip_id).await;
        if status.is_ok() {
            if let Some(AppConfigParams::Fira(fira)) = entry.params.lock().as_mut() {
                if let Some(ntf_config) = params.range_data_ntf_config {
                    fira.range_data_ntf_config = ntf_config;
                }
                if let Some(stride) = params.block_stride_length {
                    fira.block_stride_length = stride;
                }
                if let Some(priority) = params.session_priority {
                    fira.session_priority = priority;
                }
            }
            if notify_client {
                entry.callbacks.on_ranging_reconfigured();
            }
        } else if notify_client {
            entry.callbacks.on_ranging_reconfigure_failed(status.into());
        }
        status
    }

    async fn handle_multicast_update(
        &self,
        handle: SessionHandle,
        action: MulticastUpdateAction,
        controlees: Vec<Controlee>,
        keys: Option<MulticastKeys>,
    ) {
        let Some(entry) = self.table.get(handle).await else {
            warn!(%handle, "multicast update: unknown session");
            return;
        };
        if !matches!(entry.state(), SessionState::Idle | SessionState::Active) {
            entry.callbacks.on_ranging_reconfigure_failed(FailureReason::Rejected);
            return;
        }

        // Drop any stale notification from a previous update.
        entry.multicast_status.lock().take();

        let status = self
            .driver
            .multicast_list_update(
                entry.session_id,
                action,
                &controlees,
                keys.as_ref(),
                &entry.chip_id,
            )
            .await;
        if !status.is_ok() {
            for controlee in &controlees {
                self.emit_controlee_failure(&entry, action, controlee.address, status);
            }
            entry.callbacks.on_ranging_reconfigure_failed(FailureReason::Failed);
            return;
        }

        let timeout = self.config.state_wait_timeout(entry.session_type);
        let deadline = tokio::time::Instant::now() + timeout;
        let update = loop {
            if let Some(update) = entry.multicast_status.lock().take() {
                break Some(update);
            }
            if tokio::time::timeout_at(deadline, entry.multicast_ntf.notified()).await.is_err() {
                break None;
            }
        };
        let Some(update) = update else {
            warn!(session_id = entry.session_id, "multicast update: no status notification");
            entry.callbacks.on_ranging_reconfigure_failed(FailureReason::Failed);
            return;
        };

        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut any_failed = false;
        for controlee in &update.statuses {
            if controlee.status.is_ok() {
                match action {
                    MulticastUpdateAction::Add => {
                        entry.callbacks.on_controlee_added(controlee.address);
                        added.push(Controlee {
                            address: controlee.address,
                            sub_session_id: controlee.sub_session_id,
                        });
                    }
                    MulticastUpdateAction::Remove => {
                        entry.callbacks.on_controlee_removed(controlee.address);
                        removed.push(controlee.address);
                    }
                }
            } else {
                any_failed = true;
                self.emit_controlee_failure(
                    &entry,
                    action,
                    controlee.address,
                    controlee.status.to_status_code(),
                );
            }
        }
        entry.apply_controlee_update(&added, &removed);

        if any_failed {
            entry.callbacks.on_ranging_reconfigure_failed(FailureReason::Failed);
        } else {
            entry.callbacks.on_ranging_reconfigured();
        }
    }

    fn emit_controlee_failure(
        &self,
        entry: &Arc<SessionEntry>,
        action: MulticastUpdateAction,
        address: MacAddress,
        status: StatusCode,
    ) {
        match action {
            MulticastUpdateAction::Add => entry.callbacks.on_controlee_add_failed(address, status),
            MulticastUpdateAction::Remove => {
                entry.callbacks.on_controlee_remove_failed(address, status);
            }
        }
    }

    async fn handle_send_data(
        &self,
        handle: SessionHandle,
        address: MacAddress,
        bundle: serde_json::Value,
        payload: Bytes,
    ) {
        let Some(entry) = self.table.get(handle).await else {
            warn!(%handle, "send data: unknown session");
            return;
        };
        if entry.state() != SessionState::Active {
            entry.callbacks.on_data_send_failed(address, FailureReason::Failed, &bundle);
            return;
        }

        let sequence_number = {
            let mut outbound = entry.outbound.lock();
            let sequence_number = outbound.allocate();
            outbound.insert(crate::datapath::SendDataInfo {
                uci_sequence_number: sequence_number,
                remote_address: address,
                payload: payload.clone(),
                bundle: bundle.clone(),
                tx_count_observed: 0,
            });
            sequence_number
        };

        let status = self
            .driver
            .send_data(entry.session_id, address, sequence_number, &payload, &entry.chip_id)
            .await;
        if !status.is_ok() {
            entry.outbound.lock().take(sequence_number);
            warn!(session_id = entry.session_id, %status, "send data rejected by driver");
            entry.callbacks.on_data_send_failed(address, FailureReason::Failed, &bundle);
        }
        // Terminal outcome arrives as a data transfer status notification.
    }

    async fn handle_deinit(&self, handle: SessionHandle, mode: DeinitMode) {
        let Some(entry) = self.table.get(handle).await else {
            // A deinit already completed for this session; later ones no-op.
            return;
        };
        if entry.state() == SessionState::Deinit {
            return;
        }

        entry.mark_deinit_in_progress();
        let status = self.driver.deinit_session(entry.session_id, &entry.chip_id).await;
        if status.is_ok() {
            let timeout = self.config.state_wait_timeout(entry.session_type);
            let _ = wait_for_state(&entry, SessionState::Deinit, timeout).await;
        }
        // Force the terminal state locally even when the subsystem never
        // confirmed; the record is going away either way.
        entry.transition_to(SessionState::Deinit);
        self.finalize_session(&entry).await;
        info!(session_id = entry.session_id, mode = ?mode, %status, "session deinitialized");

        match mode {
            DeinitMode::Client => entry.callbacks.on_ranging_closed(status),
            DeinitMode::Eviction => {
                entry.callbacks.on_ranging_closed(StatusCode::MaxSessionsExceeded);
            }
            DeinitMode::ClientDeath => {}
        }
    }

    /// Cancel alarms, drop in-flight sends, and remove the table entry.
    async fn finalize_session(&self, entry: &Arc<SessionEntry>) {
        self.cancel_error_streak_alarm(entry);
        if let Some(handle) = entry.background_alarm.lock().take() {
            self.alarms.cancel(handle);
        }
        entry.outbound.lock().clear();
        self.table.remove(entry.handle).await;
    }

    fn cancel_error_streak_alarm(&self, entry: &Arc<SessionEntry>) {
        if let Some(handle) = entry.error_streak_alarm.lock().take() {
            self.alarms.cancel(handle);
        }
    }

    async fn handle_query_max_data_size(&self, handle: SessionHandle) -> Result<u16> {
        let entry = self.table.get(handle).await.ok_or(Error::SessionNotFound(handle))?;
        self.driver.query_max_data_size_bytes(entry.session_id, &entry.chip_id).await
    }

    async fn handle_update_dt_tag_rounds(
        &self,
        handle: SessionHandle,
        ranging_round_indices: Vec<u8>,
    ) -> Result<RangingRoundsUpdateStatus> {
        let entry = self.table.get(handle).await.ok_or(Error::SessionNotFound(handle))?;
        self.driver
            .update_dt_tag_ranging_rounds(entry.session_id, &ranging_round_indices, &entry.chip_id)
            .await
    }

    async fn handle_set_hybrid_config(
        &self,
        handle: SessionHandle,
        config: HybridSessionConfig,
    ) -> Result<()> {
        let entry = self.table.get(handle).await.ok_or(Error::SessionNotFound(handle))?;
        let status = self
            .driver
            .set_hybrid_session_configuration(entry.session_id, &config, &entry.chip_id)
            .await;
        if status.is_ok() {
            Ok(())
        } else {
            Err(Error::Driver(status))
        }
    }

    /// Apply a foreground/background transition to every session the UID is
    /// attributed on. Runs inline on the dispatcher so the resulting
    /// reconfigures stay ordered with client commands.
    async fn handle_importance_changed(&self, uid: u32, importance: UidImportance) {
        let sessions = self.table.sessions().await;
        for entry in sessions {
            if !entry.attributed_to_uid(uid) {
                continue;
            }
            // Only third-party sessions ride the FG/BG rungs.
            if !matches!(
                entry.priority(),
                SessionPriority::Foreground | SessionPriority::Background
            ) {
                continue;
            }
            match importance {
                UidImportance::Background => self.move_session_to_background(&entry).await,
                UidImportance::Foreground => self.move_session_to_foreground(&entry).await,
            }
        }
    }

    async fn move_session_to_background(&self, entry: &Arc<SessionEntry>) {
        debug!(session_id = entry.session_id, "session attributed uid went background");
        entry.set_priority(SessionPriority::Background);

        if entry.state() == SessionState::Active
            && entry.session_type == SessionType::FiraRanging
            && !entry.ntf_suppressed()
        {
            let params = RangingReconfigureParams {
                range_data_ntf_config: Some(RangeDataNtfConfig::Disable),
                ..Default::default()
            };
            let status = self.handle_reconfigure(entry.handle, params, false).await;
            if status.is_ok() {
                entry.set_ntf_suppressed(true);
            }
        }

        if !self.config.background_ranging_enabled {
            let mut alarm = entry.background_alarm.lock();
            if alarm.is_none() {
                let cmd_tx = self.cmd_tx.clone();
                let handle = entry.handle;
                let armed = self.alarms.set_exact(
                    NON_PRIVILEGED_BG_APP_TIMER_TAG,
                    self.config.background_app_timeout(),
                    Box::new(move || {
                        let _ = cmd_tx
                            .try_send(Command::Stop { handle, trigger: StopTrigger::BackgroundPolicy });
                    }),
                );
                *alarm = Some(armed);
            }
        }
    }

    async fn move_session_to_foreground(&self, entry: &Arc<SessionEntry>) {
        debug!(session_id = entry.session_id, "session attributed uid returned to foreground");
        entry.set_priority(SessionPriority::Foreground);

        if let Some(handle) = entry.background_alarm.lock().take() {
            self.alarms.cancel(handle);
        }

        if entry.ntf_suppressed() && entry.state() == SessionState::Active {
            let params = RangingReconfigureParams {
                range_data_ntf_config: Some(RangeDataNtfConfig::Enable),
                ..Default::default()
            };
            let status = self.handle_reconfigure(entry.handle, params, false).await;
            if status.is_ok() {
                entry.set_ntf_suppressed(false);
            }
        }
    }
}

/// Wait until the session reaches `expected`, or a terminal bail-out state,
/// or the timeout elapses.
async fn wait_for_state(
    entry: &Arc<SessionEntry>,
    expected: SessionState,
    timeout: Duration,
) -> Result<SessionState> {
    let mut rx = entry.subscribe_state();
    let wait = rx.wait_for(|state| {
        *state == expected || matches!(state, SessionState::Error | SessionState::Deinit)
    });
    let result = match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(state)) => Ok(*state),
        Ok(Err(_)) => Err(Error::ShuttingDown),
        Err(_) => Err(Error::Timeout("session state notification")),
    };
    result
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
