// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification router: resolves asynchronous driver events to sessions,
//! reconciles state, wakes dispatcher waits, and delivers results to client
//! sinks.
//!
//! Notifications are consumed in driver order from one mpsc channel.
//! Events for unknown sessions are dropped — the session may have been
//! deinitialized between the subsystem emitting and us receiving.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::advertise::AdvertiseManager;
use crate::alarm::{AlarmManager, RANGING_ERROR_STREAK_TIMER_TAG};
use crate::callbacks::OemExtensionCallback;
use crate::config::Config;
use crate::datapath::{PushOutcome, ReceivedDataInfo};
use crate::dispatch::{Command, StopTrigger};
use crate::error::{ChangeReason, FailureReason};
use crate::policy;
use crate::session::SessionEntry;
use crate::table::SessionTable;
use crate::uci::{
    DataRcvNtf, DataTransferStatus, DataTransferStatusNtf, DeviceRole, DriverNotification,
    MulticastListUpdateStatus, RadarDataNtf, RangingMeasurementType, RangingRoundUsage,
    ReasonCode, SessionRangeData, SessionState, SessionStatusNtf,
};

pub(crate) struct NotificationRouter {
    pub table: Arc<SessionTable>,
    pub config: Arc<Config>,
    pub alarms: Arc<dyn AlarmManager>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub advertise: Arc<dyn AdvertiseManager>,
    pub oem_extension: Option<Arc<dyn OemExtensionCallback>>,
    pub shutdown: CancellationToken,
}

/// Consume driver notifications until shutdown or the channel closes.
pub(crate) fn spawn(
    router: NotificationRouter,
    mut rx: mpsc::Receiver<DriverNotification>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = router.shutdown.cancelled() => break,
                ntf = rx.recv() => match ntf {
                    Some(ntf) => router.handle(ntf).await,
                    None => break,
                },
            }
        }
        debug!("notification router stopped");
    })
}

impl NotificationRouter {
    async fn handle(&self, ntf: DriverNotification) {
        match ntf {
            DriverNotification::SessionStatus(ntf) => self.on_session_status(ntf).await,
            DriverNotification::RangeData(data) => self.on_range_data(data).await,
            DriverNotification::MulticastListUpdate(update) => {
                self.on_multicast_update(update).await;
            }
            DriverNotification::DataReceived(ntf) => self.on_data_received(ntf).await,
            DriverNotification::DataTransferStatus(ntf) => self.on_data_transfer_status(ntf).await,
            DriverNotification::RadarData(data) => self.on_radar_data(data).await,
        }
    }

    async fn on_session_status(&self, ntf: SessionStatusNtf) {
        let Some(entry) = self.table.get_by_id(ntf.session_id).await else {
            debug!(session_id = ntf.session_id, "session status for unknown session, dropped");
            return;
        };
        let previous = entry.state();
        if !entry.transition_to(ntf.state) {
            if previous != ntf.state {
                warn!(
                    session_id = ntf.session_id,
                    from = %previous,
                    to = %ntf.state,
                    "ignoring illegal state transition"
                );
            }
            return;
        }
        debug!(
            session_id = ntf.session_id,
            from = %previous,
            to = %ntf.state,
            reason = ?ntf.reason,
            "session state changed"
        );

        match ntf.state {
            SessionState::Deinit => {
                // A dispatcher-driven deinit (or an open still waiting on
                // its first state change) finishes its own cleanup; only an
                // unsolicited teardown is finalized here.
                if !entry.deinit_in_progress() && previous != SessionState::Init {
                    self.finalize_unsolicited_deinit(&entry).await;
                }
            }
            SessionState::Idle => {
                if previous == SessionState::Active
                    && ntf.reason == ReasonCode::MaxRangingRoundRetryCountReached
                {
                    self.cancel_error_streak_alarm(&entry);
                    entry.callbacks.on_ranging_stopped_with_uci_reason(ntf.reason);
                }
            }
            _ => {}
        }
    }

    async fn finalize_unsolicited_deinit(&self, entry: &Arc<SessionEntry>) {
        info!(session_id = entry.session_id, "session deinitialized by subsystem");
        self.cancel_error_streak_alarm(entry);
        if let Some(handle) = entry.background_alarm.lock().take() {
            self.alarms.cancel(handle);
        }
        entry.outbound.lock().clear();
        self.table.remove(entry.handle).await;
        entry.callbacks.on_ranging_closed_with_reason(ChangeReason::SystemPolicy);
    }

    async fn on_range_data(&self, data: SessionRangeData) {
        let Some(entry) = self.table.get_by_id(data.session_id).await else {
            debug!(session_id = data.session_id, "range data for unknown session, dropped");
            return;
        };

        {
            let mut remotes = entry.remote_addresses.lock();
            for measurement in &data.measurements {
                remotes.insert(measurement.mac_address);
            }
        }

        entry.callbacks.on_ranging_result(&data);

        if data.is_ok() {
            self.cancel_error_streak_alarm(&entry);
        } else {
            self.arm_error_streak_alarm(&entry);
        }

        if self.is_owr_aoa_observer(&entry, data.measurement_type) {
            self.deliver_pointed_target_data(&entry, &data);
        }
    }

    fn is_owr_aoa_observer(
        &self,
        entry: &Arc<SessionEntry>,
        measurement_type: RangingMeasurementType,
    ) -> bool {
        if measurement_type != RangingMeasurementType::OwrAoa {
            return false;
        }
        let Some(params) = entry.params_snapshot() else {
            return false;
        };
        params.device_role() == Some(DeviceRole::Observer)
            && params.ranging_round_usage() == Some(RangingRoundUsage::OwrAoaMeasurement)
    }

    /// One-way AoA delivery: queue stays parked until the advertise registry
    /// (and the vendor hook, when present) confirm the transmitter is the
    /// pointed target.
    fn deliver_pointed_target_data(&self, entry: &Arc<SessionEntry>, data: &SessionRangeData) {
        for measurement in &data.measurements {
            self.advertise.update_advertise_target(entry.session_id, measurement);
        }

        for measurement in &data.measurements {
            let address = measurement.mac_address;
            if !self.advertise.is_pointed_target(address) {
                continue;
            }
            if let Some(oem) = self.oem_extension.as_ref() {
                if !oem.on_check_pointed_target(data) {
                    continue;
                }
            }

            let queued = entry.inbound.lock().drain_peer(address);
            if queued.is_empty() {
                continue;
            }
            for info in &queued {
                let params = serde_json::json!({
                    "uci_sequence_number": info.uci_sequence_number,
                });
                entry.callbacks.on_data_received(address, &params, &info.payload);
            }
            debug!(
                session_id = entry.session_id,
                %address,
                packets = queued.len(),
                "delivered queued one-way AoA data"
            );
            self.advertise.remove_advertise_target(address);
        }
    }

    fn arm_error_streak_alarm(&self, entry: &Arc<SessionEntry>) {
        if !self.config.ranging_error_streak_timer_enabled {
            return;
        }
        let Some(params) = entry.params_snapshot() else {
            return;
        };
        let mut alarm = entry.error_streak_alarm.lock();
        if alarm.is_some() {
            // Consecutive errors extend nothing; the first one set the clock.
            return;
        }
        let duration = policy::error_streak_duration(
            params.ranging_interval_ms(),
            params.block_stride_length(),
            self.config.error_streak_multiplier,
        );
        let cmd_tx = self.cmd_tx.clone();
        let handle = entry.handle;
        let armed = self.alarms.set_exact(
            RANGING_ERROR_STREAK_TIMER_TAG,
            duration,
            Box::new(move || {
                let _ = cmd_tx.try_send(Command::Stop { handle, trigger: StopTrigger::ErrorStreak });
            }),
        );
        *alarm = Some(armed);
        debug!(session_id = entry.session_id, ?duration, "error streak alarm armed");
    }

    fn cancel_error_streak_alarm(&self, entry: &Arc<SessionEntry>) {
        if let Some(handle) = entry.error_streak_alarm.lock().take() {
            self.alarms.cancel(handle);
        }
    }

    async fn on_multicast_update(&self, update: MulticastListUpdateStatus) {
        let Some(entry) = self.table.get_by_id(update.session_id).await else {
            debug!(session_id = update.session_id, "multicast status for unknown session, dropped");
            return;
        };
        *entry.multicast_status.lock() = Some(update);
        entry.multicast_ntf.notify_one();
    }

    async fn on_data_received(&self, ntf: DataRcvNtf) {
        let Some(entry) = self.table.get_by_id(ntf.session_id).await else {
            debug!(session_id = ntf.session_id, "inbound data for unknown session, dropped");
            return;
        };
        if !ntf.status.is_ok() {
            warn!(session_id = ntf.session_id, status = %ntf.status, "inbound data with error status");
            return;
        }

        let round_usage = entry.params_snapshot().and_then(|p| p.ranging_round_usage());
        if round_usage == Some(RangingRoundUsage::OwrAoaMeasurement) {
            let outcome = entry.inbound.lock().push(ReceivedDataInfo {
                uci_sequence_number: ntf.uci_sequence_number,
                status: ntf.status,
                source_address: ntf.source_address,
                payload: ntf.payload,
            });
            match outcome {
                PushOutcome::Queued => {
                    debug!(
                        session_id = ntf.session_id,
                        address = %ntf.source_address,
                        seq = ntf.uci_sequence_number,
                        "queued inbound data"
                    );
                }
                PushOutcome::DuplicateDropped => {
                    debug!(
                        session_id = ntf.session_id,
                        seq = ntf.uci_sequence_number,
                        "dropped duplicate inbound data"
                    );
                }
                PushOutcome::EvictedSmallest(evicted) => {
                    warn!(
                        session_id = ntf.session_id,
                        evicted, "inbound queue overflow, evicted oldest packet"
                    );
                }
            }
        } else {
            let params = serde_json::json!({
                "uci_sequence_number": ntf.uci_sequence_number,
            });
            entry.callbacks.on_data_received(ntf.source_address, &params, &ntf.payload);
        }
    }

    async fn on_data_transfer_status(&self, ntf: DataTransferStatusNtf) {
        let Some(entry) = self.table.get_by_id(ntf.session_id).await else {
            debug!(session_id = ntf.session_id, "transfer status for unknown session, dropped");
            return;
        };

        let repetition_count = entry.params_snapshot().map_or(0, |p| p.data_repetition_count());
        let resolved: Option<(crate::datapath::SendDataInfo, Option<FailureReason>)> = {
            let mut outbound = entry.outbound.lock();
            match ntf.status {
                DataTransferStatus::Ok => {
                    outbound.take(ntf.uci_sequence_number).map(|info| (info, None))
                }
                DataTransferStatus::RepetitionOk => {
                    match outbound.get_mut(ntf.uci_sequence_number) {
                        Some(info) => {
                            info.tx_count_observed = ntf.tx_count;
                            // A zero repetition count keeps the record until
                            // a terminal OK arrives.
                            if repetition_count > 0 && ntf.tx_count >= repetition_count {
                                outbound.take(ntf.uci_sequence_number).map(|info| (info, None))
                            } else {
                                None
                            }
                        }
                        None => None,
                    }
                }
                DataTransferStatus::ErrorRejected => outbound
                    .take(ntf.uci_sequence_number)
                    .map(|info| (info, Some(FailureReason::Rejected))),
                DataTransferStatus::ErrorDataTransfer
                | DataTransferStatus::ErrorNoCreditAvailable
                | DataTransferStatus::ErrorOngoing => outbound
                    .take(ntf.uci_sequence_number)
                    .map(|info| (info, Some(FailureReason::Failed))),
            }
        };

        match resolved {
            Some((info, None)) => {
                debug!(
                    session_id = ntf.session_id,
                    seq = ntf.uci_sequence_number,
                    tx_count = ntf.tx_count,
                    "outbound data delivered"
                );
                entry.callbacks.on_data_sent(info.remote_address, &info.bundle);
            }
            Some((info, Some(reason))) => {
                warn!(
                    session_id = ntf.session_id,
                    seq = ntf.uci_sequence_number,
                    status = ?ntf.status,
                    "outbound data failed"
                );
                entry.callbacks.on_data_send_failed(info.remote_address, reason, &info.bundle);
            }
            // Unknown sequence number (or a kept repetition record): no
            // callback.
            None => {}
        }
    }

    async fn on_radar_data(&self, data: RadarDataNtf) {
        let Some(entry) = self.table.get_by_id(data.session_id).await else {
            debug!(session_id = data.session_id, "radar data for unknown session, dropped");
            return;
        };
        entry.callbacks.on_radar_data_received(&data);
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
