// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tagged one-shot alarms for the policy engine.
//!
//! The platform alarm service is abstracted behind [`AlarmManager`] so tests
//! can fire alarms deterministically. The bundled [`TokioAlarmManager`] is
//! the production implementation: one spawned task per armed alarm, torn
//! down through the service shutdown token so nothing leaks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Alarm tag for the non-privileged background-app grace period.
pub const NON_PRIVILEGED_BG_APP_TIMER_TAG: &str = "uwbd.non_privileged_bg_app";

/// Alarm tag for the ranging error-streak window.
pub const RANGING_ERROR_STREAK_TIMER_TAG: &str = "uwbd.ranging_error_streak";

/// Handle to one armed alarm. Cancellation through a stale handle is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmHandle(pub u64);

/// Callback invoked when an alarm fires. Runs on an arbitrary task; post
/// work to the dispatcher rather than doing it inline.
pub type AlarmCallback = Box<dyn FnOnce() + Send>;

pub trait AlarmManager: Send + Sync + 'static {
    /// Arm an exact one-shot alarm. The returned handle stays valid until
    /// the alarm fires or is cancelled.
    fn set_exact(&self, tag: &'static str, delay: Duration, on_fire: AlarmCallback) -> AlarmHandle;

    /// Cancel an armed alarm. Idempotent; firing and cancellation race
    /// safely (the callback runs at most once).
    fn cancel(&self, handle: AlarmHandle);
}

/// Production alarm manager backed by the tokio timer wheel.
pub struct TokioAlarmManager {
    next_id: AtomicU64,
    armed: Arc<parking_lot::Mutex<HashMap<u64, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl TokioAlarmManager {
    /// `shutdown` cancels every armed alarm when the owning service stops.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            armed: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    /// Number of currently armed alarms.
    pub fn armed_count(&self) -> usize {
        self.armed.lock().len()
    }
}

impl AlarmManager for TokioAlarmManager {
    fn set_exact(&self, tag: &'static str, delay: Duration, on_fire: AlarmCallback) -> AlarmHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();
        self.armed.lock().insert(id, token.clone());

        let armed = Arc::clone(&self.armed);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(tag, id, "alarm cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    // Deregister before firing so a concurrent cancel of a
                    // fired alarm stays a no-op.
                    if armed.lock().remove(&id).is_some() {
                        debug!(tag, id, "alarm fired");
                        on_fire();
                    }
                }
            }
        });

        AlarmHandle(id)
    }

    fn cancel(&self, handle: AlarmHandle) {
        if let Some(token) = self.armed.lock().remove(&handle.0) {
            token.cancel();
        }
    }
}

#[cfg(test)]
#[path = "alarm_tests.rs"]
mod tests;
