// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session priority ladder and policy helpers.
//!
//! Priorities gate admission: when a protocol's session bound is reached, a
//! new session may evict a resident of strictly lower priority (oldest
//! first among equals). Importance transitions reported by the platform
//! move third-party sessions between the foreground and background rungs.

use std::time::Duration;

use crate::uci::SessionType;

/// The platform system server's UID.
pub const SYSTEM_UID: u32 = 1000;

/// One link of a session's attribution chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionSource {
    pub uid: u32,
    pub package_name: String,
}

/// Process importance as reported by the platform's UID observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidImportance {
    Foreground,
    Background,
}

/// Stack-assigned session priority. Declaration order is rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPriority {
    Background,
    Foreground,
    Ccc,
    System,
}

impl SessionPriority {
    /// Numeric priority injected into FiRa app config (1..=100).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Background => 50,
            Self::Foreground => 60,
            Self::Ccc => 70,
            Self::System => 80,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "BG",
            Self::Foreground => "FG",
            Self::Ccc => "CCC",
            Self::System => "SYSTEM",
        }
    }
}

/// Assign the stack priority for a new session.
///
/// System-UID callers outrank everything; CCC sessions are privileged by
/// construction; third-party sessions rank by process importance, where a
/// chain counts as foreground only if every attributed UID is foreground.
pub fn assign_priority(
    session_type: SessionType,
    attribution: &[AttributionSource],
    importance_of: impl Fn(u32) -> UidImportance,
) -> SessionPriority {
    if attribution.iter().any(|source| source.uid == SYSTEM_UID) {
        return SessionPriority::System;
    }
    if session_type == SessionType::Ccc {
        return SessionPriority::Ccc;
    }
    let all_foreground = attribution
        .iter()
        .all(|source| importance_of(source.uid) == UidImportance::Foreground);
    if all_foreground {
        SessionPriority::Foreground
    } else {
        SessionPriority::Background
    }
}

/// Length of the error-streak window for a session.
///
/// Once a reconfigure sets a non-zero block stride the window stretches to
/// cover the strided rounds; otherwise it is the configured multiple of the
/// ranging interval.
pub fn error_streak_duration(
    ranging_interval_ms: u32,
    block_stride_length: u8,
    multiplier: u32,
) -> Duration {
    let interval = u64::from(ranging_interval_ms.max(1));
    let ms = if block_stride_length > 0 {
        interval * 2 * (u64::from(block_stride_length) + 1)
    } else {
        interval * u64::from(multiplier.max(1))
    };
    Duration::from_millis(ms)
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
