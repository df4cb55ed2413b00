// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use crate::uci::SessionType;

/// UWB session service configuration.
///
/// Designed to be flattened into the embedding daemon's CLI
/// (`#[command(flatten)]`); every knob also reads from the environment so
/// the service can be tuned without a wrapper script.
#[derive(Debug, Clone, Parser)]
#[command(name = "uwbd")]
pub struct Config {
    /// Chip identifier commands are routed to.
    #[arg(long, env = "UWBD_CHIP_ID", default_value = "default")]
    pub chip_id: String,

    /// Maximum concurrently open FiRa sessions.
    #[arg(long, env = "UWBD_MAX_FIRA_SESSIONS", default_value = "5")]
    pub max_fira_sessions: usize,

    /// Maximum concurrently open CCC sessions.
    #[arg(long, env = "UWBD_MAX_CCC_SESSIONS", default_value = "1")]
    pub max_ccc_sessions: usize,

    /// Maximum concurrently open radar sessions.
    #[arg(long, env = "UWBD_MAX_RADAR_SESSIONS", default_value = "1")]
    pub max_radar_sessions: usize,

    /// Per-peer inbound data queue depth; the smallest-sequence packet is
    /// evicted on overflow.
    #[arg(long, env = "UWBD_RX_QUEUE_DEPTH", default_value = "10")]
    pub rx_queue_depth: usize,

    /// How long to wait for an expected session state notification, in ms.
    #[arg(long, env = "UWBD_STATE_WAIT_TIMEOUT_MS", default_value = "1000")]
    pub state_wait_timeout_ms: u64,

    /// State wait timeout override for CCC sessions, in ms.
    #[arg(long, env = "UWBD_CCC_STATE_WAIT_TIMEOUT_MS", default_value = "3000")]
    pub ccc_state_wait_timeout_ms: u64,

    /// Ranging intervals of consecutive errors tolerated before the session
    /// is stopped.
    #[arg(long, env = "UWBD_ERROR_STREAK_MULTIPLIER", default_value = "2")]
    pub error_streak_multiplier: u32,

    /// Grace period before a backgrounded non-privileged app's ranging is
    /// stopped, in ms.
    #[arg(long, env = "UWBD_BACKGROUND_APP_TIMEOUT_MS", default_value = "120000")]
    pub background_app_timeout_ms: u64,

    /// Allow third-party apps to keep ranging while in the background.
    #[arg(long, env = "UWBD_BACKGROUND_RANGING_ENABLED", action = clap::ArgAction::Set, default_value_t = false)]
    pub background_ranging_enabled: bool,

    /// Stop sessions whose range notifications fail for a whole streak
    /// window.
    #[arg(long, env = "UWBD_RANGING_ERROR_STREAK_TIMER_ENABLED", action = clap::ArgAction::Set, default_value_t = true)]
    pub ranging_error_streak_timer_enabled: bool,

    /// Compute absolute initiation time for CCC 2.0+ sessions.
    #[arg(long, env = "UWBD_CCC_ABSOLUTE_INITIATION_TIME_ENABLED", action = clap::ArgAction::Set, default_value_t = false)]
    pub ccc_absolute_initiation_time_enabled: bool,

    /// Log format (json or text).
    #[arg(long, env = "UWBD_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "UWBD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chip_id: "default".to_owned(),
            max_fira_sessions: 5,
            max_ccc_sessions: 1,
            max_radar_sessions: 1,
            rx_queue_depth: 10,
            state_wait_timeout_ms: 1000,
            ccc_state_wait_timeout_ms: 3000,
            error_streak_multiplier: 2,
            background_app_timeout_ms: 120_000,
            background_ranging_enabled: false,
            ranging_error_streak_timer_enabled: true,
            ccc_absolute_initiation_time_enabled: false,
            log_format: "json".to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_fira_sessions == 0 {
            anyhow::bail!("--max-fira-sessions must be at least 1");
        }
        if self.max_ccc_sessions == 0 {
            anyhow::bail!("--max-ccc-sessions must be at least 1");
        }
        if self.max_radar_sessions == 0 {
            anyhow::bail!("--max-radar-sessions must be at least 1");
        }
        if self.rx_queue_depth == 0 {
            anyhow::bail!("--rx-queue-depth must be at least 1");
        }
        if self.state_wait_timeout_ms == 0 || self.ccc_state_wait_timeout_ms == 0 {
            anyhow::bail!("state wait timeouts must be non-zero");
        }
        if self.error_streak_multiplier == 0 {
            anyhow::bail!("--error-streak-multiplier must be at least 1");
        }
        if self.log_format != "json" && self.log_format != "text" {
            anyhow::bail!("--log-format must be json or text");
        }
        Ok(())
    }

    /// Session bound for the given session flavour.
    pub fn max_sessions(&self, session_type: SessionType) -> usize {
        match session_type {
            SessionType::FiraRanging => self.max_fira_sessions,
            SessionType::Ccc => self.max_ccc_sessions,
            SessionType::Radar => self.max_radar_sessions,
        }
    }

    /// Bounded wait for an expected state notification, per flavour.
    pub fn state_wait_timeout(&self, session_type: SessionType) -> Duration {
        match session_type {
            SessionType::Ccc => Duration::from_millis(self.ccc_state_wait_timeout_ms),
            SessionType::FiraRanging | SessionType::Radar => {
                Duration::from_millis(self.state_wait_timeout_ms)
            }
        }
    }

    pub fn background_app_timeout(&self) -> Duration {
        Duration::from_millis(self.background_app_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
