// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use super::*;
use crate::uci::SessionType;

#[test]
fn defaults_validate() -> anyhow::Result<()> {
    let config = Config::default();
    config.validate()?;
    assert_eq!(config.max_fira_sessions, 5);
    assert_eq!(config.max_ccc_sessions, 1);
    assert_eq!(config.rx_queue_depth, 10);
    assert!(!config.background_ranging_enabled);
    assert!(config.ranging_error_streak_timer_enabled);
    Ok(())
}

#[test]
fn parsed_defaults_match_default_impl() -> anyhow::Result<()> {
    let parsed = Config::try_parse_from(["uwbd"])?;
    let default = Config::default();
    assert_eq!(parsed.max_fira_sessions, default.max_fira_sessions);
    assert_eq!(parsed.state_wait_timeout_ms, default.state_wait_timeout_ms);
    assert_eq!(parsed.background_ranging_enabled, default.background_ranging_enabled);
    assert_eq!(parsed.log_format, default.log_format);
    Ok(())
}

#[test]
fn flags_parse_explicit_values() -> anyhow::Result<()> {
    let config = Config::try_parse_from([
        "uwbd",
        "--background-ranging-enabled",
        "true",
        "--max-fira-sessions",
        "2",
        "--log-format",
        "text",
    ])?;
    assert!(config.background_ranging_enabled);
    assert_eq!(config.max_fira_sessions, 2);
    config.validate()?;
    Ok(())
}

#[yare::parameterized(
    zero_fira = { &["uwbd", "--max-fira-sessions", "0"] },
    zero_rx = { &["uwbd", "--rx-queue-depth", "0"] },
    zero_timeout = { &["uwbd", "--state-wait-timeout-ms", "0"] },
    zero_multiplier = { &["uwbd", "--error-streak-multiplier", "0"] },
    bad_log_format = { &["uwbd", "--log-format", "xml"] },
)]
fn validate_rejects(args: &[&str]) -> anyhow::Result<()> {
    let config = Config::try_parse_from(args.iter().copied())?;
    assert!(config.validate().is_err());
    Ok(())
}

#[test]
fn per_protocol_bounds_and_timeouts() {
    let config = Config { ccc_state_wait_timeout_ms: 3000, ..Config::default() };
    assert_eq!(config.max_sessions(SessionType::FiraRanging), 5);
    assert_eq!(config.max_sessions(SessionType::Ccc), 1);
    assert_eq!(config.max_sessions(SessionType::Radar), 1);
    assert_eq!(config.state_wait_timeout(SessionType::Ccc), Duration::from_millis(3000));
    assert_eq!(
        config.state_wait_timeout(SessionType::FiraRanging),
        Duration::from_millis(1000)
    );
}
