// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::time::Duration;

pub const HOME_ENV_VAR: &str = "PROCVISOR_HOME";
pub const ADDR_ENV_VAR: &str = "PROCVISOR_ADDR";
pub const STATUS_INTERVAL_ENV_VAR: &str = "PROCVISOR_STATUS_INTERVAL";
pub const SAVE_INTERVAL_ENV_VAR: &str = "PROCVISOR_SAVE_INTERVAL";
pub const STOP_TIMEOUT_ENV_VAR: &str = "PROCVISOR_STOP_TIMEOUT";

pub const DEFAULT_ADDR: &str = "127.0.0.1:9876";
const DEFAULT_HOME_DIR: &str = ".procvisor";
const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing knobs of the supervision loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterSettings {
    pub status_interval: Duration,
    pub save_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for MasterSettings {
    fn default() -> Self {
        Self {
            status_interval: DEFAULT_STATUS_INTERVAL,
            save_interval: DEFAULT_SAVE_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Root under which every process gets `{name}/`, plus `state.yaml` and
    /// `main.pid`.
    pub sys_folder: PathBuf,
    pub addr: String,
    pub settings: MasterSettings,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let sys_folder = match get(HOME_ENV_VAR) {
            Some(home) if !home.is_empty() => PathBuf::from(home),
            _ => {
                let user_home = get("HOME")
                    .filter(|h| !h.is_empty())
                    .with_context(|| format!("neither {HOME_ENV_VAR} nor HOME is set"))?;
                PathBuf::from(user_home).join(DEFAULT_HOME_DIR)
            }
        };
        let duration = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(raw) => parse_duration(&raw).with_context(|| format!("invalid {key}")),
                None => Ok(default),
            }
        };

        Ok(Self {
            sys_folder,
            addr: get(ADDR_ENV_VAR).unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            settings: MasterSettings {
                status_interval: duration(STATUS_INTERVAL_ENV_VAR, DEFAULT_STATUS_INTERVAL)?,
                save_interval: duration(SAVE_INTERVAL_ENV_VAR, DEFAULT_SAVE_INTERVAL)?,
                stop_timeout: duration(STOP_TIMEOUT_ENV_VAR, DEFAULT_STOP_TIMEOUT)?,
            },
        })
    }

    pub fn pid_file(&self) -> PathBuf {
        self.sys_folder.join(crate::daemon::DAEMON_PID_FILE)
    }
}

/// `250ms`, `30s`, `5m`, `1h`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    if digits.is_empty() {
        bail!("duration '{raw}' has no value");
    }
    let value: u64 = digits
        .parse()
        .with_context(|| format!("duration '{raw}' out of range"))?;
    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        other => bail!("unknown duration unit '{other}' in '{raw}'"),
    };
    if duration.is_zero() {
        bail!("duration '{raw}' must be positive");
    }
    Ok(duration)
}
