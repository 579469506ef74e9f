// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const MONTH: u64 = 30 * DAY;
const YEAR: u64 = 365 * DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Spawned, not yet handed to the watcher.
    #[serde(rename = "started")]
    Started,
    /// Alive and observed.
    #[serde(rename = "running")]
    Running,
    /// SIGTERM sent, exit not confirmed yet.
    #[serde(rename = "asked to stop")]
    AskedToStop,
    /// No live OS process.
    #[serde(rename = "stopped")]
    Stopped,
}

impl ProcessState {
    /// States in which the entity holds a pid.
    pub fn has_pid(self) -> bool {
        !matches!(self, ProcessState::Stopped)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Started => write!(f, "started"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::AskedToStop => write!(f, "asked to stop"),
            ProcessState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Last known resource usage of a process. Not guaranteed fresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub state: ProcessState,
    pub restarts: u32,
    /// Unix seconds of the last launch, 0 if never launched.
    pub start_time: i64,
    pub uptime: String,
    pub sample: ResourceSample,
}

impl Default for ProcessStatus {
    fn default() -> Self {
        Self {
            state: ProcessState::Stopped,
            restarts: 0,
            start_time: 0,
            uptime: format_uptime(0),
            sample: ResourceSample::default(),
        }
    }
}

impl ProcessStatus {
    pub fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    pub fn add_restart(&mut self) {
        self.restarts = self.restarts.saturating_add(1);
    }

    pub fn init_uptime(&mut self, now: i64) {
        self.start_time = now;
        self.uptime = format_uptime(0);
    }

    pub fn refresh_uptime(&mut self, now: i64) {
        let elapsed = now.saturating_sub(self.start_time).max(0) as u64;
        self.uptime = format_uptime(elapsed);
    }

    pub fn reset_uptime(&mut self) {
        self.uptime = format_uptime(0);
    }
}

/// Coarse human magnitude: `42s`, `5m`, `3h`, `2d`, `4mo`, `1y`.
pub fn format_uptime(secs: u64) -> String {
    match secs {
        s if s < MINUTE => format!("{s}s"),
        s if s < HOUR => format!("{}m", s / MINUTE),
        s if s < DAY => format!("{}h", s / HOUR),
        s if s < MONTH => format!("{}d", s / DAY),
        s if s < YEAR => format!("{}mo", s / MONTH),
        s => format!("{}y", s / YEAR),
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
