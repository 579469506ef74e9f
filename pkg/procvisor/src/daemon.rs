// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Single-instance guard for the daemon itself.

use anyhow::{Context, Result, bail};
use log::{info, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};

pub const DAEMON_PID_FILE: &str = "main.pid";

pub struct DaemonPidFile {
    path: PathBuf,
    owned: bool,
}

impl DaemonPidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid recorded in the file, if any.
    pub fn read_pid(&self) -> Result<Option<i32>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let pid = contents.trim().parse::<i32>().with_context(|| {
                    format!("malformed pid file {}", self.path.display())
                })?;
                Ok(Some(pid))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        }
    }

    /// Pid of a live daemon recorded in the file. Stale entries read as `None`.
    pub fn running_pid(&self) -> Result<Option<i32>> {
        Ok(self.read_pid()?.filter(|&pid| pid_is_alive(pid)))
    }

    /// Claim the file for this process. Fails if another daemon is alive.
    pub fn acquire(&mut self) -> Result<()> {
        match self.read_pid() {
            Ok(Some(pid)) if pid != std::process::id() as i32 && pid_is_alive(pid) => {
                bail!("daemon already running with pid {pid}");
            }
            Ok(Some(pid)) => info!("removing stale pid file (pid {pid})"),
            Ok(None) => {}
            Err(e) => warn!("ignoring unreadable pid file: {e:#}"),
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&self.path, std::process::id().to_string())
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        self.owned = true;
        Ok(())
    }

    pub fn release(&mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove {}: {e}", self.path.display());
            }
        }
    }

    /// Ask the recorded daemon to shut down. Returns the signalled pid.
    pub fn signal_daemon(&self) -> Result<i32> {
        let Some(pid) = self.running_pid()? else {
            bail!("no running daemon recorded in {}", self.path.display());
        };
        signal::kill(Pid::from_raw(pid), Signal::SIGTERM)
            .with_context(|| format!("failed to signal daemon pid {pid}"))?;
        Ok(pid)
    }
}

impl Drop for DaemonPidFile {
    fn drop(&mut self) {
        self.release();
    }
}

pub fn pid_is_alive(pid: i32) -> bool {
    pid > 0 && signal::kill(Pid::from_raw(pid), None).is_ok()
}
