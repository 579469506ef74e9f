// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{Result, SupervisorError};
use crate::sampler::ResourceSampler;
use crate::status::{ProcessState, ProcessStatus, unix_now};
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// Pid value of an entity without a live OS process.
pub const NO_PID: i32 = -1;

/// Everything needed to (re)launch a process. This is the persisted part of
/// an entity; pids and status are runtime only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub source_path: PathBuf,
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_path: PathBuf,
    pub pid_file: PathBuf,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
    pub keep_alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => match Signal::try_from(sig) {
                Ok(s) => write!(f, "signal {s}"),
                Err(_) => write!(f, "signal {sig}"),
            },
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Exit handle detached from an entity by [`ProcessEntity::watch`].
pub struct ExitWatch {
    name: String,
    pid: i32,
    child: Child,
}

impl ExitWatch {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Block until the OS process is gone and reaped.
    pub async fn wait(mut self) -> io::Result<ExitInfo> {
        let status = self.child.wait().await?;
        Ok(ExitInfo::from(status))
    }
}

/// Point-in-time copy of an entity, safe to hand out of the registry lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub spec: ProcessSpec,
    pub pid: i32,
    pub status: ProcessStatus,
}

pub struct ProcessEntity {
    spec: ProcessSpec,
    pid: i32,
    status: ProcessStatus,
    child: Option<Child>,
}

impl ProcessEntity {
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            pid: NO_PID,
            status: ProcessStatus::default(),
            child: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn keep_alive(&self) -> bool {
        self.spec.keep_alive
    }

    pub fn status(&self) -> &ProcessStatus {
        &self.status
    }

    pub(crate) fn status_mut(&mut self) -> &mut ProcessStatus {
        &mut self.status
    }

    /// Spawn the process with the daemon's environment and working directory.
    /// Output goes to the entity's stdout/stderr files, created if absent.
    pub fn start(&mut self) -> Result<()> {
        let name = self.spec.name.clone();
        let launch_err = |e| SupervisorError::launch(&name, e);
        std::fs::create_dir_all(&self.spec.working_path).map_err(launch_err)?;
        let stdout = open_output(&self.spec.stdout_file).map_err(launch_err)?;
        let stderr = open_output(&self.spec.stderr_file).map_err(launch_err)?;

        let mut cmd = Command::new(&self.spec.command);
        cmd.arg0(&self.spec.name)
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        let child = cmd.spawn().map_err(launch_err)?;
        let pid = child.id().map(|p| p as i32).unwrap_or(NO_PID);
        info!(
            "[{}] spawned (pid={}, cmd={})",
            name,
            pid,
            self.spec.command.display()
        );

        if let Err(e) = std::fs::write(&self.spec.pid_file, pid.to_string()) {
            warn!(
                "[{}] failed to write pid file {}: {e}",
                name,
                self.spec.pid_file.display()
            );
        }

        self.child = Some(child);
        self.pid = pid;
        self.status.init_uptime(unix_now());
        self.status.set_state(ProcessState::Started);
        Ok(())
    }

    /// Ask the process to terminate. Does not wait for it to exit.
    pub fn gracefully_stop(&mut self) -> Result<()> {
        self.send_signal(Signal::SIGTERM)?;
        self.status.set_state(ProcessState::AskedToStop);
        Ok(())
    }

    /// Kill the process immediately and release it.
    pub fn force_stop(&mut self) -> Result<()> {
        let result = self.send_signal(Signal::SIGKILL);
        if self.pid == NO_PID {
            return result;
        }
        self.mark_stopped();
        match result {
            Err(SupervisorError::NotRunning(_)) => Ok(()),
            other => other,
        }
    }

    pub fn restart(&mut self) -> Result<()> {
        if self.is_alive() {
            self.gracefully_stop()?;
        }
        self.start()
    }

    /// Remove every artifact of this entity. Safe to call repeatedly.
    pub fn delete(&mut self) -> Result<()> {
        self.mark_stopped();
        self.child = None;
        for path in [&self.spec.stdout_file, &self.spec.stderr_file] {
            remove_if_exists(path)?;
        }
        match std::fs::remove_dir_all(&self.spec.working_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SupervisorError::Persistence(format!(
                "removing {}: {e}",
                self.spec.working_path.display()
            ))),
        }
    }

    /// Zero-signal probe on the recorded pid.
    pub fn is_alive(&self) -> bool {
        self.pid > 0 && signal::kill(Pid::from_raw(self.pid), None).is_ok()
    }

    /// Detach the exit handle so a watcher task can wait on it.
    pub fn watch(&mut self) -> Result<ExitWatch> {
        let child = self
            .child
            .take()
            .ok_or_else(|| SupervisorError::NotRunning(self.spec.name.clone()))?;
        Ok(ExitWatch {
            name: self.spec.name.clone(),
            pid: self.pid,
            child,
        })
    }

    /// Confirmed dead: forget the pid and drop the pid file.
    pub fn mark_stopped(&mut self) {
        self.pid = NO_PID;
        self.status.set_state(ProcessState::Stopped);
        self.status.reset_uptime();
        if let Err(e) = remove_if_exists(&self.spec.pid_file) {
            warn!("[{}] {e}", self.spec.name);
        }
    }

    /// Recompute uptime and, for live processes, take a fresh resource sample.
    pub fn refresh(&mut self, sampler: &dyn ResourceSampler) {
        if !self.is_alive() {
            self.status.reset_uptime();
            return;
        }
        self.status.refresh_uptime(unix_now());
        match sampler.sample(self.pid) {
            Ok(sample) => self.status.sample = sample,
            Err(e) => debug!("[{}] resource sample failed: {e}", self.spec.name),
        }
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            spec: self.spec.clone(),
            pid: self.pid,
            status: self.status.clone(),
        }
    }

    fn send_signal(&self, sig: Signal) -> Result<()> {
        if self.pid <= 0 {
            return Err(SupervisorError::NotRunning(self.spec.name.clone()));
        }
        match signal::kill(Pid::from_raw(self.pid), sig) {
            Ok(()) => {
                debug!("[{}] sent {sig} to pid {}", self.spec.name, self.pid);
                Ok(())
            }
            Err(Errno::ESRCH) => Err(SupervisorError::NotRunning(self.spec.name.clone())),
            Err(e) => {
                warn!("[{}] failed to send {sig}: {e}", self.spec.name);
                Err(SupervisorError::NotRunning(self.spec.name.clone()))
            }
        }
    }
}

fn open_output(path: &Path) -> io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SupervisorError::Persistence(format!(
            "removing {}: {e}",
            path.display()
        ))),
    }
}
