// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll `cond` every 50ms until it holds or `timeout` runs out.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !cond() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    true
}

/// A `procvisord` child whose stderr log lines are collected in the
/// background. Killed on drop.
pub struct DaemonHandle {
    child: Child,
    port: u16,
    log_lines: Arc<Mutex<Vec<String>>>,
}

impl DaemonHandle {
    /// Launch with `PROCVISOR_HOME` at `home`, listening on `port`, with short
    /// status and stop intervals.
    pub fn start(home: &Path, port: u16) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_procvisord"))
            .env("PROCVISOR_HOME", home)
            .env("PROCVISOR_ADDR", format!("127.0.0.1:{port}"))
            .env("PROCVISOR_STATUS_INTERVAL", "200ms")
            .env("PROCVISOR_STOP_TIMEOUT", "3s")
            .env("PROCVISOR_LOG_LEVEL", "debug")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start procvisord");

        let stderr = child.stderr.take().expect("stderr is piped");
        let log_lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log_lines);
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                eprintln!("[procvisord] {line}");
                sink.lock().unwrap().push(line);
            }
        });

        Self {
            child,
            port,
            log_lines,
        }
    }

    /// Launch on a free port and wait for the ready line.
    pub fn start_ready(home: &Path) -> Self {
        let daemon = Self::start(home, free_port());
        assert!(
            daemon.wait_for_log_default("procvisord ready"),
            "daemon never reported ready"
        );
        daemon
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn matching_lines(&self, pattern: &str) -> usize {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().filter(|l| l.contains(pattern)).count()
    }

    /// Wait until at least `n` log lines contain `pattern`.
    pub fn wait_for_log_count(&self, pattern: &str, n: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.matching_lines(pattern) >= n)
    }

    pub fn wait_for_log_default(&self, pattern: &str) -> bool {
        self.wait_for_log_count(pattern, 1, DEFAULT_TIMEOUT)
    }

    /// SIGTERM, then wait for the exit status.
    pub fn stop(&mut self) -> ExitStatus {
        signal::kill(Pid::from_raw(self.pid() as i32), Signal::SIGTERM)
            .expect("failed to signal procvisord");
        self.wait_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Exit status, killing the daemon if it outlives `timeout`.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> ExitStatus {
        let mut status = None;
        wait_until(timeout, || {
            status = self.child.try_wait().expect("try_wait on procvisord");
            status.is_some()
        });
        match status {
            Some(status) => status,
            None => {
                let _ = self.child.kill();
                self.child.wait().expect("wait on killed procvisord")
            }
        }
    }

    /// Pids of every `[name] spawned (pid=N` line, in log order.
    pub fn spawned_pids(&self, name: &str) -> Vec<u32> {
        let marker = format!("[{name}] spawned (pid=");
        let lines = self.log_lines.lock().unwrap();
        lines
            .iter()
            .filter_map(|line| {
                let rest = &line[line.find(&marker)? + marker.len()..];
                let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .collect()
    }

    pub fn cli(&self, home: &Path, args: &[&str]) -> Output {
        run_cli(self.port, home, args)
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Run `procvisor` against the daemon on `port` with a short connect timeout.
pub fn run_cli(port: u16, home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_procvisor"))
        .env("PROCVISOR_ADDR", format!("127.0.0.1:{port}"))
        .env("PROCVISOR_HOME", home)
        .args(["--timeout", "5s"])
        .args(args)
        .output()
        .expect("failed to run procvisor")
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Value of `field` in `procvisor info` output.
pub fn info_field(output: &Output, field: &str) -> Option<String> {
    let prefix = format!("{field}:");
    stdout(output)
        .lines()
        .find_map(|l| l.strip_prefix(&prefix))
        .map(|v| v.trim().to_string())
}

/// A port nobody listens on right now.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("no free port")
}

pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    wait_until(timeout, || !pid_is_alive(pid))
}
