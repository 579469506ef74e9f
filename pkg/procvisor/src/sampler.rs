// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-pid resource sampling.

use crate::status::ResourceSample;
use std::io;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

pub trait ResourceSampler: Send + Sync {
    fn sample(&self, pid: i32) -> io::Result<ResourceSample>;
}

/// Samples through `sysinfo`. CPU usage is measured between two refreshes of
/// the same pid, so the first sample of a process reports 0%.
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self, pid: i32) -> io::Result<ResourceSample> {
        let pid = u32::try_from(pid)
            .map(Pid::from_u32)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))?;

        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        let process = system.process(pid).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no process with pid {pid}"))
        })?;

        Ok(ResourceSample {
            cpu_percent: f64::from(process.cpu_usage()),
            memory_bytes: process.memory(),
        })
    }
}
