// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Human-readable output for the CLI.

use crate::rpc::protocol::ProcDataResponse;
use std::collections::BTreeMap;
use std::io::{self, Write};
use tabwriter::TabWriter;

const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

pub fn human_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Column-aligned table of `MonitStatus` rows.
pub fn status_table(rows: &[ProcDataResponse]) -> io::Result<String> {
    let mut buf = Vec::new();
    {
        let mut tw = TabWriter::new(&mut buf).padding(2);
        writeln!(tw, "PID\tNAME\tSTATUS\tUPTIME\tRESTARTS\tCPU\tMEMORY")?;
        for row in rows {
            let pid = if row.pid > 0 {
                row.pid.to_string()
            } else {
                "-".to_string()
            };
            writeln!(
                tw,
                "{}\t{}\t{}\t{}\t{}\t{:.1}%\t{}",
                pid,
                row.name,
                row.status.state,
                row.status.uptime,
                row.status.restarts,
                row.status.sample.cpu_percent,
                human_bytes(row.status.sample.memory_bytes),
            )?;
        }
        tw.flush()?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// `GetProcByName` output, one aligned `field: value` per line.
pub fn info_table(fields: &BTreeMap<String, String>) -> io::Result<String> {
    let mut buf = Vec::new();
    {
        let mut tw = TabWriter::new(&mut buf);
        for (field, value) in fields {
            writeln!(tw, "{field}:\t{value}")?;
        }
        tw.flush()?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
