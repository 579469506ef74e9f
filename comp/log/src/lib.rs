// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Logger backend shared by the procvisor binaries.
//!
//! Lines look like:
//! `2026-10-19 12:00:00 UTC | PROCVISOR | INFO | (src/master.rs:42) | message`

use log::{LevelFilter, Log, Metadata, Record};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

pub const LOGGER_NAME: &str = "PROCVISOR";
pub const LEVEL_ENV_VAR: &str = "PROCVISOR_LOG_LEVEL";

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[derive(Debug)]
pub enum InitError {
    Io(io::Error),
    AlreadySet(log::SetLoggerError),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Io(e) => write!(f, "failed to open log file: {e}"),
            InitError::AlreadySet(e) => write!(f, "logger already initialized: {e}"),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::Io(e) => Some(e),
            InitError::AlreadySet(e) => Some(e),
        }
    }
}

enum Sink {
    Stderr,
    File(File),
}

pub struct Logger {
    level: LevelFilter,
    sink: Mutex<Sink>,
}

impl Logger {
    pub fn stderr(level: LevelFilter) -> Self {
        Self {
            level,
            sink: Mutex::new(Sink::Stderr),
        }
    }

    /// Append to `path`, creating the file if needed.
    pub fn file(level: LevelFilter, path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            level,
            sink: Mutex::new(Sink::File(file)),
        })
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_record(OffsetDateTime::now_utc(), record);
        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        // A failing sink must never take the process down.
        let _ = match &mut *sink {
            Sink::Stderr => writeln!(io::stderr().lock(), "{line}"),
            Sink::File(file) => writeln!(file, "{line}"),
        };
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = match &mut *sink {
                Sink::Stderr => io::stderr().flush(),
                Sink::File(file) => file.flush(),
            };
        }
    }
}

pub fn format_record(now: OffsetDateTime, record: &Record) -> String {
    let timestamp = now
        .format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    let location = match (record.file(), record.line()) {
        (Some(file), Some(line)) => format!("{file}:{line}"),
        (Some(file), None) => file.to_string(),
        _ => record.target().to_string(),
    };
    format!(
        "{timestamp} UTC | {LOGGER_NAME} | {} | ({location}) | {}",
        record.level(),
        record.args()
    )
}

/// Read the level from `PROCVISOR_LOG_LEVEL`, falling back to `default`.
pub fn level_from_env(default: LevelFilter) -> LevelFilter {
    std::env::var(LEVEL_ENV_VAR)
        .ok()
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(default)
}

/// Install the global logger. Logs go to `path` when given, stderr otherwise.
pub fn init(level: LevelFilter, path: Option<&Path>) -> Result<(), InitError> {
    let logger = match path {
        Some(p) => Logger::file(level, p).map_err(InitError::Io)?,
        None => Logger::stderr(level),
    };
    log::set_boxed_logger(Box::new(logger)).map_err(InitError::AlreadySet)?;
    log::set_max_level(level);
    Ok(())
}
