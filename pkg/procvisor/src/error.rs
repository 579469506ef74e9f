// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Supervisor errors and their wire-level kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown process '{0}'")]
    UnknownProcess(String),

    #[error("process '{0}' already exists")]
    AlreadyExists(String),

    #[error("process '{0}' is not running")]
    NotRunning(String),

    #[error("failed to build '{name}': {reason}\n{output}")]
    Build {
        name: String,
        reason: String,
        output: String,
    },

    #[error("{} is not executable: {reason}", path.display())]
    NotExecutable { path: PathBuf, reason: String },

    #[error("failed to launch '{name}': {source}")]
    Launch {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot reach daemon at {addr}: {reason}")]
    Connection { addr: String, reason: String },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("invalid process name '{0}'")]
    InvalidName(String),

    #[error("process '{0}' is already being watched")]
    AlreadyWatched(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },
}

/// Error category carried across the RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownProcess,
    AlreadyExists,
    NotRunning,
    Build,
    NotExecutable,
    Launch,
    Connection,
    Persistence,
    InvalidName,
    AlreadyWatched,
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnknownProcess => "unknown_process",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NotRunning => "not_running",
            ErrorKind::Build => "build",
            ErrorKind::NotExecutable => "not_executable",
            ErrorKind::Launch => "launch",
            ErrorKind::Connection => "connection",
            ErrorKind::Persistence => "persistence",
            ErrorKind::InvalidName => "invalid_name",
            ErrorKind::AlreadyWatched => "already_watched",
            ErrorKind::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

impl SupervisorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SupervisorError::UnknownProcess(_) => ErrorKind::UnknownProcess,
            SupervisorError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            SupervisorError::NotRunning(_) => ErrorKind::NotRunning,
            SupervisorError::Build { .. } => ErrorKind::Build,
            SupervisorError::NotExecutable { .. } => ErrorKind::NotExecutable,
            SupervisorError::Launch { .. } => ErrorKind::Launch,
            SupervisorError::Connection { .. } => ErrorKind::Connection,
            SupervisorError::Persistence(_) => ErrorKind::Persistence,
            SupervisorError::InvalidName(_) => ErrorKind::InvalidName,
            SupervisorError::AlreadyWatched(_) => ErrorKind::AlreadyWatched,
            SupervisorError::Protocol(_) => ErrorKind::Protocol,
            SupervisorError::Remote { kind, .. } => *kind,
        }
    }

    pub(crate) fn launch(name: &str, source: std::io::Error) -> Self {
        SupervisorError::Launch {
            name: name.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
