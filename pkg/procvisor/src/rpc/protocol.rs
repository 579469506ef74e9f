// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Wire format between `procvisor` and `procvisord`.
//!
//! Every message is a 4-byte big-endian length followed by that many bytes of
//! JSON. A connection carries any number of request/reply pairs in order.

use crate::error::{ErrorKind, SupervisorError};
use crate::preparable::Language;
use crate::status::ProcessStatus;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Parameters of `StartGoBin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoBin {
    pub source_path: PathBuf,
    pub name: String,
    pub keep_alive: bool,
    #[serde(default)]
    pub args: Vec<String>,
    /// `source_path` is a prebuilt executable, not a source tree.
    #[serde(default)]
    pub bin_file: bool,
    #[serde(default)]
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", content = "params")]
pub enum Request {
    Save,
    StartGoBin(GoBin),
    RestartProcess(ProcName),
    StartProcess(ProcName),
    StopProcess(ProcName),
    DeleteProcess(ProcName),
    MonitStatus,
    GetProcByName(ProcName),
    Resurrect,
}

impl Request {
    pub fn call_name(&self) -> &'static str {
        match self {
            Request::Save => "Save",
            Request::StartGoBin(_) => "StartGoBin",
            Request::RestartProcess(_) => "RestartProcess",
            Request::StartProcess(_) => "StartProcess",
            Request::StopProcess(_) => "StopProcess",
            Request::DeleteProcess(_) => "DeleteProcess",
            Request::MonitStatus => "MonitStatus",
            Request::GetProcByName(_) => "GetProcByName",
            Request::Resurrect => "Resurrect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcDataResponse {
    pub name: String,
    pub pid: i32,
    pub status: ProcessStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ack,
    Status(Vec<ProcDataResponse>),
    ProcInfo(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SupervisorError> for RemoteError {
    fn from(err: &SupervisorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<RemoteError> for SupervisorError {
    fn from(err: RemoteError) -> Self {
        SupervisorError::Remote {
            kind: err.kind,
            message: err.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Ok(Response),
    Err(RemoteError),
}

/// Read one frame. `Ok(None)` when the peer closed the connection between
/// frames.
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message).map_err(io::Error::other)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds limit of {MAX_FRAME_LEN}", body.len()),
        ));
    }
    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}
