// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::protocol::{
    GoBin, ProcDataResponse, ProcName, Reply, Request, Response, read_frame, write_frame,
};
use crate::error::{Result, SupervisorError};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::net::TcpStream;

/// One persistent connection to a daemon. Calls are sequential.
pub struct RemoteClient {
    addr: String,
    stream: TcpStream,
}

impl RemoteClient {
    /// Connect, giving up after `timeout`.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let connection_err = |reason: String| SupervisorError::Connection {
            addr: addr.to_string(),
            reason,
        };
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| connection_err(format!("timed out after {timeout:?}")))?
            .map_err(|e| connection_err(e.to_string()))?;
        Ok(Self {
            addr: addr.to_string(),
            stream,
        })
    }

    pub async fn save(&mut self) -> Result<()> {
        self.ack(Request::Save).await
    }

    pub async fn start_go_bin(&mut self, bin: GoBin) -> Result<()> {
        self.ack(Request::StartGoBin(bin)).await
    }

    pub async fn restart_process(&mut self, name: &str) -> Result<()> {
        self.ack(Request::RestartProcess(proc_name(name))).await
    }

    pub async fn start_process(&mut self, name: &str) -> Result<()> {
        self.ack(Request::StartProcess(proc_name(name))).await
    }

    pub async fn stop_process(&mut self, name: &str) -> Result<()> {
        self.ack(Request::StopProcess(proc_name(name))).await
    }

    pub async fn delete_process(&mut self, name: &str) -> Result<()> {
        self.ack(Request::DeleteProcess(proc_name(name))).await
    }

    pub async fn resurrect(&mut self) -> Result<()> {
        self.ack(Request::Resurrect).await
    }

    pub async fn monit_status(&mut self) -> Result<Vec<ProcDataResponse>> {
        match self.call(Request::MonitStatus).await? {
            Response::Status(rows) => Ok(rows),
            other => Err(unexpected("MonitStatus", &other)),
        }
    }

    pub async fn get_proc_by_name(&mut self, name: &str) -> Result<BTreeMap<String, String>> {
        match self.call(Request::GetProcByName(proc_name(name))).await? {
            Response::ProcInfo(info) => Ok(info),
            other => Err(unexpected("GetProcByName", &other)),
        }
    }

    async fn ack(&mut self, request: Request) -> Result<()> {
        let call = request.call_name();
        match self.call(request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(call, &other)),
        }
    }

    async fn call(&mut self, request: Request) -> Result<Response> {
        write_frame(&mut self.stream, &request)
            .await
            .map_err(|e| self.io_error(e))?;
        let reply: Reply = read_frame(&mut self.stream)
            .await
            .map_err(|e| self.io_error(e))?
            .ok_or_else(|| SupervisorError::Connection {
                addr: self.addr.clone(),
                reason: "daemon closed the connection".into(),
            })?;
        match reply {
            Reply::Ok(response) => Ok(response),
            Reply::Err(e) => Err(e.into()),
        }
    }

    fn io_error(&self, e: std::io::Error) -> SupervisorError {
        match e.kind() {
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::InvalidInput => {
                SupervisorError::Protocol(e.to_string())
            }
            _ => SupervisorError::Connection {
                addr: self.addr.clone(),
                reason: e.to_string(),
            },
        }
    }
}

fn proc_name(name: &str) -> ProcName {
    ProcName {
        name: name.to_string(),
    }
}

fn unexpected(call: &str, response: &Response) -> SupervisorError {
    SupervisorError::Protocol(format!("unexpected response to {call}: {response:?}"))
}
