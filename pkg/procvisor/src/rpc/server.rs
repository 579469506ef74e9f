// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::protocol::{GoBin, ProcDataResponse, Reply, Request, Response, read_frame, write_frame};
use crate::error::{Result, SupervisorError};
use crate::master::Master;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// TCP front of a [`Master`].
pub struct RemoteMaster {
    master: Arc<Master>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteMaster {
    /// Bind `addr` and start accepting clients.
    pub async fn serve(master: Arc<Master>, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SupervisorError::Connection {
                addr: addr.to_string(),
                reason: format!("bind failed: {e}"),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SupervisorError::Connection {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        info!("listening on {local_addr}");

        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, master.clone(), shutdown.clone()));
        Ok(Self {
            master,
            local_addr,
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close open connections, then shut the master down.
    pub async fn stop(&self) {
        info!("stopping rpc server");
        self.shutdown.cancel();
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("accept loop ended abnormally: {e}");
            }
        }
        self.master.shutdown().await;
    }
}

async fn accept_loop(listener: TcpListener, master: Arc<Master>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            conn = listener.accept() => match conn {
                Ok((stream, peer)) => {
                    debug!("client connected from {peer}");
                    let master = master.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &master, shutdown).await {
                            warn!("connection from {peer} closed: {e}");
                        }
                    });
                }
                Err(e) => error!("accept error: {e}"),
            },
        }
    }
    debug!("accept loop stopped");
}

async fn handle_connection(
    mut stream: TcpStream,
    master: &Master,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    loop {
        let request: Request = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = read_frame::<_, Request>(&mut stream) => match frame? {
                Some(request) => request,
                None => return Ok(()),
            },
        };
        let reply = dispatch(master, request).await;
        write_frame(&mut stream, &reply).await?;
    }
}

/// Run one call against the master.
pub async fn dispatch(master: &Master, request: Request) -> Reply {
    let call = request.call_name();
    debug!("rpc {call}");
    match handle(master, request).await {
        Ok(response) => Reply::Ok(response),
        Err(e) => {
            match &e {
                SupervisorError::AlreadyExists(_) => warn!("rpc {call}: {e}"),
                _ => error!("rpc {call}: {e}"),
            }
            Reply::Err((&e).into())
        }
    }
}

async fn handle(master: &Master, request: Request) -> Result<Response> {
    match request {
        Request::Save => master.save().await.map(|()| Response::Ack),
        Request::StartGoBin(bin) => start_go_bin(master, bin).await.map(|()| Response::Ack),
        Request::RestartProcess(p) => master.restart_process(&p.name).await.map(|()| Response::Ack),
        Request::StartProcess(p) => master.start_process(&p.name).await.map(|()| Response::Ack),
        Request::StopProcess(p) => master.stop_process(&p.name).await.map(|()| Response::Ack),
        Request::DeleteProcess(p) => master.delete_process(&p.name).await.map(|()| Response::Ack),
        Request::MonitStatus => {
            let rows = master
                .list_procs()
                .await
                .into_iter()
                .map(|snap| ProcDataResponse {
                    name: snap.spec.name,
                    pid: snap.pid,
                    status: snap.status,
                })
                .collect();
            Ok(Response::Status(rows))
        }
        Request::GetProcByName(p) => Ok(Response::ProcInfo(master.proc_info(&p.name).await)),
        Request::Resurrect => {
            master.resurrect().await;
            Ok(Response::Ack)
        }
    }
}

async fn start_go_bin(master: &Master, bin: GoBin) -> Result<()> {
    let prepared = master
        .prepare(
            &bin.source_path,
            &bin.name,
            bin.language,
            bin.keep_alive,
            bin.args,
            bin.bin_file,
        )
        .await?;
    if !prepared.output().is_empty() {
        debug!("[{}] build output:\n{}", bin.name, prepared.output());
    }
    master.run_preparable(prepared).await
}
