// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};
use procvisor::config::DaemonConfig;
use procvisor::daemon::DaemonPidFile;
use procvisor::sampler::SysinfoSampler;
use procvisor::store::YamlStore;
use procvisor::{Master, RemoteMaster};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};

/// Process supervisor daemon. Runs in the foreground.
#[derive(Parser)]
#[command(name = "procvisord", version)]
struct Args {
    /// System folder; overrides PROCVISOR_HOME.
    #[arg(long)]
    home: Option<PathBuf>,

    /// Listen address; overrides PROCVISOR_ADDR.
    #[arg(long)]
    addr: Option<String>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = DaemonConfig::from_env()?;
    if let Some(home) = args.home {
        config.sys_folder = home;
    }
    if let Some(addr) = args.addr {
        config.addr = addr;
    }

    procvisor_log::init(
        procvisor_log::level_from_env(LevelFilter::Info),
        args.log_file.as_deref(),
    )?;
    info!(
        "procvisord starting (version {}, home {})",
        env!("CARGO_PKG_VERSION"),
        config.sys_folder.display()
    );

    let mut pid_file = DaemonPidFile::new(config.pid_file());
    pid_file.acquire()?;

    let store = Arc::new(YamlStore::in_sys_folder(&config.sys_folder));
    let master = Master::start(
        &config.sys_folder,
        store,
        Arc::new(SysinfoSampler::default()),
        config.settings,
    )
    .await
    .context("failed to start master")?;

    let server = match RemoteMaster::serve(master.clone(), &config.addr).await {
        Ok(server) => server,
        Err(e) => {
            master.shutdown().await;
            return Err(e).context("failed to start rpc server");
        }
    };
    info!("procvisord ready on {}", server.local_addr());

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigquit.recv() => info!("received SIGQUIT"),
    }

    server.stop().await;
    pid_file.release();
    info!("procvisord stopped");
    Ok(())
}
