// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use procvisor::config::{self, DaemonConfig};
use procvisor::daemon::DaemonPidFile;
use procvisor::format;
use procvisor::preparable::Language;
use procvisor::rpc::protocol::GoBin;
use procvisor::{ErrorKind, RemoteClient};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "procvisor", version, about = "Control a procvisord daemon")]
struct Cli {
    /// Daemon address; defaults to PROCVISOR_ADDR, then 127.0.0.1:9876.
    #[arg(long, global = true)]
    addr: Option<String>,

    /// How long to wait for the daemon to accept the connection.
    #[arg(long, global = true, default_value = "30s", value_parser = parse_timeout)]
    timeout: Duration,

    /// System folder of the daemon, used by `kill`.
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build (or validate) and launch a new process.
    Start {
        /// Source directory or file, or an executable with --binary.
        source_path: PathBuf,
        name: String,
        /// Restart the process whenever it exits on its own.
        #[arg(long)]
        keep_alive: bool,
        /// Argument passed to the process; repeat for several.
        #[arg(long = "args", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Treat SOURCE_PATH as a prebuilt executable.
        #[arg(long)]
        binary: bool,
        /// Toolchain used to build SOURCE_PATH: go or rust.
        #[arg(long, default_value = "go")]
        language: Language,
    },
    /// Launch a registered process that is not running.
    Run { name: String },
    /// Restart a process.
    Restart { name: String },
    /// Stop a process.
    Stop { name: String },
    /// Stop a process and remove it with all its files.
    Delete { name: String },
    /// Persist the process list now.
    Save,
    /// Launch every saved process that is not running.
    Resurrect,
    /// Show every process.
    List,
    /// Show everything known about one process.
    Info { name: String },
    /// Ask the daemon to shut down.
    Kill,
}

fn parse_timeout(raw: &str) -> std::result::Result<Duration, String> {
    config::parse_duration(raw).map_err(|e| format!("{e:#}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    procvisor_log::init(procvisor_log::level_from_env(LevelFilter::Warn), None)?;

    if let Command::Kill = cli.command {
        return kill_daemon(cli.home);
    }

    let addr = cli
        .addr
        .or_else(|| std::env::var(config::ADDR_ENV_VAR).ok())
        .unwrap_or_else(|| config::DEFAULT_ADDR.to_string());
    let mut client = RemoteClient::connect(&addr, cli.timeout).await?;

    match cli.command {
        Command::Start {
            source_path,
            name,
            keep_alive,
            args,
            binary,
            language,
        } => {
            let bin = GoBin {
                source_path,
                name: name.clone(),
                keep_alive,
                args,
                bin_file: binary,
                language,
            };
            match client.start_go_bin(bin).await {
                Ok(()) => println!("started {name}"),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    eprintln!("warning: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Run { name } => {
            client.start_process(&name).await?;
            println!("started {name}");
        }
        Command::Restart { name } => {
            client.restart_process(&name).await?;
            println!("restarted {name}");
        }
        Command::Stop { name } => {
            client.stop_process(&name).await?;
            println!("stopped {name}");
        }
        Command::Delete { name } => {
            client.delete_process(&name).await?;
            println!("deleted {name}");
        }
        Command::Save => {
            client.save().await?;
            println!("saved");
        }
        Command::Resurrect => {
            client.resurrect().await?;
            println!("resurrected");
        }
        Command::List => {
            let rows = client.monit_status().await?;
            print!("{}", format::status_table(&rows)?);
        }
        Command::Info { name } => {
            let info = client.get_proc_by_name(&name).await?;
            if info.is_empty() {
                anyhow::bail!("unknown process '{name}'");
            }
            print!("{}", format::info_table(&info)?);
        }
        // Handled before connecting.
        Command::Kill => {}
    }
    Ok(())
}

fn kill_daemon(home: Option<PathBuf>) -> Result<()> {
    let mut config = DaemonConfig::from_env()?;
    if let Some(home) = home {
        config.sys_folder = home;
    }
    let pid = DaemonPidFile::new(config.pid_file())
        .signal_daemon()
        .context("cannot stop daemon")?;
    println!("sent SIGTERM to procvisord (pid {pid})");
    Ok(())
}
